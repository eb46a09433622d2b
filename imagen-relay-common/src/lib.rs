//! imagen-relay common library
//!
//! Shared configuration, error types, tracing setup and server lifecycle
//! utilities for the imagen-relay server.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod error;
pub mod server;
pub mod tracing;


pub use config::Config;
pub use error::{ConfigError, Error, GenerationError, Result, StoreError};
pub use server::{ServerError, shutdown_channel, wait_for_shutdown_signal};
