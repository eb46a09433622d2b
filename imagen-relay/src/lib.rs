//! imagen-relay library
//!
//! Text-to-image generation exposed over a line-delimited JSON-RPC channel,
//! with generated images persisted locally and served over HTTP.

pub mod generator;
pub mod resources;
pub mod rpc;
pub mod service;
pub mod store;

pub use generator::{AspectRatio, ImageGenerator, ImagenClient};
pub use rpc::{RpcCall, RpcFault, RpcResponse};
pub use service::{GenerateImageParams, ImageService, ServerDescriptor};
pub use store::ArtifactStore;
