//! Error types for the common library.
//!
//! This module provides the error hierarchy, built on `thiserror`, shared by the
//! generation pipeline, the artifact store and startup configuration.
//!
//! # Error Categories
//!
//! - `ConfigError`: Missing or invalid configuration (fatal at startup)
//! - `GenerationError`: Failures talking to the image provider
//! - `StoreError`: Filesystem failures persisting or listing artifacts
//! - `Error::Validation`: Tool argument validation failures

use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for a single image generation request.
///
/// Every failure a `generate_image` call can hit is representable here, so the
/// service can log it once and convert it to tool output text.
#[derive(Debug, Error)]
pub enum Error {
    /// Input validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Provider call failures
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// Artifact persistence failures
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    /// Create a new validation error.
    ///
    /// # Example
    ///
    /// ```
    /// use imagen_relay_common::error::Error;
    ///
    /// let err = Error::validation("prompt cannot be empty");
    /// assert!(err.to_string().contains("prompt cannot be empty"));
    /// ```
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }
}

/// Configuration errors.
///
/// These errors occur while resolving configuration at startup and abort the
/// process before anything is served.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is not set
    #[error("Required environment variable {0} is not set")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    /// No platform application-data directory could be determined
    #[error("Unable to determine the application data directory; set IMAGEN_RELAY_DATA_DIR")]
    NoDataDir,

    /// A required directory could not be created
    #[error("Failed to create directory {}: {source}", path.display())]
    CreateDir {
        /// Directory that could not be created
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    /// Create a new missing environment variable error.
    pub fn missing_env_var(name: impl Into<String>) -> Self {
        ConfigError::MissingEnvVar(name.into())
    }

    /// Create a new invalid value error.
    pub fn invalid_value(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue(name.into(), reason.into())
    }
}

/// Errors returned by the image provider client.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The request never produced an HTTP response
    #[error("Request to {endpoint} failed: {message}")]
    Transport {
        /// The provider endpoint (without credentials)
        endpoint: String,
        /// Description of the transport failure
        message: String,
    },

    /// The provider answered with a non-success status
    #[error("Provider returned HTTP {status}: {body}")]
    ProviderHttp {
        /// HTTP status code
        status: u16,
        /// Raw response body
        body: String,
    },

    /// The provider body was not the expected JSON
    #[error("Failed to parse provider response: {message} (body: {body})")]
    ProviderDecode {
        /// Parser error message
        message: String,
        /// Raw response body
        body: String,
    },

    /// The provider reported an error object in a success response
    #[error("Provider API error: {0}")]
    ProviderApi(String),

    /// The provider returned no images, usually a content policy rejection
    #[error("No images were generated. The prompt may have been blocked by the provider's safety filters; try rephrasing it")]
    NoImagesGenerated,

    /// A prediction payload was not valid base64
    #[error("Invalid base64 payload in prediction {index}: {message}")]
    PayloadDecode {
        /// Zero-based index of the prediction
        index: usize,
        /// Decoder error message
        message: String,
    },
}

impl GenerationError {
    /// HTTP status associated with the failure, if the provider answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            GenerationError::ProviderHttp { status, .. } => Some(*status),
            GenerationError::ProviderDecode { .. }
            | GenerationError::ProviderApi(_)
            | GenerationError::NoImagesGenerated
            | GenerationError::PayloadDecode { .. } => Some(200),
            GenerationError::Transport { .. } => None,
        }
    }
}

/// Artifact store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Writing an artifact failed
    #[error("Failed to write image to {}: {source}", path.display())]
    Persist {
        /// Target file path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Enumerating the image directory failed
    #[error("Failed to list images in {}: {source}", path.display())]
    List {
        /// Directory being enumerated
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias using the unified Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_http_error_includes_status_and_body() {
        let err = GenerationError::ProviderHttp {
            status: 500,
            body: r#"{"message":"boom"}"#.to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("500"), "Should contain status code");
        assert!(msg.contains(r#"{"message":"boom"}"#), "Should contain raw body");
        assert_eq!(err.status(), Some(500));
    }

    #[test]
    fn test_no_images_mentions_safety() {
        let msg = GenerationError::NoImagesGenerated.to_string();
        assert!(msg.contains("safety"), "Should mention safety filters: {}", msg);
    }

    #[test]
    fn test_transport_error_has_no_status() {
        let err = GenerationError::Transport {
            endpoint: "http://localhost/models/x:predict".to_string(),
            message: "connection refused".to_string(),
        };
        assert_eq!(err.status(), None);
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_config_error_includes_var_name() {
        let err = ConfigError::missing_env_var("GEMINI_API_KEY");
        let msg = err.to_string();
        assert!(msg.contains("GEMINI_API_KEY"), "Should contain variable name");
    }

    #[test]
    fn test_create_dir_error_includes_path() {
        let err = ConfigError::CreateDir {
            path: PathBuf::from("/nope/artifacts"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/nope/artifacts"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn test_error_from_generation_error() {
        let err: Error = GenerationError::ProviderApi("quota".to_string()).into();
        assert!(matches!(err, Error::Generation(_)));
        assert_eq!(err.to_string(), "Provider API error: quota");
    }

    #[test]
    fn test_error_from_store_error() {
        let store_err = StoreError::List {
            path: PathBuf::from("/data/images"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        let err: Error = store_err.into();
        assert!(matches!(err, Error::Store(_)));
    }

    #[test]
    fn test_validation_error() {
        let err = Error::validation("prompt too long");
        let msg = err.to_string();
        assert!(msg.contains("Validation"), "Should mention validation");
        assert!(msg.contains("prompt too long"), "Should contain message");
    }
}
