//! Image generation client for the Imagen `:predict` API.
//!
//! This module provides the [`ImageGenerator`] seam used by the image service
//! and [`ImagenClient`], its production implementation over `reqwest`.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use imagen_relay_common::config::Config;
use imagen_relay_common::error::GenerationError;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

/// Number of images requested per call.
pub const SAMPLE_COUNT: u8 = 1;

/// Aspect ratios accepted by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "3:4")]
    Portrait,
    #[serde(rename = "4:3")]
    Landscape,
    #[serde(rename = "9:16")]
    Tall,
    #[serde(rename = "16:9")]
    Wide,
}

impl AspectRatio {
    /// All supported ratios, in the order they are documented.
    pub const ALL: [AspectRatio; 5] = [
        AspectRatio::Square,
        AspectRatio::Portrait,
        AspectRatio::Landscape,
        AspectRatio::Tall,
        AspectRatio::Wide,
    ];

    /// Wire representation, e.g. `"16:9"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait => "3:4",
            AspectRatio::Landscape => "4:3",
            AspectRatio::Tall => "9:16",
            AspectRatio::Wide => "16:9",
        }
    }

    /// Comma-separated list of every supported value.
    pub fn supported_values() -> String {
        Self::ALL.iter().map(|r| r.as_str()).collect::<Vec<_>>().join(", ")
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string is not one of the supported aspect ratios.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedAspectRatio(pub String);

impl FromStr for AspectRatio {
    type Err = UnsupportedAspectRatio;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| UnsupportedAspectRatio(s.to_string()))
    }
}

/// Source of generated image bytes.
///
/// Implementations return fully decoded payloads: either every prediction
/// decodes or the call fails and nothing is returned.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Generate images for a validated prompt.
    async fn generate(
        &self,
        prompt: &str,
        aspect_ratio: Option<AspectRatio>,
    ) -> Result<Vec<Vec<u8>>, GenerationError>;
}

/// Imagen `:predict` client authenticated with an API key.
#[derive(Clone)]
pub struct ImagenClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl ImagenClient {
    /// Create a client for the endpoint and key in `config`.
    pub fn new(config: &Config) -> Self {
        Self::with_http(reqwest::Client::new(), config.predict_endpoint(), config.api_key.clone())
    }

    /// Create a client with an explicit HTTP client and endpoint.
    pub fn with_http(
        http: reqwest::Client,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    /// Build the provider request body.
    pub fn build_request(prompt: &str, aspect_ratio: Option<AspectRatio>) -> ImagenRequest {
        ImagenRequest {
            instances: vec![ImagenInstance {
                prompt: prompt.to_string(),
            }],
            parameters: ImagenParameters {
                sample_count: SAMPLE_COUNT,
                aspect_ratio,
            },
        }
    }
}

#[async_trait]
impl ImageGenerator for ImagenClient {
    #[instrument(level = "info", name = "imagen_predict", skip(self, prompt), fields(prompt_len = prompt.chars().count(), aspect_ratio = ?aspect_ratio))]
    async fn generate(
        &self,
        prompt: &str,
        aspect_ratio: Option<AspectRatio>,
    ) -> Result<Vec<Vec<u8>>, GenerationError> {
        let request = Self::build_request(prompt, aspect_ratio);

        debug!(endpoint = %self.endpoint, "Calling Imagen API");

        let response = self
            .http
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerationError::Transport {
                endpoint: self.endpoint.clone(),
                message: e.without_url().to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| GenerationError::Transport {
            endpoint: self.endpoint.clone(),
            message: format!("Failed to read response body: {}", e.without_url()),
        })?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "Imagen API returned an error status");
            return Err(GenerationError::ProviderHttp {
                status: status.as_u16(),
                body,
            });
        }

        let images = decode_response(&body)?;
        info!(count = images.len(), "Received images from API");
        Ok(images)
    }
}

/// Interpret a successful provider body and decode every image payload.
pub fn decode_response(body: &str) -> Result<Vec<Vec<u8>>, GenerationError> {
    let api_response: ImagenResponse =
        serde_json::from_str(body).map_err(|e| GenerationError::ProviderDecode {
            message: e.to_string(),
            body: body.to_string(),
        })?;

    if let Some(error) = api_response.error {
        return Err(GenerationError::ProviderApi(error.message));
    }

    // Safety-filtered predictions carry no payload
    let payloads: Vec<String> = api_response
        .predictions
        .into_iter()
        .filter_map(|p| p.bytes_base64_encoded)
        .collect();

    if payloads.is_empty() {
        return Err(GenerationError::NoImagesGenerated);
    }

    payloads
        .iter()
        .enumerate()
        .map(|(index, data)| {
            BASE64
                .decode(data)
                .map_err(|e| GenerationError::PayloadDecode {
                    index,
                    message: e.to_string(),
                })
        })
        .collect()
}

// =============================================================================
// API Request/Response Types
// =============================================================================

/// Imagen `:predict` request.
#[derive(Debug, Serialize)]
pub struct ImagenRequest {
    /// Input instances (prompts)
    pub instances: Vec<ImagenInstance>,
    /// Generation parameters
    pub parameters: ImagenParameters,
}

/// Imagen API instance (prompt).
#[derive(Debug, Serialize)]
pub struct ImagenInstance {
    /// Text prompt describing the image
    pub prompt: String,
}

/// Imagen API parameters.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagenParameters {
    /// Number of images to generate
    pub sample_count: u8,
    /// Aspect ratio; the provider defaults to 1:1 when omitted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<AspectRatio>,
}

/// Imagen `:predict` response.
#[derive(Debug, Default, Deserialize)]
pub struct ImagenResponse {
    /// Generated image predictions
    #[serde(default)]
    pub predictions: Vec<ImagenPrediction>,
    /// Error payload
    #[serde(default)]
    pub error: Option<ImagenApiError>,
}

/// Imagen API prediction (generated image).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagenPrediction {
    /// Base64-encoded image data
    pub bytes_base64_encoded: Option<String>,
}

/// Error object embedded in a provider response.
#[derive(Debug, Deserialize)]
pub struct ImagenApiError {
    /// Human-readable message
    #[serde(default)]
    pub message: String,
}
