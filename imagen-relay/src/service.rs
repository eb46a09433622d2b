//! Image service exposed to the RPC loop.
//!
//! This module provides the `generate_image` tool and the static server
//! descriptor returned by `get_info`.
//!
//! Tool failures are reported as text in the tool result rather than as RPC
//! errors: the calling agent reads tool output either way.

use std::sync::Arc;

use imagen_relay_common::config::Config;
use imagen_relay_common::error::Error;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, instrument, warn};

use crate::generator::{AspectRatio, ImageGenerator};
use crate::store::ArtifactStore;

/// Server name reported by `get_info`.
pub const SERVER_NAME: &str = "imagen-relay";

/// Name of the image generation tool.
pub const GENERATE_IMAGE_TOOL: &str = "generate_image";

/// Maximum prompt length in characters (Imagen 3 limit).
pub const MAX_PROMPT_LENGTH: usize = 480;

/// Parameters of the `generate_image` tool.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct GenerateImageParams {
    /// Text prompt describing the image to generate
    pub prompt: String,
    /// Aspect ratio (1:1, 3:4, 4:3, 9:16, 16:9); defaults to 1:1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub aspect_ratio: Option<Value>,
}

impl GenerateImageParams {
    /// Validate the parameters, resolving the aspect ratio.
    pub fn validate(&self) -> Result<Option<AspectRatio>, Error> {
        if self.prompt.trim().is_empty() {
            return Err(Error::validation("Prompt cannot be empty"));
        }

        let prompt_len = self.prompt.chars().count();
        if prompt_len > MAX_PROMPT_LENGTH {
            return Err(Error::validation(format!(
                "Prompt length {} exceeds maximum {}",
                prompt_len, MAX_PROMPT_LENGTH
            )));
        }

        // Any non-string value is reported like an unknown ratio
        self.aspect_ratio
            .as_ref()
            .map(|raw| match raw {
                Value::String(s) => s.parse::<AspectRatio>().map_err(|_| unsupported_ratio(s)),
                other => Err(unsupported_ratio(&other.to_string())),
            })
            .transpose()
    }
}

fn unsupported_ratio(raw: &str) -> Error {
    Error::validation(format!(
        "Unsupported aspect ratio '{}'. Supported values: {}",
        raw,
        AspectRatio::supported_values()
    ))
}

/// Capability flags advertised by the server.
#[derive(Debug, Clone, Serialize)]
pub struct Capabilities {
    /// Tools can be invoked over the RPC channel
    pub tools: bool,
    /// Generated images are exposed over HTTP
    pub resources: bool,
}

/// Description of a callable tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    /// Method name used to invoke the tool
    pub name: &'static str,
    /// Human-readable summary of what the tool does
    pub description: &'static str,
    /// JSON Schema of the tool's params
    pub input_schema: serde_json::Value,
}

/// Static server metadata returned by `get_info`.
#[derive(Debug, Clone, Serialize)]
pub struct ServerDescriptor {
    /// Server name
    pub name: &'static str,
    /// Crate version
    pub version: &'static str,
    /// Supported capabilities
    pub capabilities: Capabilities,
    /// Usage notes for the calling agent, including the image URL base
    pub instructions: String,
    /// Callable tools
    pub tools: Vec<ToolDescriptor>,
}

impl ServerDescriptor {
    fn new(public_base_url: &str) -> Self {
        let schema = schemars::schema_for!(GenerateImageParams);
        let input_schema = serde_json::to_value(&schema).unwrap_or_default();

        Self {
            name: SERVER_NAME,
            version: env!("CARGO_PKG_VERSION"),
            capabilities: Capabilities {
                tools: true,
                resources: true,
            },
            instructions: format!(
                "Text-to-image generation server. Call generate_image with a prompt and an \
                 optional aspect_ratio; the result is one image URL per line. Images are \
                 served from {}/images/ and listed at {}/list-images.",
                public_base_url, public_base_url
            ),
            tools: vec![ToolDescriptor {
                name: GENERATE_IMAGE_TOOL,
                description: "Generate an image from a text prompt using Google's Imagen API. \
                              Returns the URL of each generated PNG, one per line.",
                input_schema,
            }],
        }
    }
}

/// Image generation facade shared by the RPC loop.
#[derive(Clone)]
pub struct ImageService {
    generator: Arc<dyn ImageGenerator>,
    store: ArtifactStore,
    public_base_url: String,
    descriptor: Arc<ServerDescriptor>,
}

impl ImageService {
    /// Create a service over a generator and store.
    ///
    /// `public_base_url` is the externally reachable origin of the resource
    /// server, e.g. `http://127.0.0.1:9981`.
    pub fn new(
        generator: Arc<dyn ImageGenerator>,
        store: ArtifactStore,
        public_base_url: impl Into<String>,
    ) -> Self {
        let public_base_url = public_base_url.into();
        let descriptor = Arc::new(ServerDescriptor::new(&public_base_url));
        Self {
            generator,
            store,
            public_base_url,
            descriptor,
        }
    }

    /// Create a service from the resolved configuration.
    pub fn from_config(config: &Config, generator: Arc<dyn ImageGenerator>) -> Self {
        Self::new(
            generator,
            ArtifactStore::new(&config.images_dir),
            config.public_base_url(),
        )
    }

    /// Static server metadata.
    pub fn get_info(&self) -> &ServerDescriptor {
        &self.descriptor
    }

    /// The artifact store backing this service.
    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Public URL of a stored image.
    pub fn image_url(&self, filename: &str) -> String {
        format!("{}/images/{}", self.public_base_url, filename)
    }

    /// Generate images and return their URLs, one per line.
    ///
    /// Never fails: validation, provider and storage errors are returned as
    /// text starting with `Error`.
    #[instrument(level = "info", name = "generate_image", skip(self, params), fields(prompt_len = params.prompt.chars().count(), aspect_ratio = ?params.aspect_ratio))]
    pub async fn generate_image(&self, params: GenerateImageParams) -> String {
        let aspect_ratio = match params.validate() {
            Ok(ratio) => ratio,
            Err(Error::Validation(message)) => {
                warn!(%message, "Rejected generate_image arguments");
                return format!("Error: {}", message);
            }
            Err(e) => return format!("Error: {}", e),
        };

        match self.generate_and_store(&params.prompt, aspect_ratio).await {
            Ok(filenames) => {
                info!(count = filenames.len(), "Image generation completed");
                filenames
                    .iter()
                    .map(|name| self.image_url(name))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            Err(e) => {
                let status = match &e {
                    Error::Generation(g) => g.status(),
                    _ => None,
                };
                error!(error = %e, status = ?status, "Image generation failed");
                format!("Error generating image: {}", e)
            }
        }
    }

    async fn generate_and_store(
        &self,
        prompt: &str,
        aspect_ratio: Option<AspectRatio>,
    ) -> Result<Vec<String>, Error> {
        let images = self.generator.generate(prompt, aspect_ratio).await?;
        let filenames = self.store.persist(&images).await?;
        Ok(filenames)
    }
}
