//! Configuration module for loading environment variables and settings.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Application name used for the platform data directory.
pub const APP_NAME: &str = "imagen-relay";

/// Default provider base URL.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default Imagen model.
pub const DEFAULT_MODEL: &str = "imagen-3.0-generate-002";

/// Default HTTP port for the image resource server.
pub const DEFAULT_PORT: u16 = 9981;

/// Default listen address for the image resource server.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1";

/// Default host advertised in image URLs.
pub const DEFAULT_ADVERTISED_HOST: &str = "127.0.0.1";

/// Default log level when neither `RUST_LOG` nor `LOG_LEVEL` is set.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "IMAGEN_RELAY_DATA_DIR";

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Provider API key (required)
    pub api_key: String,
    /// Provider base URL
    pub base_url: String,
    /// Imagen model identifier
    pub model: String,
    /// Root data directory
    pub data_dir: PathBuf,
    /// Resource root served over HTTP (`<data_dir>/artifacts`)
    pub resource_root: PathBuf,
    /// Directory holding generated images (`<resource_root>/images`)
    pub images_dir: PathBuf,
    /// Directory for log files (`<data_dir>/logs`)
    pub log_dir: PathBuf,
    /// Address the HTTP server binds to
    pub listen_addr: String,
    /// HTTP server port
    pub port: u16,
    /// Host embedded in generated image URLs
    pub advertised_host: String,
    /// Default log level
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables and .env file.
    ///
    /// `data_dir` overrides the platform application-data directory when set.
    ///
    /// # Errors
    /// Returns `ConfigError::MissingEnvVar` if GEMINI_API_KEY is not set and
    /// `ConfigError::InvalidValue` if PORT is not a valid port number.
    pub fn from_env(data_dir: Option<PathBuf>) -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| std::env::var(key).ok(), data_dir)
    }

    /// Resolve configuration from an arbitrary variable lookup.
    ///
    /// This is the logic behind [`Config::from_env`], usable without touching
    /// the process environment.
    pub fn from_lookup<F>(lookup: F, data_dir: Option<PathBuf>) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = var("GEMINI_API_KEY")
            .ok_or_else(|| ConfigError::missing_env_var("GEMINI_API_KEY"))?;

        let base_url = var("GEMINI_BASE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let model = var("IMAGEN_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let port = match var("PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|e| ConfigError::invalid_value("PORT", format!("'{}' ({})", raw, e)))?,
            None => DEFAULT_PORT,
        };

        let listen_addr = var("LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
        let advertised_host =
            var("RESOURCE_HOST").unwrap_or_else(|| DEFAULT_ADVERTISED_HOST.to_string());
        let log_level = var("LOG_LEVEL").unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        let data_dir = match data_dir.or_else(|| var(DATA_DIR_ENV).map(PathBuf::from)) {
            Some(dir) => dir,
            None => platform_data_dir(&var).ok_or(ConfigError::NoDataDir)?,
        };
        let resource_root = data_dir.join("artifacts");
        let images_dir = resource_root.join("images");
        let log_dir = data_dir.join("logs");

        Ok(Self {
            api_key,
            base_url,
            model,
            data_dir,
            resource_root,
            images_dir,
            log_dir,
            listen_addr,
            port,
            advertised_host,
            log_level,
        })
    }

    /// Create the resource, image and log directories.
    ///
    /// Existing directories are fine; any other failure is returned.
    pub fn ensure_dirs(&self) -> Result<(), ConfigError> {
        for dir in [&self.resource_root, &self.images_dir, &self.log_dir] {
            create_dir(dir)?;
        }
        Ok(())
    }

    /// Get the provider predict endpoint for the configured model.
    pub fn predict_endpoint(&self) -> String {
        format!("{}/models/{}:predict", self.base_url, self.model)
    }

    /// Base URL under which the resource server is reachable externally.
    pub fn public_base_url(&self) -> String {
        format!("http://{}:{}", self.advertised_host, self.port)
    }
}

fn create_dir(dir: &Path) -> Result<(), ConfigError> {
    std::fs::create_dir_all(dir).map_err(|source| ConfigError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })
}

/// Per-application data directory following platform conventions.
fn platform_data_dir(var: &dyn Fn(&str) -> Option<String>) -> Option<PathBuf> {
    let base = if cfg!(windows) {
        var("APPDATA").map(PathBuf::from)
    } else if cfg!(target_os = "macos") {
        var("HOME").map(|home| PathBuf::from(home).join("Library").join("Application Support"))
    } else {
        var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| var("HOME").map(|home| PathBuf::from(home).join(".local").join("share")))
    }?;

    Some(base.join(APP_NAME))
}
