//! Service and engine configuration
//!
//! Settings are read from the process environment (optionally seeded from a
//! `.env` file). Lookups go through a closure so tests can supply their own
//! variables without touching the real environment.

use crate::{
    error::{ClearCutError, Result},
    models::{ModelSource, ModelSpec},
};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default upload size limit (10 MiB)
pub const DEFAULT_MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

/// Default extension allow-list
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// Default directory for transient files
pub const DEFAULT_TEMP_DIR: &str = "/tmp/clearcut";

/// Inputs larger than this on either side are downscaled before inference
pub const MAX_PROCESSING_DIMENSION: u32 = 2048;

/// Total timeout for fetching an image from a URL
pub const URL_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the background removal engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Which model to load and where to find it
    pub model_spec: ModelSpec,

    /// Number of intra-op threads for inference
    pub intra_threads: usize,

    /// Number of inter-op threads for inference
    pub inter_threads: usize,

    /// Longest side processed at full resolution
    pub max_dimension: u32,

    /// Deadline for one removal job (None = wait indefinitely)
    pub inference_timeout: Option<Duration>,

    /// Apply the distance-transform edge boost after refinement
    pub enhance_edges: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_spec: ModelSpec::default(),
            // Tuned for a small (2 core) host
            intra_threads: 2,
            inter_threads: 1,
            max_dimension: MAX_PROCESSING_DIMENSION,
            inference_timeout: Some(Duration::from_secs(120)),
            enhance_edges: false,
        }
    }
}

impl EngineConfig {
    /// Create a new engine configuration builder
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    /// Validate the configuration
    ///
    /// # Errors
    /// - Thread counts outside 1-256
    /// - Zero processing dimension
    pub fn validate(&self) -> Result<()> {
        if self.intra_threads == 0 || self.intra_threads > 256 {
            return Err(ClearCutError::config_value_error(
                "intra_threads",
                self.intra_threads,
                "1-256",
            ));
        }
        if self.inter_threads == 0 || self.inter_threads > 256 {
            return Err(ClearCutError::config_value_error(
                "inter_threads",
                self.inter_threads,
                "1-256",
            ));
        }
        if self.max_dimension == 0 {
            return Err(ClearCutError::config_value_error(
                "max_dimension",
                self.max_dimension,
                ">= 1",
            ));
        }
        Ok(())
    }
}

/// Builder for `EngineConfig`
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn model_spec(mut self, model_spec: ModelSpec) -> Self {
        self.config.model_spec = model_spec;
        self
    }

    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self
    }

    #[must_use]
    pub fn inter_threads(mut self, threads: usize) -> Self {
        self.config.inter_threads = threads;
        self
    }

    #[must_use]
    pub fn max_dimension(mut self, max_dimension: u32) -> Self {
        self.config.max_dimension = max_dimension;
        self
    }

    #[must_use]
    pub fn inference_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.inference_timeout = timeout;
        self
    }

    #[must_use]
    pub fn enhance_edges(mut self, enabled: bool) -> Self {
        self.config.enhance_edges = enabled;
        self
    }

    /// Build the engine configuration
    ///
    /// # Errors
    /// - Configuration validation failures
    pub fn build(self) -> Result<EngineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Top-level service configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Maximum accepted input size in bytes
    pub max_file_size: usize,
    /// Lowercased extensions accepted for input files
    pub allowed_extensions: Vec<String>,
    pub temp_dir: PathBuf,
    pub static_dir: PathBuf,
    /// How often the temp directory is swept
    pub cleanup_interval: Duration,
    /// Files older than this are removed by the sweep
    pub temp_max_age: Duration,
    pub engine: EngineConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(ToString::to_string)
                .collect(),
            temp_dir: PathBuf::from(DEFAULT_TEMP_DIR),
            static_dir: PathBuf::from("static"),
            cleanup_interval: Duration::from_secs(600),
            temp_max_age: Duration::from_secs(3600),
            engine: EngineConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment
    ///
    /// # Errors
    /// - A variable is present but cannot be parsed
    /// - Resulting engine configuration is invalid
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    ///
    /// # Errors
    /// - A variable is present but cannot be parsed
    /// - Resulting engine configuration is invalid
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let engine_defaults = EngineConfig::default();

        let allowed_extensions = match lookup("ALLOWED_EXTENSIONS") {
            Some(raw) => parse_extension_list(&raw),
            None => defaults.allowed_extensions,
        };

        let model_source = match lookup("MODEL_PATH") {
            Some(path) if !path.trim().is_empty() => ModelSource::External(PathBuf::from(path)),
            _ => ModelSource::Downloaded {
                cache_dir: lookup("MODEL_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(ModelSpec::default_cache_dir),
                url: lookup("MODEL_URL")
                    .unwrap_or_else(|| crate::models::U2NET_DEFAULT_URL.to_string()),
            },
        };

        let inference_timeout = match parse_var::<u64, _>(&lookup, "INFERENCE_TIMEOUT_SECS")? {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => engine_defaults.inference_timeout,
        };

        let engine = EngineConfig::builder()
            .model_spec(ModelSpec::u2net(model_source))
            .intra_threads(
                parse_var(&lookup, "INTRA_THREADS")?.unwrap_or(engine_defaults.intra_threads),
            )
            .inter_threads(
                parse_var(&lookup, "INTER_THREADS")?.unwrap_or(engine_defaults.inter_threads),
            )
            .inference_timeout(inference_timeout)
            .enhance_edges(parse_var(&lookup, "ENHANCE_EDGES")?.unwrap_or(false))
            .build()?;

        Ok(Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_var(&lookup, "PORT")?.unwrap_or(defaults.port),
            max_file_size: parse_var(&lookup, "MAX_FILE_SIZE")?.unwrap_or(defaults.max_file_size),
            allowed_extensions,
            temp_dir: lookup("TEMP_DIR").map_or(defaults.temp_dir, PathBuf::from),
            static_dir: lookup("STATIC_DIR").map_or(defaults.static_dir, PathBuf::from),
            cleanup_interval: parse_var(&lookup, "CLEANUP_INTERVAL_SECS")?
                .map_or(defaults.cleanup_interval, Duration::from_secs),
            temp_max_age: parse_var(&lookup, "TEMP_MAX_AGE_SECS")?
                .map_or(defaults.temp_max_age, Duration::from_secs),
            engine,
        })
    }

    /// Socket address string for the listener
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Split a comma-separated extension list, dropping blanks and leading dots
fn parse_extension_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_start_matches('.').to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            ClearCutError::invalid_config(format!("{} has invalid value '{}': {}", key, raw, e))
        }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = AppConfig::from_lookup(lookup_from(&[])).unwrap();

        assert_eq!(config.max_file_size, 10 * 1024 * 1024);
        assert_eq!(config.allowed_extensions, vec!["jpg", "jpeg", "png", "webp"]);
        assert_eq!(config.temp_dir, PathBuf::from("/tmp/clearcut"));
        assert_eq!(config.port, 8000);
        assert_eq!(config.engine.intra_threads, 2);
        assert_eq!(config.engine.inter_threads, 1);
        assert_eq!(config.engine.max_dimension, 2048);
        assert!(!config.engine.enhance_edges);
        assert!(matches!(
            config.engine.model_spec.source,
            ModelSource::Downloaded { .. }
        ));
    }

    #[test]
    fn test_environment_overrides() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("MAX_FILE_SIZE", "2048"),
            ("ALLOWED_EXTENSIONS", "PNG, .jpg,,"),
            ("TEMP_DIR", "/var/tmp/cc"),
            ("MODEL_PATH", "/models/u2net.onnx"),
            ("INFERENCE_TIMEOUT_SECS", "0"),
            ("ENHANCE_EDGES", "true"),
            ("PORT", "9000"),
        ]))
        .unwrap();

        assert_eq!(config.max_file_size, 2048);
        assert_eq!(config.allowed_extensions, vec!["png", "jpg"]);
        assert_eq!(config.temp_dir, PathBuf::from("/var/tmp/cc"));
        assert_eq!(config.bind_address(), "0.0.0.0:9000");
        assert_eq!(config.engine.inference_timeout, None);
        assert!(config.engine.enhance_edges);
        assert_eq!(
            config.engine.model_spec.source,
            ModelSource::External(PathBuf::from("/models/u2net.onnx"))
        );
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        let err = AppConfig::from_lookup(lookup_from(&[("MAX_FILE_SIZE", "ten")])).unwrap_err();
        assert!(matches!(err, ClearCutError::InvalidConfig(_)));
        assert!(err.to_string().contains("MAX_FILE_SIZE"));

        let err = AppConfig::from_lookup(lookup_from(&[("INTRA_THREADS", "0")])).unwrap_err();
        assert!(err.to_string().contains("intra_threads"));
    }

    #[test]
    fn test_engine_builder_chain() {
        let config = EngineConfig::builder()
            .intra_threads(4)
            .inter_threads(2)
            .max_dimension(512)
            .inference_timeout(None)
            .build()
            .unwrap();

        assert_eq!(config.intra_threads, 4);
        assert_eq!(config.inter_threads, 2);
        assert_eq!(config.max_dimension, 512);
        assert!(config.inference_timeout.is_none());

        assert!(EngineConfig::builder().max_dimension(0).build().is_err());
    }
}
