//! Model specification and management
//!
//! The service runs a single fixed segmentation model (U²-Net). A model is
//! either an explicit file on disk or a cached download; `ModelManager`
//! resolves a `ModelSpec` to a file, fetching it first when needed, and exposes
//! the metadata the preprocessing step needs.

use crate::download::ModelDownloader;
use crate::error::{ClearCutError, Result};
use std::path::{Path, PathBuf};

/// Identifier of the bundled model family
pub const U2NET_MODEL_NAME: &str = "u2net";

/// Public release asset the model is fetched from when not cached
pub const U2NET_DEFAULT_URL: &str =
    "https://github.com/danielgatis/rembg/releases/download/v0.0.0/u2net.onnx";

/// Model source specification
#[derive(Debug, Clone, PartialEq)]
pub enum ModelSource {
    /// External model from filesystem path
    External(PathBuf),
    /// Model kept in a cache directory, downloaded from `url` on first use
    Downloaded { cache_dir: PathBuf, url: String },
}

impl ModelSource {
    /// Get a display name for tracing and logging
    pub fn display_name(&self) -> String {
        match self {
            ModelSource::External(path) => {
                format!(
                    "external:{}",
                    path.file_name().unwrap_or_default().to_string_lossy()
                )
            },
            ModelSource::Downloaded { cache_dir, .. } => {
                format!("cached:{}", cache_dir.display())
            },
        }
    }
}

/// Complete model specification
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    pub name: String,
    pub source: ModelSource,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self::u2net(ModelSource::Downloaded {
            cache_dir: Self::default_cache_dir(),
            url: U2NET_DEFAULT_URL.to_string(),
        })
    }
}

impl ModelSpec {
    /// U²-Net loaded from the given source
    #[must_use]
    pub fn u2net(source: ModelSource) -> Self {
        Self {
            name: U2NET_MODEL_NAME.to_string(),
            source,
        }
    }

    /// `~/.u2net`, or a relative `.u2net` when no home directory is known
    #[must_use]
    pub fn default_cache_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".u2net")
    }

    /// Path the model file is expected at
    #[must_use]
    pub fn model_path(&self) -> PathBuf {
        match &self.source {
            ModelSource::External(path) => path.clone(),
            ModelSource::Downloaded { cache_dir, .. } => {
                cache_dir.join(format!("{}.onnx", self.name))
            },
        }
    }
}

/// Model file metadata logged when a session is created
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfo {
    pub name: String,
    pub size_bytes: usize,
}

/// Preprocessing parameters of a model
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessingConfig {
    /// Width and height the input is resized to
    pub target_size: [u32; 2],
    pub normalization_mean: [f32; 3],
    pub normalization_std: [f32; 3],
}

impl PreprocessingConfig {
    /// Parameters U²-Net was trained with
    #[must_use]
    pub fn u2net() -> Self {
        Self {
            target_size: [320, 320],
            normalization_mean: [0.485, 0.456, 0.406],
            normalization_std: [0.229, 0.224, 0.225],
        }
    }
}

/// Resolves a `ModelSpec` to a model file on disk and serves its metadata
#[derive(Debug, Clone)]
pub struct ModelManager {
    spec: ModelSpec,
    path: PathBuf,
}

impl ModelManager {
    /// Resolve a `ModelSpec`, downloading the model if it is not cached yet
    ///
    /// # Errors
    /// - External model path does not exist
    /// - Download failures
    pub async fn prepare(spec: &ModelSpec) -> Result<Self> {
        let path = spec.model_path();
        match &spec.source {
            ModelSource::External(_) => {
                if !path.is_file() {
                    return Err(ClearCutError::model(format!(
                        "Model file not found at '{}'",
                        path.display()
                    )));
                }
            },
            ModelSource::Downloaded { url, .. } => {
                if path.is_file() {
                    tracing::debug!(path = %path.display(), "Using cached model");
                } else {
                    tracing::info!(url = %url, path = %path.display(), "Model not cached, downloading");
                    ModelDownloader::new()?.download_model(url, &path).await?;
                }
            },
        }

        Ok(Self {
            spec: spec.clone(),
            path,
        })
    }

    /// Manager for a model file that is already present
    ///
    /// # Errors
    /// - File does not exist
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(ClearCutError::model(format!(
                "Model file not found at '{}'",
                path.display()
            )));
        }
        Ok(Self {
            spec: ModelSpec::u2net(ModelSource::External(path.clone())),
            path,
        })
    }

    /// Read the model bytes
    ///
    /// # Errors
    /// - File I/O errors
    pub fn load_model(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.path)
            .map_err(|e| ClearCutError::file_io_error("read model file", &self.path, &e))
    }

    /// Model metadata
    ///
    /// # Errors
    /// - Model file metadata cannot be read
    pub fn get_info(&self) -> Result<ModelInfo> {
        let size_bytes = std::fs::metadata(&self.path)
            .map_err(|e| ClearCutError::file_io_error("stat model file", &self.path, &e))?
            .len() as usize;
        Ok(ModelInfo {
            name: self.spec.name.clone(),
            size_bytes,
        })
    }

    /// Preprocessing parameters for this model
    #[must_use]
    pub fn get_preprocessing_config(&self) -> PreprocessingConfig {
        PreprocessingConfig::u2net()
    }

    /// Location of the model file
    #[must_use]
    pub fn model_path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_model_path_resolution() {
        let spec = ModelSpec::u2net(ModelSource::Downloaded {
            cache_dir: PathBuf::from("/cache"),
            url: U2NET_DEFAULT_URL.to_string(),
        });
        assert_eq!(spec.model_path(), PathBuf::from("/cache/u2net.onnx"));

        let spec = ModelSpec::u2net(ModelSource::External(PathBuf::from("/m/custom.onnx")));
        assert_eq!(spec.model_path(), PathBuf::from("/m/custom.onnx"));
        assert_eq!(spec.source.display_name(), "external:custom.onnx");
    }

    #[tokio::test]
    async fn test_prepare_missing_external_model_fails() {
        let spec = ModelSpec::u2net(ModelSource::External(PathBuf::from(
            "/definitely/not/here.onnx",
        )));
        let err = ModelManager::prepare(&spec).await.unwrap_err();
        assert!(matches!(err, ClearCutError::Model(_)));
    }

    #[tokio::test]
    async fn test_prepare_uses_cached_model_without_download() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("u2net.onnx"), b"fake-model").unwrap();

        let spec = ModelSpec::u2net(ModelSource::Downloaded {
            cache_dir: dir.path().to_path_buf(),
            // Unroutable; a download attempt would fail the test
            url: "http://127.0.0.1:9/u2net.onnx".to_string(),
        });
        let manager = ModelManager::prepare(&spec).await.unwrap();

        assert_eq!(manager.load_model().unwrap(), b"fake-model");
        let info = manager.get_info().unwrap();
        assert_eq!(info.name, "u2net");
        assert_eq!(info.size_bytes, 10);
    }
}
