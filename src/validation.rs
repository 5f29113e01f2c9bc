//! Input image validation
//!
//! Checks run in a fixed order and the first failure wins: size, extension,
//! sniffed MIME type, then a header-only decode to prove the image is
//! structurally readable.

use image::ImageReader;
use std::io::Cursor;

/// Reasons an input is rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("File too large: {size} bytes (max: {max} bytes)")]
    FileTooLarge { size: usize, max: usize },

    #[error("Invalid file extension: {extension} (allowed: {allowed:?})")]
    InvalidExtension {
        extension: String,
        allowed: Vec<String>,
    },

    #[error("Content is not an image (detected: {detected})")]
    NotAnImage { detected: String },

    #[error("Image cannot be decoded: {0}")]
    Undecodable(String),
}

/// Image file validator
#[derive(Debug, Clone)]
pub struct ImageValidator {
    max_file_size: usize,
    allowed_extensions: Vec<String>,
}

impl ImageValidator {
    /// `allowed_extensions` are compared case-insensitively, without dots
    pub fn new(max_file_size: usize, allowed_extensions: Vec<String>) -> Self {
        Self {
            max_file_size,
            allowed_extensions: allowed_extensions
                .into_iter()
                .map(|e| e.to_lowercase())
                .collect(),
        }
    }

    /// Validate bytes and filename, reporting the first violated rule
    pub fn validate(&self, bytes: &[u8], filename: &str) -> Result<(), ValidationError> {
        self.validate_file_size(bytes.len())?;
        self.validate_extension(filename)?;
        Self::validate_mime(bytes)?;
        Self::validate_decodable(bytes)
    }

    /// Whether the input passes every check
    pub fn is_valid(&self, bytes: &[u8], filename: &str) -> bool {
        match self.validate(bytes, filename) {
            Ok(()) => true,
            Err(reason) => {
                tracing::debug!(filename, %reason, "Rejected input image");
                false
            },
        }
    }

    fn validate_file_size(&self, size: usize) -> Result<(), ValidationError> {
        if size > self.max_file_size {
            return Err(ValidationError::FileTooLarge {
                size,
                max: self.max_file_size,
            });
        }
        Ok(())
    }

    /// Extension is the text after the last `.` (the whole name if none)
    fn validate_extension(&self, filename: &str) -> Result<(), ValidationError> {
        let extension = filename
            .rsplit('.')
            .next()
            .unwrap_or_default()
            .to_lowercase();

        if !self.allowed_extensions.contains(&extension) {
            return Err(ValidationError::InvalidExtension {
                extension,
                allowed: self.allowed_extensions.clone(),
            });
        }
        Ok(())
    }

    /// Sniff the content type from magic bytes, ignoring the filename
    fn validate_mime(bytes: &[u8]) -> Result<(), ValidationError> {
        let format = image::guess_format(bytes).map_err(|_| ValidationError::NotAnImage {
            detected: "unknown".to_string(),
        })?;
        let mime = format.to_mime_type();
        if !mime.starts_with("image/") {
            return Err(ValidationError::NotAnImage {
                detected: mime.to_string(),
            });
        }
        Ok(())
    }

    fn validate_decodable(bytes: &[u8]) -> Result<(), ValidationError> {
        ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| ValidationError::Undecodable(e.to_string()))?
            .into_dimensions()
            .map(|_| ())
            .map_err(|e| ValidationError::Undecodable(e.to_string()))
    }
}
