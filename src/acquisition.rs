//! Image acquisition from uploads or remote URLs

use crate::config::URL_FETCH_TIMEOUT;
use crate::error::{ClearCutError, Result};
use crate::types::SourceImage;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;

/// Filename used when a URL path has no last segment
const DEFAULT_URL_FILENAME: &str = "image.jpg";

/// A file part received in a multipart request
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Client-supplied filename, if the part carried one
    pub filename: Option<String>,
    pub bytes: Bytes,
}

/// Fetches image bytes from a URL
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Download `url`, returning its bytes and a derived filename
    ///
    /// # Errors
    /// - Malformed URL, transport failure or non-200 status, all as
    ///   `ClearCutError::Acquisition`
    async fn fetch(&self, url: &str) -> Result<SourceImage>;
}

/// `ImageFetcher` backed by a shared reqwest client
///
/// Bodies are streamed and abandoned as soon as they exceed `max_bytes`.
#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    client: Client,
    max_bytes: usize,
}

impl HttpImageFetcher {
    /// Client with the standard total request timeout
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new(max_bytes: usize) -> Result<Self> {
        Self::with_timeout(URL_FETCH_TIMEOUT, max_bytes)
    }

    /// # Errors
    /// - Failed to create HTTP client
    pub fn with_timeout(timeout: Duration, max_bytes: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClearCutError::internal(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client, max_bytes })
    }

    fn too_large(&self) -> ClearCutError {
        ClearCutError::acquisition(format!(
            "Image exceeds the maximum size of {} bytes",
            self.max_bytes
        ))
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    #[tracing::instrument(skip(self))]
    async fn fetch(&self, url: &str) -> Result<SourceImage> {
        let parsed = parse_image_url(url)?;
        let filename = filename_from_url(&parsed);

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| ClearCutError::acquisition(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(ClearCutError::acquisition(format!(
                "HTTP {}",
                status.as_u16()
            )));
        }

        if response
            .content_length()
            .is_some_and(|declared| declared > self.max_bytes as u64)
        {
            return Err(self.too_large());
        }

        let mut body = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ClearCutError::acquisition(e.to_string()))?;
            if body.len() + chunk.len() > self.max_bytes {
                return Err(self.too_large());
            }
            body.extend_from_slice(&chunk);
        }

        tracing::debug!(size = body.len(), %filename, "Fetched remote image");
        Ok(SourceImage::new(body.freeze(), filename))
    }
}

/// Resolve the request's input to a single image
///
/// An uploaded file wins over a URL. A part with neither a filename nor any
/// content is treated as absent, since browsers send one for an empty file
/// input.
///
/// # Errors
/// - `MissingInput` when neither input is usable
/// - `Validation` when a file part has no filename
/// - `Acquisition` when fetching the URL fails
pub async fn acquire(
    file: Option<UploadedFile>,
    url: Option<String>,
    fetcher: &dyn ImageFetcher,
) -> Result<SourceImage> {
    let url = url.filter(|u| !u.trim().is_empty());
    let file = file.filter(|f| {
        let unnamed = f.filename.as_deref().map_or(true, str::is_empty);
        !(unnamed && f.bytes.is_empty())
    });

    match (file, url) {
        (Some(file), _) => match file.filename.filter(|name| !name.is_empty()) {
            Some(filename) => Ok(SourceImage::new(file.bytes, filename)),
            None => Err(ClearCutError::validation("No filename provided")),
        },
        (None, Some(url)) => fetcher.fetch(url.trim()).await,
        (None, None) => Err(ClearCutError::MissingInput),
    }
}

/// Parse a URL, requiring both a scheme and a host
fn parse_image_url(url: &str) -> Result<Url> {
    let parsed =
        Url::parse(url).map_err(|e| ClearCutError::acquisition(format!("Invalid URL: {e}")))?;
    if parsed.scheme().is_empty() || parsed.host_str().map_or(true, str::is_empty) {
        return Err(ClearCutError::acquisition("Invalid URL"));
    }
    Ok(parsed)
}

/// Last path segment, `image.jpg` if empty, `.jpg` appended if it has no dot
fn filename_from_url(url: &Url) -> String {
    let last = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();

    if last.is_empty() {
        DEFAULT_URL_FILENAME.to_string()
    } else if last.contains('.') {
        last.to_string()
    } else {
        format!("{last}.jpg")
    }
}
