//! Web page content fetching.

use crate::error::SearchError;
use crate::search::{http_client, map_reqwest_error, status_error};

use async_trait::async_trait;
use std::time::Duration;

/// Maximum response body size accepted by [`HttpFetcher`] (5 MB)
pub const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

/// Line width used when rendering HTML to text
const TEXT_WIDTH: usize = 120;

/// Retrieves readable text for a URL
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Fetch `url` and return its textual content.
    async fn fetch(&self, url: &str) -> Result<String, SearchError>;
}

/// Plain HTTP GET fetcher with HTML-to-text conversion
pub struct HttpFetcher {
    http: reqwest::Client,
    timeout: Duration,
    max_bytes: usize,
}

impl std::fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("timeout", &self.timeout)
            .field("max_bytes", &self.max_bytes)
            .finish()
    }
}

impl HttpFetcher {
    /// Create a fetcher with the given per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self, SearchError> {
        Ok(Self {
            http: http_client(timeout)?,
            timeout,
            max_bytes: MAX_BODY_BYTES,
        })
    }

    /// Override the body size cap.
    #[must_use]
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }
}

/// Convert a response body to plain text based on its content type.
fn body_to_text(body: &[u8], content_type: &str) -> String {
    let text = if content_type.contains("html") {
        html2text::from_read(body, TEXT_WIDTH)
    } else {
        String::from_utf8_lossy(body).into_owned()
    };
    text.trim().to_string()
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, SearchError> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(SearchError::InvalidInput(format!(
                "Unsupported URL scheme: {}",
                url
            )));
        }
        log::debug!("Fetching {}", url);

        let mut response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status.as_u16(), url));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_lowercase();

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| map_reqwest_error(e, self.timeout))?
        {
            let remaining = self.max_bytes.saturating_sub(body.len());
            if chunk.len() >= remaining {
                body.extend_from_slice(&chunk[..remaining]);
                log::debug!("Body of {} exceeded {} bytes, truncating", url, self.max_bytes);
                break;
            }
            body.extend_from_slice(&chunk);
        }

        Ok(body_to_text(&body, &content_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_to_text_strips_markup() {
        let html = b"<html><body><h1>Title</h1><p>Hello <b>world</b></p></body></html>";
        let text = body_to_text(html, "text/html; charset=utf-8");
        assert!(text.contains("Title"));
        assert!(text.contains("Hello"));
        assert!(!text.contains("<p>"));
    }

    #[test]
    fn test_body_to_text_plain_passthrough() {
        let text = body_to_text(b"  plain <not a tag>  ", "text/plain");
        assert_eq!(text, "plain <not a tag>");
    }

    #[tokio::test]
    async fn test_rejects_non_http_scheme() {
        let fetcher = HttpFetcher::new(Duration::from_secs(1)).unwrap();
        let result = fetcher.fetch("file:///etc/passwd").await;
        assert!(matches!(result, Err(SearchError::InvalidInput(_))));
    }
}
