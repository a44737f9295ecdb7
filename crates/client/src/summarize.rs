//! Optional content summarization.
//!
//! A [`Summarizer`] turns a file name and the first bytes of its content
//! into a short description that rides along in `file-start`. Failures are
//! never fatal: the file is sent without a description.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;

use crate::config::SummarizeConfig;

/// Produces a description of a file from its name and leading bytes.
pub trait Summarizer: Send + Sync {
    fn summarize<'a>(
        &'a self,
        name: &'a str,
        prefix: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>>;
}

#[derive(Debug, Serialize)]
struct SummarizeRequest<'a> {
    name: &'a str,
    /// Base64 of the leading bytes.
    prefix: String,
}

#[derive(Debug, Deserialize)]
struct SummarizeResponse {
    description: Option<String>,
}

/// Summarizer backed by an HTTP endpoint.
///
/// POSTs `{"name": ..., "prefix": <base64>}` and expects
/// `{"description": ...}` back.
pub struct HttpSummarizer {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpSummarizer {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            timeout,
        }
    }

    /// Builds a summarizer from configuration, if enabled.
    pub fn from_config(config: &SummarizeConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let endpoint = config.endpoint.as_deref()?;
        Some(Self::new(endpoint, Duration::from_secs(config.timeout_secs)))
    }

    async fn request(&self, name: &str, prefix: &[u8]) -> Result<Option<String>, reqwest::Error> {
        let body = SummarizeRequest {
            name,
            prefix: BASE64.encode(prefix),
        };
        let response: SummarizeResponse = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty()))
    }
}

impl Summarizer for HttpSummarizer {
    fn summarize<'a>(
        &'a self,
        name: &'a str,
        prefix: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
        Box::pin(async move {
            match self.request(name, prefix).await {
                Ok(description) => description,
                Err(e) => {
                    tracing::warn!(name, error = %e, "Summarization failed, sending without description");
                    None
                }
            }
        })
    }
}

/// Reads up to `limit` leading bytes of a file.
pub async fn read_prefix(path: &Path, limit: usize) -> std::io::Result<Vec<u8>> {
    let file = tokio::fs::File::open(path).await?;
    let mut prefix = Vec::with_capacity(limit);
    file.take(limit as u64).read_to_end(&mut prefix).await?;
    Ok(prefix)
}

/// Describes a file, or `None` when there is nothing to say.
pub async fn describe(summarizer: &dyn Summarizer, path: &Path, prefix_bytes: usize) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let prefix = match read_prefix(path, prefix_bytes).await {
        Ok(prefix) => prefix,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read file prefix");
            return None;
        }
    };
    summarizer.summarize(name, &prefix).await
}
