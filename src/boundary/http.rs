use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};

use super::{FetchBoundary, FetchRequest, RawResponse};
use crate::config::FetchConfig;
use crate::error::{Error, Result};

/// [`FetchBoundary`] backed by a `reqwest` client
///
/// Follows up to `max_redirects` redirects and attaches the configured
/// credential headers only on credentialed requests. Bodies larger than the
/// request's `max_bytes` are rejected from `Content-Length` when announced and
/// otherwise while streaming, so an oversized body is never fully buffered.
#[derive(Clone, Debug)]
pub struct HttpFetchBoundary {
    client: reqwest::Client,
    credential_headers: HeaderMap,
}

impl HttpFetchBoundary {
    /// Build the client from fetch settings
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| {
                Error::Io(std::io::Error::other(format!(
                    "Failed to create HTTP client: {}",
                    e
                )))
            })?;

        let mut credential_headers = HeaderMap::new();
        for (name, value) in &config.credential_headers {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                Error::config(
                    format!("invalid credential header name '{name}': {e}"),
                    "fetch.credential_headers",
                )
            })?;
            let mut header_value = HeaderValue::from_str(value).map_err(|e| {
                Error::config(
                    format!("invalid value for credential header '{name}': {e}"),
                    "fetch.credential_headers",
                )
            })?;
            header_value.set_sensitive(true);
            credential_headers.insert(header_name, header_value);
        }

        Ok(Self {
            client,
            credential_headers,
        })
    }
}

#[async_trait]
impl FetchBoundary for HttpFetchBoundary {
    async fn fetch(&self, request: &FetchRequest) -> Result<RawResponse> {
        let mut builder = self.client.get(&request.url);
        if request.credentialed {
            builder = builder.headers(self.credential_headers.clone());
        }

        let mut response = builder.send().await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        tracing::debug!(
            url = %request.url,
            status,
            content_type = %content_type,
            content_length = ?response.content_length(),
            credentialed = request.credentialed,
            "boundary response"
        );

        if let (Some(limit), Some(announced)) = (request.max_bytes, response.content_length())
            && response.status().is_success()
            && announced > limit
        {
            return Err(Error::SizeExceeded {
                limit,
                actual: announced,
            });
        }

        let mut bytes = Vec::with_capacity(
            response
                .content_length()
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or_default(),
        );
        while let Some(chunk) = response.chunk().await? {
            bytes.extend_from_slice(&chunk);
            if let Some(limit) = request.max_bytes
                && bytes.len() as u64 > limit
            {
                return Err(Error::SizeExceeded {
                    limit,
                    actual: bytes.len() as u64,
                });
            }
        }

        Ok(RawResponse {
            status,
            bytes,
            content_type,
        })
    }

    fn has_credentials(&self) -> bool {
        !self.credential_headers.is_empty()
    }
}
