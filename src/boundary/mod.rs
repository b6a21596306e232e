//! The privilege boundary between the coordinator and the fetching context
//!
//! The coordinator never talks to the network itself. It sends a request to a
//! [`BoundaryWorker`] task over a channel and awaits a structured reply; the
//! worker performs the fetch through a [`FetchBoundary`] capability, validates
//! the response and ships the bytes back as base64 frames produced by the
//! [`ChunkedCodec`](crate::codec::ChunkedCodec).

use async_trait::async_trait;

use crate::error::Result;

/// HTTP implementation of [`FetchBoundary`]
pub mod http;
mod validate;
mod worker;

pub use http::HttpFetchBoundary;
pub use validate::validate_response;
pub use worker::{BoundaryFetcher, BoundaryWorker, FetchStep};

/// One request sent through a [`FetchBoundary`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchRequest {
    /// URL to fetch; redirects are followed
    pub url: String,
    /// Attach the boundary's credentials (the retry path after a 401/403)
    pub credentialed: bool,
    /// Largest body the caller will accept, if known
    pub max_bytes: Option<u64>,
}

impl FetchRequest {
    /// An uncredentialed request for `url`
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            credentialed: false,
            max_bytes: None,
        }
    }
}

/// What came back from the network, before validation
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub bytes: Vec<u8>,
    /// `Content-Type` header, empty when absent
    pub content_type: String,
}

impl RawResponse {
    /// Whether the status asks for credentials
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self.status, 401 | 403)
    }
}

/// Network fetch executed with capabilities the coordinator lacks
///
/// Implementations return any HTTP status as a [`RawResponse`]; only transport
/// failures are errors. Status and body validation happen in the worker.
#[async_trait]
pub trait FetchBoundary: Send + Sync {
    /// Fetch `request.url`
    async fn fetch(&self, request: &FetchRequest) -> Result<RawResponse>;

    /// Whether a credentialed retry could succeed where a plain request was rejected
    fn has_credentials(&self) -> bool {
        true
    }
}
