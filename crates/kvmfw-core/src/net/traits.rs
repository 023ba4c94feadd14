//! Network fetch abstraction.
//!
//! Defines the `HttpFetch` trait so the resolver can run against a real
//! HTTP client or a canned mock.

use reqwest::Url;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Request failed: {0}")]
    Request(String),
}

/// A completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
        }
    }

    /// 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Abstract blocking GET.
///
/// A response with any status is `Ok`; only transport-level failures are
/// errors.
pub trait HttpFetch: Send + Sync {
    fn get(&self, url: &Url) -> Result<HttpResponse, FetchError>;
}

impl<T: HttpFetch + ?Sized> HttpFetch for std::sync::Arc<T> {
    fn get(&self, url: &Url) -> Result<HttpResponse, FetchError> {
        (**self).get(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_success() {
        assert!(HttpResponse::ok("x").is_success());
        assert!(HttpResponse::status(204).is_success());
        assert!(!HttpResponse::status(404).is_success());
        assert!(!HttpResponse::status(301).is_success());
    }
}
