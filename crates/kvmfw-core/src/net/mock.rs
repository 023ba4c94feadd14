//! Mock fetcher for testing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use reqwest::Url;

use super::traits::{FetchError, HttpFetch, HttpResponse};

/// Mock fetcher serving canned responses by URL.
///
/// Unknown URLs answer 404.
#[derive(Clone, Default)]
pub struct MockFetcher {
    responses: Arc<Mutex<HashMap<String, Result<HttpResponse, FetchError>>>>,
    /// Captured request URLs.
    request_log: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `response` for `url`.
    pub fn respond(&self, url: &str, response: HttpResponse) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), Ok(response));
    }

    /// Fail requests to `url` with `error`.
    pub fn fail(&self, url: &str, error: FetchError) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), Err(error));
    }

    /// Get all captured request URLs.
    pub fn get_requests(&self) -> Vec<String> {
        self.request_log.lock().unwrap().clone()
    }
}

impl HttpFetch for MockFetcher {
    fn get(&self, url: &Url) -> Result<HttpResponse, FetchError> {
        self.request_log.lock().unwrap().push(url.to_string());
        self.responses
            .lock()
            .unwrap()
            .get(url.as_str())
            .cloned()
            .unwrap_or_else(|| Ok(HttpResponse::status(404)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_serves_and_logs() {
        let mock = MockFetcher::new();
        mock.respond("https://example.com/a.txt", HttpResponse::ok("1,a.bin"));

        let url = Url::parse("https://example.com/a.txt").unwrap();
        let resp = mock.get(&url).unwrap();
        assert_eq!(resp.body, b"1,a.bin");

        let missing = Url::parse("https://example.com/b.txt").unwrap();
        assert_eq!(mock.get(&missing).unwrap().status, 404);

        assert_eq!(mock.get_requests().len(), 2);
    }

    #[test]
    fn test_mock_failure_injection() {
        let mock = MockFetcher::new();
        mock.fail(
            "https://example.com/a.txt",
            FetchError::Request("connection refused".into()),
        );
        let url = Url::parse("https://example.com/a.txt").unwrap();
        assert!(mock.get(&url).is_err());
    }
}
