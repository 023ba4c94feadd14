//! Network fetch layer.

pub mod http;
pub mod mock;
pub mod traits;

pub use http::ReqwestFetcher;
pub use mock::MockFetcher;
pub use traits::{FetchError, HttpFetch, HttpResponse};
