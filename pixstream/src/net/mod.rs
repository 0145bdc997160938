//! Network byte transport.

mod http;

pub use http::{is_url, FetchError, HttpClient, HttpConfig, ReqwestClient};

#[cfg(test)]
pub use http::tests::MockHttpClient;
