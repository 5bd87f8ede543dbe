pub mod civitai;
#[cfg(test)]
pub(crate) mod fixture_server;

use reqwest::Client;
use std::time::Duration;

pub const USER_AGENT: &str = concat!("sdfetch/", env!("CARGO_PKG_VERSION"));

/// HTTP client shared by the API resolver and the preview fetcher.
pub fn http_client() -> Client {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|_| Client::new())
}
