//! HTTPS downloads for repository signing keys.

use bootkit_core::{ActionError, ActionResult};
use reqwest::blocking::Client;
use std::time::Duration;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Fetches a small remote document into memory.
pub trait KeyFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> ActionResult<Vec<u8>>;
}

pub struct HttpKeyFetcher {
    client: Client,
}

impl HttpKeyFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("bootkit/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl KeyFetcher for HttpKeyFetcher {
    fn fetch(&self, url: &str) -> ActionResult<Vec<u8>> {
        log::debug!("Fetching {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| ActionError::transient(format!("GET {}: {}", url, err)))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(ActionError::transient(format!("GET {}: HTTP {}", url, status)));
        }
        if !status.is_success() {
            return Err(ActionError::permanent(format!("GET {}: HTTP {}", url, status)));
        }

        let body = response
            .bytes()
            .map_err(|err| ActionError::transient(format!("GET {}: {}", url, err)))?;
        if body.is_empty() {
            return Err(ActionError::transient(format!("GET {}: empty body", url)));
        }
        Ok(body.to_vec())
    }
}
