//! Blocking HTTP — hosted-post API calls, image bytes and audio downloads.
//!
//! The rest of the crate talks to the network only through [`Fetcher`], so
//! the extractor and narrator can be driven by in-memory fakes in tests.

use std::{io::Read, path::Path, time::Duration};

use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};

/// Plain GET access to remote resources.
pub trait Fetcher {
    fn get_bytes(&self, url: &str) -> Result<Vec<u8>>;
    fn get_json(&self, url: &str) -> Result<Value>;
}

// ─────────────────────────────────────────────────────────────────────────────
// ureq-backed client
// ─────────────────────────────────────────────────────────────────────────────

/// [`Fetcher`] over a shared `ureq` agent with connect and read timeouts.
#[derive(Clone)]
pub struct HttpClient {
    agent: ureq::Agent,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .user_agent(concat!("read-aloud/", env!("CARGO_PKG_VERSION")))
            .build();
        Self { agent }
    }

    /// The underlying agent, for callers that need POST or custom headers.
    pub fn agent(&self) -> &ureq::Agent {
        &self.agent
    }
}

impl Fetcher for HttpClient {
    fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        debug!("GET {}", url);
        let response = self.agent.get(url).call().map_err(|e| Error::fetch(url, e))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(|e| Error::fetch(url, e))?;
        Ok(bytes)
    }

    fn get_json(&self, url: &str) -> Result<Value> {
        debug!("GET {} (json)", url);
        self.agent
            .get(url)
            .call()
            .map_err(|e| Error::fetch(url, e))?
            .into_json()
            .map_err(|e| Error::fetch(url, e))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Download `url` and write it to `path`, replacing any existing file.
pub fn download_to(fetcher: &dyn Fetcher, url: &str, path: &Path) -> Result<()> {
    let bytes = fetcher.get_bytes(url)?;
    std::fs::write(path, &bytes).map_err(|e| Error::io(path, e))?;
    debug!("Saved {} bytes from {} to {}", bytes.len(), url, path.display());
    Ok(())
}
