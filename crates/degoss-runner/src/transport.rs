use anyhow::{Context, Result};
use std::io::Read;
use std::time::Duration;

pub struct Fetched {
    pub status: u16,
    pub final_url: String,
    pub body: Box<dyn Read>,
}

pub trait Transport {
    fn get(&self, url: &str) -> Result<Fetched>;
}

pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("degoss/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .timeout(None)
            .build()
            .context("build HTTP client")?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> Result<Fetched> {
        let resp = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("GET {url}"))?;
        Ok(Fetched {
            status: resp.status().as_u16(),
            final_url: resp.url().to_string(),
            body: Box::new(resp),
        })
    }
}

/// Stands in when no HTTP client could be built; every request fails with
/// the construction error, so the run still goes through the fatal path.
pub struct Unavailable {
    reason: String,
}

impl Unavailable {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Transport for Unavailable {
    fn get(&self, url: &str) -> Result<Fetched> {
        Err(anyhow::anyhow!("GET {url}: {}", self.reason))
    }
}
