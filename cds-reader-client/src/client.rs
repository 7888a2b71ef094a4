//! Low-level HTTP calls against a storage node's request surface.
//!
//! Follows `http_client.rs`'s construction of a plain
//! `hyper::Client<HttpConnector>`; the reader never needs the TLS
//! fingerprint-pinning or ticket-cache machinery `pbs-client` layers on top
//! of that same connector, so this stays at the bare-connector level.

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Error};
use cds_api_types::{ChunkId, ContentHash};
use http::{Request, StatusCode};
use hyper::client::HttpConnector;
use hyper::{Body, Client};

/// Outcome of a `HEAD /ping` probe.
#[derive(Debug, Clone, Copy)]
pub struct ProbeResult {
    pub latency_ms: f64,
    pub disk_usage_fraction: f64,
    pub chunk_count: u64,
}

/// A downloaded chunk or fragment body plus how long the transfer took.
pub struct Download {
    pub bytes: Vec<u8>,
    pub duration_secs: f64,
}

/// Thin wrapper around a shared `hyper` client; one instance is reused for
/// every node a reader session talks to.
#[derive(Clone)]
pub struct NodeHttpClient {
    inner: Client<HttpConnector>,
}

impl Default for NodeHttpClient {
    fn default() -> Self {
        NodeHttpClient {
            inner: Client::builder().build_http(),
        }
    }
}

impl NodeHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// `HEAD /ping`, bounded by `deadline`.
    pub async fn probe(&self, base_url: &str, deadline: Duration) -> Result<ProbeResult, Error> {
        let uri = format!("{}/ping", base_url.trim_end_matches('/'));
        let request = Request::head(&uri).body(Body::empty())?;

        let start = Instant::now();
        let response = tokio::time::timeout(deadline, self.inner.request(request))
            .await
            .context("probe timed out")?
            .with_context(|| format!("probe request to {uri} failed"))?;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        if response.status() != StatusCode::OK {
            bail!("probe to {uri} returned status {}", response.status());
        }
        let headers = response.headers();
        let disk_usage_fraction = header_f64(headers, "x-disk-usage-percent")?;
        let chunk_count = header_u64(headers, "x-chunk-count")?;

        Ok(ProbeResult {
            latency_ms,
            disk_usage_fraction,
            chunk_count,
        })
    }

    /// `GET /chunk/{id}`, bounded by `deadline`. Verifies the downloaded
    /// bytes against `expected_hash` before returning.
    pub async fn get_chunk(
        &self,
        base_url: &str,
        chunk_id: &ChunkId,
        expected_hash: &ContentHash,
        deadline: Duration,
    ) -> Result<Download, Error> {
        let uri = format!("{}/chunk/{}", base_url.trim_end_matches('/'), chunk_id);
        let request = Request::get(&uri).body(Body::empty())?;

        let start = Instant::now();
        let response = tokio::time::timeout(deadline, self.inner.request(request))
            .await
            .context("chunk download timed out")?
            .with_context(|| format!("GET {uri} failed"))?;

        if response.status() == StatusCode::NOT_FOUND {
            bail!("not-found: chunk {chunk_id} absent on {base_url}");
        }
        if response.status() != StatusCode::OK {
            bail!("GET {uri} returned status {}", response.status());
        }

        let body = hyper::body::to_bytes(response.into_body())
            .await
            .with_context(|| format!("reading body of {uri}"))?;
        let duration_secs = start.elapsed().as_secs_f64();

        let actual = ContentHash::of(&body);
        if actual != *expected_hash {
            bail!("corruption-detected: {chunk_id} from {base_url} hash {actual} != expected {expected_hash}");
        }

        Ok(Download {
            bytes: body.to_vec(),
            duration_secs,
        })
    }
}

fn header_f64(headers: &http::HeaderMap, name: &str) -> Result<f64, Error> {
    let value = headers
        .get(name)
        .with_context(|| format!("missing {name} header"))?
        .to_str()?;
    value.parse().with_context(|| format!("invalid {name} header '{value}'"))
}

fn header_u64(headers: &http::HeaderMap, name: &str) -> Result<u64, Error> {
    let value = headers
        .get(name)
        .with_context(|| format!("missing {name} header"))?
        .to_str()?;
    value.parse().with_context(|| format!("invalid {name} header '{value}'"))
}
