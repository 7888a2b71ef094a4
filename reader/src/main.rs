//! Adaptive reader CLI: fetches a stream's manifest from the coordinator,
//! then runs a reader session against it, printing progress to stderr and a
//! final JSON summary to stdout.
//!
//! Follows the small env-args command-line tools style of
//! `proxmox-protocol-testclient.rs`'s `require_arg` helper, rather than the
//! heavier `proxmox-router` CLI-dispatch stack the user-facing
//! `proxmox-backup-client` binary uses — this is a single-purpose tool with
//! one mode of operation, not a multi-subcommand API client.

use std::io::Write;
use std::process::exit;

use anyhow::{bail, Context, Error};
use cds_api_types::StreamManifest;
use cds_config::ReaderConfig;
use hyper::{Body, Client};

fn require_arg(args: &mut dyn Iterator<Item = String>, name: &str) -> String {
    match args.next() {
        Some(arg) => arg,
        None => {
            eprintln!("missing required argument: {name}");
            print_usage();
            exit(1);
        }
    }
}

fn print_usage() {
    eprintln!("usage: cds-reader <stream-id> <coordinator-url> [output-file]");
}

async fn fetch_manifest(coordinator_url: &str, stream_id: &str) -> Result<StreamManifest, Error> {
    let client = Client::builder().build_http::<Body>();
    let uri = format!("{}/streams/{stream_id}/manifest", coordinator_url.trim_end_matches('/'));
    let response = client
        .get(uri.parse().with_context(|| format!("invalid coordinator url '{uri}'"))?)
        .await
        .with_context(|| format!("failed to reach coordinator at '{coordinator_url}'"))?;
    if !response.status().is_success() {
        bail!("coordinator returned {} for stream '{stream_id}'", response.status());
    }
    let body = hyper::body::to_bytes(response.into_body()).await?;
    serde_json::from_slice(&body).context("malformed manifest response")
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    cds_tools::logging::init_logging("info");

    let mut args = std::env::args().skip(1);
    let stream_id = require_arg(&mut args, "stream-id");
    let coordinator_url = require_arg(&mut args, "coordinator-url");
    let output_path = args.next();

    let manifest = fetch_manifest(&coordinator_url, &stream_id).await?;
    eprintln!(
        "fetched manifest for stream '{}': {} chunks, {:.1}s each",
        manifest.stream_id, manifest.total_chunks, manifest.chunk_duration_secs
    );

    let mut output = match &output_path {
        Some(path) => Some(std::fs::File::create(path).with_context(|| format!("unable to create {path}"))?),
        None => None,
    };

    let config = ReaderConfig::load(None)?;
    let summary = cds_reader_client::run_session(manifest, config, move |seq, bytes| {
        eprintln!("played chunk {seq} ({} bytes)", bytes.len());
        if let Some(file) = output.as_mut() {
            if let Err(err) = file.write_all(&bytes) {
                eprintln!("error writing chunk {seq} to output: {err}");
            }
        }
    })
    .await?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    if summary.stalls > 0 {
        eprintln!("session finished with {} stall(s)", summary.stalls);
    }
    if summary.failed_chunks > 0 {
        eprintln!("session finished with {} permanently failed chunk(s)", summary.failed_chunks);
        exit(1);
    }
    Ok(())
}
