//! Ties the probe engine, scorer, download scheduler and playout buffer
//! together into one reader session: a single logical control loop with
//! multiple cooperative sub-tasks.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Error;
use cds_api_types::{ChunkId, ChunkLocations, NodeId, StreamManifest};
use cds_config::ReaderConfig;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;

use crate::buffer::{BufferState, PlayoutBuffer};
use crate::client::NodeHttpClient;
use crate::download::{download_entry, InFlightCounts};
use crate::score::ScoreTable;

/// Per-session outcome, printed by the `reader` binary as a JSON summary.
#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub stream_id: String,
    pub chunks_played: u64,
    pub chunks_total: u64,
    pub stalls: u64,
    pub failed_chunks: u64,
}

/// Every distinct node url referenced anywhere in the manifest, for the
/// probe engine: every node url present in the current manifest's
/// replica/fragment lists.
fn candidate_nodes(manifest: &StreamManifest) -> HashMap<NodeId, String> {
    let mut nodes = HashMap::new();
    for entry in &manifest.entries {
        match &entry.locations {
            ChunkLocations::Replicated { replicas } => {
                for replica in replicas {
                    nodes.insert(replica.node_id.clone(), replica.url.clone());
                }
            }
            ChunkLocations::Erasure { fragments, .. } => {
                for fragment in fragments {
                    nodes.insert(fragment.node_id.clone(), fragment.url.clone());
                }
            }
        }
    }
    nodes
}

/// One probe round against every candidate node, run every `T_probe` on its
/// own cooperative task: N probers, one per candidate node.
async fn probe_loop(
    nodes: HashMap<NodeId, String>,
    client: NodeHttpClient,
    scores: std::sync::Arc<Mutex<ScoreTable>>,
    config: ReaderConfig,
    mut stop: tokio::sync::watch::Receiver<bool>,
) {
    let deadline = Duration::from_secs_f64(config.probe_deadline_secs);
    let interval = Duration::from_secs_f64(config.probe_interval_secs);
    loop {
        for (node_id, url) in &nodes {
            match client.probe(url, deadline).await {
                Ok(result) => {
                    scores.lock().unwrap().record_probe(node_id, result.latency_ms, true);
                }
                Err(err) => {
                    log::debug!("probe to {node_id} ({url}) failed: {err}");
                    scores.lock().unwrap().record_probe(node_id, deadline.as_secs_f64() * 1000.0, false);
                }
            }
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = stop.changed() => return,
        }
    }
}

/// Runs one full playout session for `manifest`, feeding downloaded bytes to
/// `sink` in strict sequence order.
pub async fn run_session(
    manifest: StreamManifest,
    config: ReaderConfig,
    mut sink: impl FnMut(u64, Vec<u8>),
) -> Result<SessionSummary, Error> {
    let client = NodeHttpClient::new();
    let scores = std::sync::Arc::new(Mutex::new(ScoreTable::new(config.clone())));
    let nodes = candidate_nodes(&manifest);

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let prober = tokio::spawn(probe_loop(nodes, client.clone(), scores.clone(), config.clone(), stop_rx));

    let download_deadline = Duration::from_secs_f64(config.download_deadline_secs);
    let mut buffer = PlayoutBuffer::new(&config, manifest.chunk_duration_secs, manifest.total_chunks);
    let mut pending_bytes: HashMap<u64, Vec<u8>> = HashMap::new();
    let mut failed: HashSet<u64> = HashSet::new();

    let mut downloads = FuturesUnordered::new();
    let mut next_to_schedule = 0usize;
    let total = manifest.entries.len();
    let concurrency = config.concurrency;
    let node_in_flight: InFlightCounts = Arc::new(Mutex::new(HashMap::new()));

    let schedule_next = |idx: usize, downloads: &mut FuturesUnordered<_>| {
        let entry = manifest.entries[idx].clone();
        let client = client.clone();
        let scores = scores.clone();
        let node_in_flight = node_in_flight.clone();
        downloads.push(async move {
            let result = download_entry(
                &entry,
                &client,
                &scores,
                download_deadline,
                concurrency,
                &node_in_flight,
            )
            .await;
            (entry.sequence_num, result)
        });
    };

    // Fills scheduling slots up to the concurrency cap, but holds off
    // starting new downloads once the buffer has reached its soft target
    // ahead of playout -- unless the buffer has fallen below the low-water
    // mark, in which case refilling takes priority over that cap.
    let fill_schedule = |next_to_schedule: &mut usize, downloads: &mut FuturesUnordered<_>, buffer: &PlayoutBuffer| {
        while *next_to_schedule < total
            && downloads.len() < concurrency
            && (!buffer.is_prefetch_saturated() || buffer.needs_refill())
        {
            schedule_next(*next_to_schedule, downloads);
            *next_to_schedule += 1;
        }
    };

    fill_schedule(&mut next_to_schedule, &mut downloads, &buffer);

    let mut playout_clock = tokio::time::interval(Duration::from_secs_f64(
        manifest.chunk_duration_secs.max(0.01),
    ));

    loop {
        if buffer.state() == BufferState::Finished {
            break;
        }

        tokio::select! {
            Some((sequence_num, result)) = downloads.next() => {
                match result {
                    Ok(bytes) => {
                        pending_bytes.insert(sequence_num, bytes);
                        if let Some(chunk_id) = manifest
                            .entries
                            .iter()
                            .find(|e| e.sequence_num == sequence_num)
                            .map(|e| e.chunk_id.clone())
                        {
                            buffer.push(sequence_num, chunk_id);
                        }
                    }
                    Err(err) => {
                        log::warn!("chunk sequence {sequence_num} permanently failed: {err}");
                        failed.insert(sequence_num);
                    }
                }
                fill_schedule(&mut next_to_schedule, &mut downloads, &buffer);
            }
            _ = playout_clock.tick() => {
                let seq = buffer.next_to_emit();
                if failed.contains(&seq) {
                    // permanently failed chunk: skip it rather than stalling forever.
                    buffer.push(seq, ChunkId::parse(format!("missing-{seq}")).unwrap());
                    pending_bytes.insert(seq, Vec::new());
                }
                if buffer.tick().is_some() {
                    if let Some(bytes) = pending_bytes.remove(&seq) {
                        sink(seq, bytes);
                    }
                }
                fill_schedule(&mut next_to_schedule, &mut downloads, &buffer);
            }
            else => break,
        }
    }

    let _ = stop_tx.send(true);
    prober.abort();

    Ok(SessionSummary {
        stream_id: manifest.stream_id.to_string(),
        chunks_played: buffer.next_to_emit(),
        chunks_total: manifest.total_chunks,
        stalls: buffer.stall_count(),
        failed_chunks: failed.len() as u64,
    })
}
