//! Per-chunk download with failover across replicas/fragments.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Error};
use cds_api_types::{ChunkLocations, ManifestEntry, NodeId};

use crate::client::NodeHttpClient;
use crate::erasure::{self, Fragment};
use crate::score::ScoreTable;

const MAX_FAILOVER_ROUNDS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 200;

/// Live count of outstanding requests per node, shared across every
/// concurrently scheduled download so [`ScoreTable::select`] actually sees
/// saturation as it happens rather than an empty map.
pub type InFlightCounts = Arc<Mutex<HashMap<NodeId, usize>>>;

/// RAII nudge: increments on creation, decrements on drop, so a failover or
/// an early return can never leave a node's counter stuck above zero.
struct InFlightGuard<'a> {
    in_flight: &'a InFlightCounts,
    node_id: NodeId,
}

impl<'a> InFlightGuard<'a> {
    fn enter(in_flight: &'a InFlightCounts, node_id: NodeId) -> Self {
        *in_flight.lock().unwrap().entry(node_id.clone()).or_insert(0) += 1;
        InFlightGuard { in_flight, node_id }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Some(count) = self.in_flight.lock().unwrap().get_mut(&self.node_id) {
            *count = count.saturating_sub(1);
        }
    }
}

/// Downloads one manifest entry's bytes, trying replicas/fragments by score
/// and failing over to the next-best candidate on any error.
pub async fn download_entry(
    entry: &ManifestEntry,
    client: &NodeHttpClient,
    scores: &Mutex<ScoreTable>,
    download_deadline: Duration,
    per_node_limit: usize,
    in_flight: &InFlightCounts,
) -> Result<Vec<u8>, Error> {
    match &entry.locations {
        ChunkLocations::Replicated { replicas } => {
            if replicas.is_empty() {
                bail!("chunk {} has no replica locations", entry.chunk_id);
            }
            let urls: HashMap<NodeId, String> = replicas
                .iter()
                .map(|r| (r.node_id.clone(), r.url.clone()))
                .collect();
            let mut candidates: Vec<NodeId> = replicas.iter().map(|r| r.node_id.clone()).collect();

            for round in 0..MAX_FAILOVER_ROUNDS {
                if round > 0 {
                    tokio::time::sleep(backoff(round)).await;
                }
                while !candidates.is_empty() {
                    let snapshot = in_flight.lock().unwrap().clone();
                    let chosen = {
                        let mut table = scores.lock().unwrap();
                        table.select(&candidates, &snapshot, per_node_limit).cloned()
                    };
                    let Some(node_id) = chosen else { break };
                    candidates.retain(|id| id != &node_id);
                    let url = &urls[&node_id];
                    let _guard = InFlightGuard::enter(in_flight, node_id.clone());

                    match client
                        .get_chunk(url, &entry.chunk_id, &entry.hash, download_deadline)
                        .await
                    {
                        Ok(download) => {
                            scores.lock().unwrap().record_transfer(
                                &node_id,
                                download.bytes.len() as u64,
                                download.duration_secs,
                            );
                            return Ok(download.bytes);
                        }
                        Err(err) => {
                            log::warn!("chunk {} failed on {node_id}: {err}", entry.chunk_id);
                            scores.lock().unwrap().record_failure(&node_id);
                        }
                    }
                }
                // exhausted this round's candidates; retry the full replica set.
                candidates = replicas.iter().map(|r| r.node_id.clone()).collect();
            }
            bail!("chunk {} failed on every replica after {MAX_FAILOVER_ROUNDS} rounds", entry.chunk_id);
        }
        ChunkLocations::Erasure { k, fragments, .. } => {
            download_erasure_entry(
                entry,
                *k,
                fragments,
                client,
                scores,
                download_deadline,
                per_node_limit,
                in_flight,
            )
            .await
        }
    }
}

async fn download_erasure_entry(
    entry: &ManifestEntry,
    k: u8,
    fragments: &[cds_api_types::FragmentLocation],
    client: &NodeHttpClient,
    scores: &Mutex<ScoreTable>,
    download_deadline: Duration,
    per_node_limit: usize,
    in_flight: &InFlightCounts,
) -> Result<Vec<u8>, Error> {
    let m = (fragments.len() as u8).saturating_sub(k);
    let mut remaining: Vec<&cds_api_types::FragmentLocation> = fragments.iter().collect();
    let mut collected: Vec<Fragment> = Vec::new();

    while collected.len() < k as usize && !remaining.is_empty() {
        let candidates: Vec<NodeId> = remaining.iter().map(|f| f.node_id.clone()).collect();
        let snapshot = in_flight.lock().unwrap().clone();
        let chosen = {
            let mut table = scores.lock().unwrap();
            table.select(&candidates, &snapshot, per_node_limit).cloned()
        };
        let Some(node_id) = chosen else { break };
        let (idx, fragment) = remaining
            .iter()
            .enumerate()
            .find(|(_, f)| f.node_id == node_id)
            .expect("selected node_id came from remaining candidates");
        let fragment_storage_id = entry.chunk_id.fragment_storage_id(fragment.fragment_index);
        let url = fragment.url.clone();
        let fragment_hash = fragment.hash;
        let fragment_index = fragment.fragment_index;
        let _guard = InFlightGuard::enter(in_flight, node_id.clone());

        match client
            .get_chunk(&url, &fragment_storage_id, &fragment_hash, download_deadline)
            .await
        {
            Ok(download) => {
                scores.lock().unwrap().record_transfer(
                    &node_id,
                    download.bytes.len() as u64,
                    download.duration_secs,
                );
                collected.push(Fragment {
                    index: fragment_index,
                    bytes: download.bytes,
                });
            }
            Err(err) => {
                log::warn!(
                    "fragment {fragment_index} of chunk {} failed on {node_id}: {err}",
                    entry.chunk_id
                );
                scores.lock().unwrap().record_failure(&node_id);
            }
        }
        remaining.remove(idx);
    }

    if collected.len() < k as usize {
        bail!(
            "chunk {} collected only {} of {k} required fragments",
            entry.chunk_id,
            collected.len()
        );
    }

    erasure::reconstruct(k, m, &collected, entry.size as usize, &entry.hash)
}

fn backoff(round: u32) -> Duration {
    Duration::from_millis(BACKOFF_BASE_MS * 2u64.pow(round.min(4)))
}
