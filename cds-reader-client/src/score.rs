//! Per-node probe statistics and the selection score.

use std::collections::HashMap;

use cds_api_types::NodeId;
use cds_config::ReaderConfig;

use crate::window::SlidingWindow;

/// Latency/reliability/bandwidth history for one candidate node, plus a
/// round-robin counter used to break score ties.
pub struct NodeStats {
    latency_ms: SlidingWindow,
    reliability: SlidingWindow,
    bandwidth_mbps: SlidingWindow,
    selections: u64,
}

impl NodeStats {
    pub fn new(config: &ReaderConfig) -> Self {
        let mut bandwidth = SlidingWindow::new(config.bandwidth_window);
        // seed value so a never-measured node isn't scored as if it had zero
        // bandwidth: with no measurements yet, assume the seed bandwidth.
        bandwidth.push(config.bandwidth_seed_mbps);
        NodeStats {
            latency_ms: SlidingWindow::new(config.latency_window),
            reliability: SlidingWindow::new(config.reliability_window),
            bandwidth_mbps: bandwidth,
            selections: 0,
        }
    }

    pub fn record_probe(&mut self, latency_ms: f64, success: bool) {
        self.latency_ms.push(latency_ms);
        self.reliability.push(if success { 1.0 } else { 0.0 });
    }

    pub fn record_transfer(&mut self, bytes: u64, duration_secs: f64) {
        if duration_secs > 0.0 {
            let mbps = (bytes as f64 * 8.0) / duration_secs / 1_000_000.0;
            self.bandwidth_mbps.push(mbps);
        }
    }

    pub fn record_failure(&mut self) {
        self.reliability.push(0.0);
    }

    /// `bandwidth · reliability / (1 + latency_ms · 0.1)`.
    pub fn score(&self) -> f64 {
        let bandwidth = self.bandwidth_mbps.mean().unwrap_or(0.0);
        let reliability = self.reliability.mean().unwrap_or(1.0);
        let latency = self.latency_ms.mean().unwrap_or(0.0);
        bandwidth * reliability / (1.0 + latency * 0.1)
    }

    /// Demoted if its reliability window is full and every sample failed.
    pub fn is_demoted(&self) -> bool {
        self.reliability.all_zero()
    }
}

/// Per-session table of [`NodeStats`], one per candidate node url seen in
/// the manifest.
pub struct ScoreTable {
    nodes: HashMap<NodeId, NodeStats>,
    config: ReaderConfig,
}

impl ScoreTable {
    pub fn new(config: ReaderConfig) -> Self {
        ScoreTable {
            nodes: HashMap::new(),
            config,
        }
    }

    fn entry(&mut self, node_id: &NodeId) -> &mut NodeStats {
        self.nodes
            .entry(node_id.clone())
            .or_insert_with(|| NodeStats::new(&self.config))
    }

    pub fn record_probe(&mut self, node_id: &NodeId, latency_ms: f64, success: bool) {
        self.entry(node_id).record_probe(latency_ms, success);
    }

    pub fn record_transfer(&mut self, node_id: &NodeId, bytes: u64, duration_secs: f64) {
        self.entry(node_id).record_transfer(bytes, duration_secs);
    }

    pub fn record_failure(&mut self, node_id: &NodeId) {
        self.entry(node_id).record_failure();
    }

    /// Picks the best candidate among `candidates`, skipping nodes already
    /// saturated by `in_flight` or with an all-zero reliability window
    /// unless no alternative exists.
    pub fn select<'a>(
        &mut self,
        candidates: &'a [NodeId],
        in_flight: &HashMap<NodeId, usize>,
        per_node_limit: usize,
    ) -> Option<&'a NodeId> {
        if candidates.is_empty() {
            return None;
        }

        let mut ranked: Vec<(&NodeId, f64, bool)> = candidates
            .iter()
            .map(|id| {
                let stats = self.entry(id);
                let saturated = in_flight.get(id).copied().unwrap_or(0) >= per_node_limit;
                let demoted = stats.is_demoted() || saturated;
                (id, stats.score(), demoted)
            })
            .collect();

        let any_non_demoted = ranked.iter().any(|(_, _, demoted)| !demoted);
        if any_non_demoted {
            ranked.retain(|(_, _, demoted)| !demoted);
        }

        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let top_score = ranked.first()?.1;
        let tied: Vec<&(&NodeId, f64, bool)> = ranked
            .iter()
            .take_while(|(_, score, _)| (*score - top_score).abs() < f64::EPSILON)
            .collect();

        let chosen = if tied.len() <= 1 {
            tied.first().map(|(id, _, _)| *id)
        } else {
            // round-robin over ties: pick the one selected least recently.
            tied.iter()
                .min_by_key(|(id, _, _)| self.nodes.get(*id).map(|s| s.selections).unwrap_or(0))
                .map(|(id, _, _)| *id)
        };

        if let Some(id) = chosen {
            self.entry(id).selections += 1;
        }
        chosen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cds_api_types::NodeId;

    fn node(s: &str) -> NodeId {
        NodeId::parse(s).unwrap()
    }

    #[test]
    fn low_latency_high_reliability_wins() {
        let mut table = ScoreTable::new(ReaderConfig::default());
        let a = node("node-a");
        let b = node("node-b");
        for _ in 0..5 {
            table.record_probe(&a, 10.0, true);
            table.record_probe(&b, 100.0, true);
        }
        let candidates = vec![a.clone(), b.clone()];
        let chosen = table.select(&candidates, &HashMap::new(), 4).unwrap();
        assert_eq!(*chosen, a);
    }

    #[test]
    fn all_zero_reliability_node_is_demoted_unless_only_option() {
        let mut table = ScoreTable::new(ReaderConfig::default());
        let a = node("node-a");
        let b = node("node-b");
        for _ in 0..table.config.reliability_window {
            table.record_probe(&a, 10.0, false);
        }
        table.record_probe(&b, 50.0, true);

        let candidates = vec![a.clone(), b.clone()];
        assert_eq!(*table.select(&candidates, &HashMap::new(), 4).unwrap(), b);

        let only_a = vec![a.clone()];
        assert_eq!(*table.select(&only_a, &HashMap::new(), 4).unwrap(), a);
    }

    #[test]
    fn saturated_node_is_skipped_when_alternative_exists() {
        let mut table = ScoreTable::new(ReaderConfig::default());
        let a = node("node-a");
        let b = node("node-b");
        table.record_probe(&a, 10.0, true);
        table.record_probe(&b, 10.0, true);
        let mut in_flight = HashMap::new();
        in_flight.insert(a.clone(), 4);
        let candidates = vec![a.clone(), b.clone()];
        assert_eq!(*table.select(&candidates, &in_flight, 4).unwrap(), b);
    }
}
