//! Node registry.
//!
//! State is derived on read rather than stored: there is no background
//! state machine beyond the heartbeat-age computation. A narrative
//! three-state description (`healthy`/`degraded`/`down`) is reconciled here
//! against the typed four-variant [`NodeState`] — see DESIGN.md — as:
//! `degraded` → [`NodeState::Warning`], `down` → [`NodeState::Unreachable`],
//! with [`NodeState::Critical`] split out for disk usage at or above CRIT.

use anyhow::Error;
use cds_api_types::{CdsError, Heartbeat, NodeId, NodeRegistration, NodeState, NodeSummary};
use rusqlite::{params, OptionalExtension};

use crate::catalog::{now_secs, Catalog};

impl Catalog {
    /// Registers a node, or updates its URL/version in place if the
    /// node-id is already registered.
    pub fn register_node(&self, registration: &NodeRegistration) -> Result<(), Error> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO nodes (node_id, url, version, disk_usage_fraction, chunk_count)
             VALUES (?1, ?2, ?3, 0, 0)
             ON CONFLICT(node_id) DO UPDATE SET url = excluded.url, version = excluded.version",
            params![
                registration.node_id.as_str(),
                registration.url,
                registration.version,
            ],
        )?;
        log::info!("registered node {} at {}", registration.node_id, registration.url);
        Ok(())
    }

    /// Records a heartbeat. Rejects heartbeats for an unregistered node-id.
    pub fn heartbeat(&self, heartbeat: &Heartbeat) -> Result<(), CdsError> {
        let conn = self.conn.lock().unwrap();
        let updated = conn
            .execute(
                "UPDATE nodes SET last_heartbeat_secs = ?1, disk_usage_fraction = ?2, chunk_count = ?3
                 WHERE node_id = ?4",
                params![
                    now_secs(),
                    heartbeat.disk_usage_fraction,
                    heartbeat.chunk_count as i64,
                    heartbeat.node_id.as_str(),
                ],
            )
            .map_err(|err| CdsError::Fatal(err.to_string()))?;

        if updated == 0 {
            return Err(CdsError::NotFound(format!(
                "heartbeat for unregistered node '{}'",
                heartbeat.node_id
            )));
        }
        Ok(())
    }

    pub fn list_nodes(&self) -> Result<Vec<NodeSummary>, Error> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT node_id, url, version, last_heartbeat_secs, disk_usage_fraction, chunk_count FROM nodes",
        )?;
        let now = now_secs();
        let warn = self.config.warn_threshold;
        let crit = self.config.crit_threshold;
        let timeout = self.config.heartbeat_timeout_secs;

        let rows = stmt.query_map([], |row| {
            let node_id: String = row.get(0)?;
            let url: String = row.get(1)?;
            let version: String = row.get(2)?;
            let last_heartbeat_secs: Option<i64> = row.get(3)?;
            let disk_usage_fraction: f64 = row.get(4)?;
            let chunk_count: i64 = row.get(5)?;
            Ok((node_id, url, version, last_heartbeat_secs, disk_usage_fraction, chunk_count))
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            let (node_id, url, version, last_heartbeat_secs, disk_usage_fraction, chunk_count) = row?;
            let age_secs = last_heartbeat_secs.map(|t| (now - t).max(0) as f64);
            let state = derive_state(age_secs, disk_usage_fraction, timeout, warn, crit);
            summaries.push(NodeSummary {
                node_id: NodeId::parse(node_id)?,
                url,
                version,
                last_heartbeat_secs_ago: age_secs,
                disk_usage_fraction,
                chunk_count: chunk_count as u64,
                state,
            });
        }
        Ok(summaries)
    }

    /// Nodes whose derived state is `healthy`: last heartbeat within
    /// `T_timeout` and reported disk usage below `WARN`.
    pub fn list_healthy_nodes(&self) -> Result<Vec<NodeSummary>, Error> {
        Ok(self
            .list_nodes()?
            .into_iter()
            .filter(|n| n.state == NodeState::Healthy)
            .collect())
    }

    pub fn node_summary(&self, node_id: &NodeId) -> Result<Option<NodeSummary>, Error> {
        Ok(self.list_nodes()?.into_iter().find(|n| &n.node_id == node_id))
    }

    pub(crate) fn node_url(&self, node_id: &NodeId) -> Result<Option<String>, Error> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT url FROM nodes WHERE node_id = ?1",
                params![node_id.as_str()],
                |row| row.get(0),
            )
            .optional()?)
    }
}

fn derive_state(age_secs: Option<f64>, disk_usage: f64, timeout: f64, warn: f64, crit: f64) -> NodeState {
    let reachable = matches!(age_secs, Some(age) if age < timeout);
    if !reachable {
        return NodeState::Unreachable;
    }
    if disk_usage >= crit {
        NodeState::Critical
    } else if disk_usage >= warn {
        NodeState::Warning
    } else {
        NodeState::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cds_config::CoordinatorConfig;

    fn registration(id: &str) -> NodeRegistration {
        NodeRegistration {
            node_id: NodeId::parse(id).unwrap(),
            url: format!("http://{id}.local:8420"),
            version: "0.1.0".to_string(),
        }
    }

    #[test]
    fn heartbeat_for_unregistered_node_is_rejected() {
        let catalog = Catalog::open_in_memory(CoordinatorConfig::default()).unwrap();
        let heartbeat = Heartbeat {
            node_id: NodeId::parse("ghost").unwrap(),
            disk_usage_fraction: 0.1,
            chunk_count: 0,
        };
        let err = catalog.heartbeat(&heartbeat).unwrap_err();
        assert_eq!(err.kind(), "not-found");
    }

    #[test]
    fn registration_then_heartbeat_marks_healthy() {
        let catalog = Catalog::open_in_memory(CoordinatorConfig::default()).unwrap();
        catalog.register_node(&registration("node-a")).unwrap();
        catalog
            .heartbeat(&Heartbeat {
                node_id: NodeId::parse("node-a").unwrap(),
                disk_usage_fraction: 0.1,
                chunk_count: 5,
            })
            .unwrap();

        let nodes = catalog.list_nodes().unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].state, NodeState::Healthy);
        assert_eq!(catalog.list_healthy_nodes().unwrap().len(), 1);
    }

    #[test]
    fn never_heartbeated_node_is_unreachable() {
        let catalog = Catalog::open_in_memory(CoordinatorConfig::default()).unwrap();
        catalog.register_node(&registration("node-a")).unwrap();

        let nodes = catalog.list_nodes().unwrap();
        assert_eq!(nodes[0].state, NodeState::Unreachable);
        assert!(catalog.list_healthy_nodes().unwrap().is_empty());
    }

    #[test]
    fn reregistration_updates_url_in_place() {
        let catalog = Catalog::open_in_memory(CoordinatorConfig::default()).unwrap();
        catalog.register_node(&registration("node-a")).unwrap();
        let mut updated = registration("node-a");
        updated.url = "http://node-a-new.local:8420".to_string();
        catalog.register_node(&updated).unwrap();

        let nodes = catalog.list_nodes().unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].url, "http://node-a-new.local:8420");
    }
}
