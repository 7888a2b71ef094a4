use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Error};
use cds_config::CoordinatorConfig;
use rusqlite::Connection;

use crate::locks::ChunkLockTable;
use crate::schema::SCHEMA_SQL;

/// The coordinator's durable catalog plus its in-process per-chunk-id lock
/// table. Exclusively owned by the coordinator process; no other component
/// touches this database.
pub struct Catalog {
    pub(crate) conn: Mutex<Connection>,
    pub(crate) locks: ChunkLockTable,
    pub(crate) config: CoordinatorConfig,
}

impl Catalog {
    pub fn open(path: &Path, config: CoordinatorConfig) -> Result<Self, Error> {
        let conn = Connection::open(path)
            .with_context(|| format!("unable to open catalog database {path:?}"))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("unable to initialize catalog schema")?;
        Ok(Catalog {
            conn: Mutex::new(conn),
            locks: ChunkLockTable::new(),
            config,
        })
    }

    #[cfg(test)]
    pub fn open_in_memory(config: CoordinatorConfig) -> Result<Self, Error> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Catalog {
            conn: Mutex::new(conn),
            locks: ChunkLockTable::new(),
            config,
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }
}

pub(crate) fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
