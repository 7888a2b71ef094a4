//! The catalog's relational schema.
//!
//! `placement_proposals` carries no foreign key to `chunks` because a
//! proposal is created before the chunk it may eventually commit exists.

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS streams (
    stream_id           TEXT PRIMARY KEY,
    title                TEXT NOT NULL,
    status               TEXT NOT NULL,
    chunk_duration_secs  REAL NOT NULL,
    chunk_payload_size   INTEGER NOT NULL,
    total_chunk_count    INTEGER NOT NULL,
    popularity           INTEGER NOT NULL DEFAULT 0,
    redundancy_mode      TEXT,
    redundancy_override  TEXT
);

CREATE TABLE IF NOT EXISTS chunks (
    chunk_id         TEXT PRIMARY KEY,
    stream_id        TEXT NOT NULL REFERENCES streams(stream_id),
    sequence_num     INTEGER NOT NULL,
    size             INTEGER NOT NULL,
    hash             TEXT NOT NULL,
    redundancy_mode  TEXT NOT NULL,
    UNIQUE (stream_id, sequence_num)
);

CREATE TABLE IF NOT EXISTS nodes (
    node_id              TEXT PRIMARY KEY,
    url                  TEXT NOT NULL,
    version              TEXT NOT NULL,
    last_heartbeat_secs  INTEGER,
    disk_usage_fraction  REAL NOT NULL DEFAULT 0,
    chunk_count          INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS replicas (
    chunk_id  TEXT NOT NULL REFERENCES chunks(chunk_id),
    node_id   TEXT NOT NULL REFERENCES nodes(node_id),
    status    TEXT NOT NULL,
    ballot    INTEGER NOT NULL,
    PRIMARY KEY (chunk_id, node_id)
);

CREATE TABLE IF NOT EXISTS fragments (
    chunk_id        TEXT NOT NULL REFERENCES chunks(chunk_id),
    fragment_index  INTEGER NOT NULL,
    node_id         TEXT NOT NULL REFERENCES nodes(node_id),
    size            INTEGER NOT NULL,
    hash            TEXT NOT NULL,
    status          TEXT NOT NULL,
    PRIMARY KEY (chunk_id, fragment_index)
);

CREATE TABLE IF NOT EXISTS placement_proposals (
    chunk_id         TEXT PRIMARY KEY,
    promised_ballot  INTEGER NOT NULL DEFAULT 0,
    accepted_ballot  INTEGER NOT NULL DEFAULT 0,
    accepted_nodes   TEXT,
    phase            TEXT NOT NULL DEFAULT 'none'
);
"#;
