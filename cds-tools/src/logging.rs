//! Logging setup shared by every binary.
//!
//! Follows `proxmox-restore-daemon/src/main.rs`'s
//! `env_logger::Builder::from_env(...)` idiom: daemons that run without a
//! real syslog fall back to `env_logger`; these daemons have no syslog
//! story at all, so every binary uses it uniformly.
use env_logger::Env;

/// Initialize `env_logger` with `default_level` unless `RUST_LOG` is set.
pub fn init_logging(default_level: &str) {
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();
}
