//! Adaptive reader core: probing, per-node scoring, bounded concurrent
//! downloads with failover, erasure reconstruction and the playout buffer
//! state machine. The `reader` binary is a thin CLI shell around
//! [`session::run_session`].

pub mod buffer;
pub mod client;
pub mod download;
pub mod erasure;
pub mod score;
pub mod session;
pub mod window;

pub use buffer::{BufferState, PlayoutBuffer};
pub use client::NodeHttpClient;
pub use score::ScoreTable;
pub use session::{run_session, SessionSummary};
