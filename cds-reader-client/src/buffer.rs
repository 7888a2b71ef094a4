//! Playout buffer state machine: modeled as a small state machine rather
//! than implicit boolean flags.

use std::collections::BTreeMap;

use cds_api_types::ChunkId;
use cds_config::ReaderConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Buffering,
    Playing,
    Stalled,
    Finished,
}

/// Holds complete chunks in sequence order and drives the
/// `{buffering, playing, stalled, finished}` transitions.
///
/// Carries no I/O of its own: [`PlayoutBuffer::push`] is fed finished
/// downloads by the scheduler, and [`PlayoutBuffer::tick`] is driven by the
/// session's playout clock.
pub struct PlayoutBuffer {
    chunk_duration_secs: f64,
    total_chunks: u64,
    start_playback_sec: f64,
    low_water_sec: f64,
    target_sec: f64,
    ready: BTreeMap<u64, ChunkId>,
    next_to_emit: u64,
    state: BufferState,
    stall_count: u64,
}

impl PlayoutBuffer {
    pub fn new(config: &ReaderConfig, chunk_duration_secs: f64, total_chunks: u64) -> Self {
        PlayoutBuffer {
            chunk_duration_secs,
            total_chunks,
            start_playback_sec: config.start_playback_sec,
            low_water_sec: config.low_water_sec,
            target_sec: config.target_sec,
            ready: BTreeMap::new(),
            next_to_emit: 0,
            state: BufferState::Buffering,
            stall_count: 0,
        }
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    pub fn stall_count(&self) -> u64 {
        self.stall_count
    }

    /// Seconds of contiguous, not-yet-emitted chunks starting at `next_to_emit`.
    pub fn buffered_secs(&self) -> f64 {
        let mut seq = self.next_to_emit;
        let mut count = 0u64;
        while self.ready.contains_key(&seq) {
            count += 1;
            seq += 1;
        }
        count as f64 * self.chunk_duration_secs
    }

    /// A completed chunk has arrived out of order; buffered until its turn.
    pub fn push(&mut self, sequence_num: u64, chunk_id: ChunkId) {
        self.ready.insert(sequence_num, chunk_id);
        if self.state == BufferState::Buffering && self.buffered_secs() >= self.start_playback_sec {
            self.state = BufferState::Playing;
        } else if self.state == BufferState::Stalled && self.ready.contains_key(&self.next_to_emit) {
            self.state = BufferState::Playing;
        }
    }

    /// Playout clock demands the next chunk; returns it if ready, else
    /// transitions to `stalled` and returns `None`.
    pub fn tick(&mut self) -> Option<ChunkId> {
        if self.state == BufferState::Finished {
            return None;
        }
        match self.ready.remove(&self.next_to_emit) {
            Some(chunk_id) => {
                self.next_to_emit += 1;
                if self.next_to_emit >= self.total_chunks {
                    self.state = BufferState::Finished;
                } else if self.state != BufferState::Buffering {
                    self.state = BufferState::Playing;
                }
                Some(chunk_id)
            }
            None => {
                if self.state == BufferState::Playing {
                    self.state = BufferState::Stalled;
                    self.stall_count += 1;
                }
                None
            }
        }
    }

    /// Whether the reader should prioritize refilling over prefetch.
    pub fn needs_refill(&self) -> bool {
        self.buffered_secs() < self.low_water_sec
    }

    /// Whether prefetch should pause (soft upper bound reached).
    pub fn is_prefetch_saturated(&self) -> bool {
        self.buffered_secs() >= self.target_sec
    }

    pub fn next_to_emit(&self) -> u64 {
        self.next_to_emit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(n: u64) -> ChunkId {
        ChunkId::parse(format!("c{n}")).unwrap()
    }

    fn config() -> ReaderConfig {
        ReaderConfig {
            start_playback_sec: 2.0,
            low_water_sec: 3.0,
            target_sec: 5.0,
            ..ReaderConfig::default()
        }
    }

    #[test]
    fn starts_playing_once_start_threshold_reached() {
        let mut buf = PlayoutBuffer::new(&config(), 1.0, 10);
        assert_eq!(buf.state(), BufferState::Buffering);
        buf.push(0, chunk(0));
        assert_eq!(buf.state(), BufferState::Buffering);
        buf.push(1, chunk(1));
        assert_eq!(buf.state(), BufferState::Playing);
    }

    #[test]
    fn stalls_when_next_chunk_missing_then_recovers() {
        let mut buf = PlayoutBuffer::new(&config(), 1.0, 10);
        buf.push(0, chunk(0));
        buf.push(1, chunk(1));
        assert_eq!(buf.tick(), Some(chunk(0)));
        assert_eq!(buf.tick(), Some(chunk(1)));
        assert_eq!(buf.tick(), None);
        assert_eq!(buf.state(), BufferState::Stalled);
        assert_eq!(buf.stall_count(), 1);

        buf.push(2, chunk(2));
        assert_eq!(buf.state(), BufferState::Playing);
        assert_eq!(buf.tick(), Some(chunk(2)));
    }

    #[test]
    fn never_emits_out_of_sequence_order() {
        let mut buf = PlayoutBuffer::new(&config(), 1.0, 3);
        buf.push(1, chunk(1));
        buf.push(0, chunk(0));
        buf.push(2, chunk(2));
        assert_eq!(buf.tick(), Some(chunk(0)));
        assert_eq!(buf.tick(), Some(chunk(1)));
        assert_eq!(buf.tick(), Some(chunk(2)));
        assert_eq!(buf.state(), BufferState::Finished);
    }
}
