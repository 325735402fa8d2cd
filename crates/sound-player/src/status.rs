use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::position::PlaybackPosition;

/// Coarse player state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

impl PlaybackState {
    pub fn from_flags(playing: bool, paused: bool) -> Self {
        match (playing, paused) {
            (false, _) => PlaybackState::Stopped,
            (true, false) => PlaybackState::Playing,
            (true, true) => PlaybackState::Paused,
        }
    }
}

/// Counters updated by the playback thread.
#[derive(Debug, Default)]
pub struct SessionCounters {
    /// Frames accepted by the sink.
    pub frames_written: AtomicU64,
    /// Chunks read short and skipped.
    pub short_reads: AtomicU64,
    /// Underruns recovered by re-preparing the sink.
    pub underrun_events: AtomicU64,
    /// Writes that failed for any reason.
    pub write_failures: AtomicU64,
}

impl SessionCounters {
    /// Zero all counters at the start of a session.
    pub fn reset(&self) {
        self.frames_written.store(0, Ordering::Relaxed);
        self.short_reads.store(0, Ordering::Relaxed);
        self.underrun_events.store(0, Ordering::Relaxed);
        self.write_failures.store(0, Ordering::Relaxed);
    }
}

/// Snapshot returned to callers and front ends.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlayerStatus {
    pub name: String,
    pub state: PlaybackState,
    pub paused: bool,
    pub current_second: u64,
    pub total_seconds: u64,
    /// `current_second` formatted as `H:MM:SS`.
    pub position: String,
    pub message: String,
    pub saved_streams: usize,
    pub frames_written: u64,
    pub short_reads: u64,
    pub underrun_events: u64,
    pub write_failures: u64,
}

/// Inputs for [`PlayerStatus::capture`] that do not live in the counters.
pub(crate) struct StatusFields<'a> {
    pub name: &'a str,
    pub playing: bool,
    pub paused: bool,
    pub current_second: u64,
    pub total_seconds: u64,
    pub message: String,
    pub saved_streams: usize,
}

impl PlayerStatus {
    pub(crate) fn capture(fields: StatusFields<'_>, counters: &SessionCounters) -> Self {
        Self {
            name: fields.name.to_string(),
            state: PlaybackState::from_flags(fields.playing, fields.paused),
            paused: fields.paused,
            current_second: fields.current_second,
            total_seconds: fields.total_seconds,
            position: PlaybackPosition::from_seconds(fields.current_second).to_string(),
            message: fields.message,
            saved_streams: fields.saved_streams,
            frames_written: counters.frames_written.load(Ordering::Relaxed),
            short_reads: counters.short_reads.load(Ordering::Relaxed),
            underrun_events: counters.underrun_events.load(Ordering::Relaxed),
            write_failures: counters.write_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(playing: bool, paused: bool) -> StatusFields<'static> {
        StatusFields {
            name: "default",
            playing,
            paused,
            current_second: 125,
            total_seconds: 300,
            message: "Success".to_string(),
            saved_streams: 1,
        }
    }

    #[test]
    fn state_follows_flags() {
        assert_eq!(PlaybackState::from_flags(false, true), PlaybackState::Stopped);
        assert_eq!(PlaybackState::from_flags(true, false), PlaybackState::Playing);
        assert_eq!(PlaybackState::from_flags(true, true), PlaybackState::Paused);
    }

    #[test]
    fn capture_formats_position_and_counters() {
        let counters = SessionCounters::default();
        counters.frames_written.store(96_000, Ordering::Relaxed);
        counters.underrun_events.store(2, Ordering::Relaxed);

        let snap = PlayerStatus::capture(fields(true, false), &counters);
        assert_eq!(snap.position, "0:02:05");
        assert_eq!(snap.state, PlaybackState::Playing);
        assert_eq!(snap.frames_written, 96_000);
        assert_eq!(snap.underrun_events, 2);
    }

    #[test]
    fn reset_clears_counters() {
        let counters = SessionCounters::default();
        counters.short_reads.store(3, Ordering::Relaxed);
        counters.write_failures.store(4, Ordering::Relaxed);
        counters.reset();

        let snap = PlayerStatus::capture(fields(false, false), &counters);
        assert_eq!(snap.short_reads, 0);
        assert_eq!(snap.write_failures, 0);
        assert_eq!(snap.state, PlaybackState::Stopped);
    }

    #[test]
    fn snapshot_serializes_state_in_snake_case() {
        let snap = PlayerStatus::capture(fields(true, true), &SessionCounters::default());
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["state"], "paused");
        assert_eq!(json["message"], "Success");
    }
}
