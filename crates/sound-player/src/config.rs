use std::time::Duration;

/// Playback tuning parameters for a player session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlayerConfig {
    /// Audio duration read and written per loop iteration; also the pacing period.
    pub chunk: Duration,
    /// Target hardware buffer time in microseconds.
    pub buffer_time_us: u32,
    /// Consecutive failed writes tolerated before the session gives up.
    ///
    /// `None` retries forever.
    pub max_write_retries: Option<u32>,
    /// Upper bound on one paused wait before flags are re-checked.
    pub pause_poll: Duration,
}

impl Default for PlayerConfig {
    /// One-second chunks, 50ms hardware buffer time.
    fn default() -> Self {
        Self {
            chunk: Duration::from_secs(1),
            buffer_time_us: 50_000,
            max_write_retries: Some(64),
            pause_poll: Duration::from_millis(50),
        }
    }
}

impl PlayerConfig {
    /// Bytes per chunk for a stream, rounded down to whole frames (at least one frame).
    pub fn chunk_bytes(&self, byte_rate: u32, block_align: u16) -> usize {
        let align = usize::from(block_align.max(1));
        let bytes = (u128::from(byte_rate) * self.chunk.as_micros() / 1_000_000) as usize;
        (bytes / align).max(1) * align
    }
}
