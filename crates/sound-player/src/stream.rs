//! Sound stream boundary and the save/restore stream stack.
//!
//! A [`SoundStream`] hands out raw interleaved PCM bytes and tracks its own
//! position in whole seconds. The player never owns a stream: it holds a
//! [`SharedStream`] handle while the caller keeps its own clone.

use std::sync::{Arc, Mutex};

/// Source of raw PCM bytes consumed by the player.
pub trait SoundStream: Send {
    /// Bytes per second of audio.
    fn byte_rate(&self) -> u32;
    /// Bytes per frame (all channels of one sample).
    fn block_align(&self) -> u16;
    fn channels(&self) -> u16;
    fn sample_rate(&self) -> u32;
    fn bits_per_sample(&self) -> u16;
    /// Fill `buf` from the current position and return the number of bytes read.
    ///
    /// Fewer bytes than `buf.len()` means end of stream or a transient short read.
    fn read(&mut self, buf: &mut [u8]) -> usize;
    /// Elapsed position in seconds.
    fn pos(&self) -> u64;
    /// Total duration in seconds.
    fn total(&self) -> u64;
    /// Move to `seconds` from the start.
    fn set_pos(&mut self, seconds: u64);
}

/// Shared, lockable stream handle.
pub type SharedStream = Arc<Mutex<dyn SoundStream>>;

/// Wrap a stream into a [`SharedStream`] handle.
pub fn shared<T: SoundStream + 'static>(stream: T) -> SharedStream {
    Arc::new(Mutex::new(stream))
}

/// Last-in-first-out stack of displaced stream handles.
#[derive(Default)]
pub struct StreamStack {
    items: Vec<SharedStream>,
}

impl StreamStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stream: SharedStream) {
        self.items.push(stream);
    }

    pub fn pop(&mut self) -> Option<SharedStream> {
        self.items.pop()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl std::fmt::Debug for StreamStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamStack")
            .field("len", &self.items.len())
            .finish()
    }
}
