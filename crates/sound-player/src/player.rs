//! Playback engine.
//!
//! A [`Player`] owns a sink and, while playing, one background thread that
//! runs the read → write → pace loop:
//! - read one chunk (default one second) from the active stream
//! - write it to the sink, retrying partial writes and re-preparing after underruns
//! - sleep off whatever is left of the chunk period
//! - stop by itself one second before the stream's reported end
//!
//! The controlling thread flips shared flags (`pause`, `resume`, `stop`) and
//! `stop` joins the thread, so once it returns the sink is closed and the
//! stream is no longer touched.
//!
//! `start` and `stop` must not be called concurrently from different threads;
//! every method taking `&mut self` already enforces that within safe code.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::config::PlayerConfig;
use crate::error::{HwStep, PlayerError, Result, SinkError, WriteError};
use crate::negotiate;
use crate::position::PlaybackPosition;
use crate::sink::Sink;
use crate::status::{PlayerStatus, SessionCounters, StatusFields};
use crate::stream::{SharedStream, SoundStream, StreamStack};

/// Message recorded by a successful start.
pub const SUCCESS: &str = "Success";

/// State shared between the controller and the playback thread.
struct Shared {
    playing: AtomicBool,
    paused: Mutex<bool>,
    pause_cv: Condvar,
    message: Mutex<String>,
    stream: Mutex<Option<SharedStream>>,
    counters: SessionCounters,
}

impl Shared {
    fn new() -> Self {
        Self {
            playing: AtomicBool::new(false),
            paused: Mutex::new(false),
            pause_cv: Condvar::new(),
            message: Mutex::new(String::new()),
            stream: Mutex::new(None),
            counters: SessionCounters::default(),
        }
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Release);
    }

    fn is_paused(&self) -> bool {
        *lock(&self.paused)
    }

    fn set_paused(&self, paused: bool) {
        *lock(&self.paused) = paused;
        self.pause_cv.notify_all();
    }

    /// Set the paused flag only while a session is playing.
    ///
    /// The playing check runs under the pause lock, so a session that is
    /// exiting either sees the flag and clears it or is seen as stopped.
    fn pause_if_playing(&self) {
        let mut paused = lock(&self.paused);
        if self.is_playing() {
            *paused = true;
        }
    }

    /// Wait up to `poll` while paused. Returns whether the player was paused.
    fn wait_while_paused(&self, poll: Duration) -> bool {
        let paused = lock(&self.paused);
        if !*paused {
            return false;
        }
        let _ = self
            .pause_cv
            .wait_timeout(paused, poll)
            .unwrap_or_else(PoisonError::into_inner);
        true
    }

    fn message(&self) -> String {
        lock(&self.message).clone()
    }

    fn set_message(&self, message: impl Into<String>) {
        *lock(&self.message) = message.into();
    }

    fn stream(&self) -> Option<SharedStream> {
        lock(&self.stream).clone()
    }

    fn set_stream(&self, stream: Option<SharedStream>) {
        *lock(&self.stream) = stream;
    }

    fn has_stream(&self) -> bool {
        lock(&self.stream).is_some()
    }

    /// Query the active stream, or return `default` when none is set.
    fn with_stream<R>(&self, default: R, f: impl FnOnce(&mut dyn SoundStream) -> R) -> R {
        match self.stream() {
            Some(stream) => f(&mut *lock(&stream)),
            None => default,
        }
    }
}

fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Real-time PCM player driving a [`Sink`] from the active [`SoundStream`].
pub struct Player<S: Sink + 'static> {
    name: String,
    shared: Arc<Shared>,
    stack: StreamStack,
    sink: Arc<Mutex<S>>,
    session: Option<JoinHandle<()>>,
    config: PlayerConfig,
    clock: Arc<dyn Clock>,
}

impl<S: Sink + 'static> Player<S> {
    /// Create a stopped player. `name` is passed to [`Sink::open`] on every start.
    pub fn new(name: impl Into<String>, sink: S) -> Self {
        Self {
            name: name.into(),
            shared: Arc::new(Shared::new()),
            stack: StreamStack::new(),
            sink: Arc::new(Mutex::new(sink)),
            session: None,
            config: PlayerConfig::default(),
            clock: Arc::new(SystemClock::new()),
        }
    }

    pub fn with_config(mut self, config: PlayerConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the pacing clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn is_playing(&self) -> bool {
        self.shared.is_playing()
    }

    pub fn is_paused(&self) -> bool {
        self.shared.is_paused()
    }

    /// Outcome of the last start, or the error that ended the last session.
    pub fn error_msg(&self) -> String {
        self.shared.message()
    }

    /// Install `stream` as the active stream (or clear it).
    ///
    /// A running session picks the new stream up on its next chunk.
    pub fn set_stream(&self, stream: Option<SharedStream>) {
        self.shared.set_stream(stream);
    }

    pub fn stream(&self) -> Option<SharedStream> {
        self.shared.stream()
    }

    /// Push the active stream onto the stack. The active stream stays in place.
    pub fn save_stream(&mut self) {
        if let Some(stream) = self.shared.stream() {
            self.stack.push(stream);
        }
    }

    /// Pop the most recently saved stream and make it active. No-op on an empty stack.
    pub fn restore_stream(&mut self) {
        if let Some(stream) = self.stack.pop() {
            self.shared.set_stream(Some(stream));
        }
    }

    pub fn saved_streams(&self) -> usize {
        self.stack.len()
    }

    /// Start playback. Returns `false` and records the reason in [`Player::error_msg`]
    /// on failure.
    pub fn start(&mut self) -> bool {
        match self.try_start() {
            Ok(()) => true,
            Err(e) => {
                self.shared.set_message(e.to_string());
                false
            }
        }
    }

    /// Start playback, returning the typed error on failure.
    ///
    /// Nothing is spawned unless the sink opened and accepted its parameters.
    pub fn try_start(&mut self) -> Result<()> {
        if self.shared.is_playing() {
            return Err(PlayerError::AlreadyPlaying);
        }
        // A finished session may still be unwinding its exit path.
        self.join_session();

        let stream = self.shared.stream().ok_or(PlayerError::StreamNotSet)?;
        let (chunk_bytes, byte_rate) = {
            let s = lock(&stream);
            (
                self.config.chunk_bytes(s.byte_rate(), s.block_align()),
                s.byte_rate(),
            )
        };

        {
            let mut sink = lock(&self.sink);
            sink.open(&self.name).map_err(PlayerError::SinkOpen)?;
            if let Err(e) = self.configure_sink(&mut *sink, &stream) {
                sink.close();
                return Err(e);
            }
        }

        self.shared.counters.reset();
        self.shared.set_paused(false);
        self.shared.set_playing(true);
        // Recorded before the thread exists so a session that fails at once
        // keeps its own message.
        self.shared.set_message(SUCCESS);

        let session = Session {
            shared: self.shared.clone(),
            sink: self.sink.clone(),
            clock: self.clock.clone(),
            config: self.config.clone(),
            chunk_bytes,
        };
        let spawned = std::thread::Builder::new()
            .name(format!("player-{}", self.name))
            .spawn(move || session.main());
        match spawned {
            Ok(handle) => self.session = Some(handle),
            Err(e) => {
                self.shared.set_playing(false);
                lock(&self.sink).close();
                let err = PlayerError::Spawn(e.to_string());
                self.shared.set_message(err.to_string());
                return Err(err);
            }
        }

        tracing::info!(
            player = %self.name,
            byte_rate,
            chunk_bytes,
            "playback started"
        );
        Ok(())
    }

    fn configure_sink(&self, sink: &mut S, stream: &SharedStream) -> Result<()> {
        let mut params = sink
            .hw_params()
            .map_err(|e| PlayerError::hw(HwStep::Apply, e))?;
        {
            let s = lock(stream);
            negotiate::configure(&mut params, Some(&*s), self.config.buffer_time_us)?;
        }
        sink.set_hw_params(params)
            .map_err(|e| PlayerError::hw(HwStep::Apply, e))
    }

    /// Stop playback and wait for the playback thread to exit.
    ///
    /// When this returns the sink is closed. Safe to call when already stopped.
    pub fn stop(&mut self) {
        self.shared.set_playing(false);
        self.shared.set_paused(false);
        self.join_session();
    }

    fn join_session(&mut self) {
        if let Some(handle) = self.session.take() {
            if handle.join().is_err() {
                tracing::warn!(player = %self.name, "playback thread panicked");
            }
        }
    }

    /// Pause output. The playback thread keeps running and holds its position.
    ///
    /// No-op unless a stream is set and a session is playing.
    pub fn pause(&self) {
        if self.shared.has_stream() {
            self.shared.pause_if_playing();
        }
    }

    pub fn resume(&self) {
        if self.shared.has_stream() {
            self.shared.set_paused(false);
        }
    }

    /// Seek the active stream to `pos`, pausing around the seek. Playback is
    /// resumed afterwards.
    pub fn set_play_pos(&self, pos: PlaybackPosition) {
        self.pause();
        if let Some(stream) = self.shared.stream() {
            lock(&stream).set_pos(pos.to_seconds());
            tracing::debug!(player = %self.name, position = %pos, "seek");
        }
        self.resume();
    }

    /// Elapsed seconds of the active stream, 0 without one.
    pub fn current_second(&self) -> u64 {
        self.shared.with_stream(0, |s| s.pos())
    }

    pub fn current_pos(&self) -> PlaybackPosition {
        PlaybackPosition::from_seconds(self.current_second())
    }

    /// Total seconds of the active stream, 0 without one.
    pub fn total_seconds(&self) -> u64 {
        self.shared.with_stream(0, |s| s.total())
    }

    pub fn status(&self) -> PlayerStatus {
        let (current_second, total_seconds) = self.shared.with_stream((0, 0), |s| (s.pos(), s.total()));
        PlayerStatus::capture(
            StatusFields {
                name: &self.name,
                playing: self.is_playing(),
                paused: self.is_paused(),
                current_second,
                total_seconds,
                message: self.shared.message(),
                saved_streams: self.stack.len(),
            },
            &self.shared.counters,
        )
    }
}

impl<S: Sink + 'static> Drop for Player<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Why a session loop ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Stopped,
    EndOfStream,
    StreamRemoved,
}

/// Everything the playback thread needs, moved into it at start.
struct Session<S: Sink> {
    shared: Arc<Shared>,
    sink: Arc<Mutex<S>>,
    clock: Arc<dyn Clock>,
    config: PlayerConfig,
    chunk_bytes: usize,
}

/// Clears the playing and paused flags when the thread leaves, even on panic.
struct ResetFlags(Arc<Shared>);

impl Drop for ResetFlags {
    fn drop(&mut self) {
        self.0.set_playing(false);
        self.0.set_paused(false);
    }
}

/// Closes the sink exactly once when dropped.
struct CloseOnDrop<'a, S: Sink>(&'a mut S);

impl<S: Sink> Drop for CloseOnDrop<'_, S> {
    fn drop(&mut self) {
        self.0.close();
    }
}

impl<S: Sink> Deref for CloseOnDrop<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.0
    }
}

impl<S: Sink> DerefMut for CloseOnDrop<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.0
    }
}

impl<S: Sink> Session<S> {
    fn main(self) {
        let _reset = ResetFlags(self.shared.clone());
        let mut guard = lock(&self.sink);
        let mut sink = CloseOnDrop(&mut *guard);

        match self.run(&mut sink) {
            Ok(end) => tracing::info!(reason = ?end, "playback finished"),
            Err(e) => {
                tracing::warn!("playback aborted: {e}");
                self.shared.set_message(e.to_string());
            }
        }
    }

    fn run(&self, sink: &mut S) -> Result<SessionEnd> {
        sink.prepare().map_err(PlayerError::SinkPrepare)?;
        let mut buffer = vec![0u8; self.chunk_bytes];

        loop {
            if !self.shared.is_playing() {
                return Ok(SessionEnd::Stopped);
            }
            if self.shared.wait_while_paused(self.config.pause_poll) {
                continue;
            }
            let Some(stream) = self.shared.stream() else {
                return Ok(SessionEnd::StreamRemoved);
            };

            let started = self.clock.now();
            let (read, block_align) = {
                let mut s = lock(&stream);
                (s.read(&mut buffer), s.block_align())
            };
            if read == buffer.len() {
                self.write_chunk(sink, &buffer, block_align)?;
            } else {
                self.shared
                    .counters
                    .short_reads
                    .fetch_add(1, Ordering::Relaxed);
                tracing::trace!(read, wanted = buffer.len(), "short read, chunk skipped");
            }

            let elapsed = self.clock.now().saturating_sub(started);
            if elapsed < self.config.chunk {
                self.clock.sleep(self.config.chunk - elapsed);
            }

            let (pos, total) = {
                let s = lock(&stream);
                (s.pos(), s.total())
            };
            if pos >= total.saturating_sub(1) {
                return Ok(SessionEnd::EndOfStream);
            }
        }
    }

    /// Write one chunk, retrying until every frame is accepted.
    ///
    /// Bails out quietly when playback is stopped mid-chunk.
    fn write_chunk(&self, sink: &mut S, buf: &[u8], block_align: u16) -> Result<()> {
        let counters = &self.shared.counters;
        let step = usize::from(block_align);
        let mut frames = sink.bytes_to_frames(buf.len());
        let mut offset = 0usize;
        let mut failures = 0u32;

        while frames > 0 {
            if !self.shared.is_playing() {
                return Ok(());
            }
            let err = match sink.writei(&buf[offset..], frames) {
                Ok(0) => WriteError::Failed(SinkError::new("sink accepted no frames")),
                Ok(written) => {
                    let written = written.min(frames);
                    offset = (offset + written * step).min(buf.len());
                    frames -= written;
                    failures = 0;
                    counters
                        .frames_written
                        .fetch_add(written as u64, Ordering::Relaxed);
                    continue;
                }
                Err(WriteError::Underrun) => {
                    counters.underrun_events.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(remaining_frames = frames, "underrun, re-preparing sink");
                    if let Err(e) = sink.prepare() {
                        tracing::warn!("re-prepare after underrun failed: {e}");
                    }
                    WriteError::Underrun
                }
                Err(e) => {
                    tracing::debug!("write failed: {e}");
                    e
                }
            };

            counters.write_failures.fetch_add(1, Ordering::Relaxed);
            failures = failures.saturating_add(1);
            if let Some(max) = self.config.max_write_retries {
                if failures > max {
                    return Err(PlayerError::SinkWrite {
                        attempts: failures,
                        source: err,
                    });
                }
            }
        }
        Ok(())
    }
}
