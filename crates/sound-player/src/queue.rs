//! Bounded queue of interleaved samples between [`crate::cpal_sink::CpalSink::writei`]
//! and the CPAL output callback.
//!
//! The writer blocks (with a timeout) until at least one frame of space is
//! free and then takes as many whole frames as fit, which is what gives the
//! sink its partial-write behavior. The callback side never blocks.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Thread-safe bounded queue for interleaved `f32` samples.
///
/// Samples are stored interleaved (`frame0[ch0], frame0[ch1], frame1[ch0], ...`)
/// and always pushed and popped in whole frames.
pub struct SampleQueue {
    channels: usize,
    capacity_frames: usize,
    inner: Mutex<QueueInner>,
    cv: Condvar,
}

struct QueueInner {
    samples: VecDeque<f32>,
    closed: bool,
}

impl SampleQueue {
    pub fn new(channels: usize, capacity_frames: usize) -> Self {
        let channels = channels.max(1);
        let capacity_frames = capacity_frames.max(1);
        Self {
            channels,
            capacity_frames,
            inner: Mutex::new(QueueInner {
                samples: VecDeque::with_capacity(capacity_frames * channels),
                closed: false,
            }),
            cv: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn capacity_frames(&self) -> usize {
        self.capacity_frames
    }

    /// Current buffered frames (best-effort snapshot).
    pub fn len_frames(&self) -> usize {
        self.lock().samples.len() / self.channels
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Mark the queue closed and wake a blocked writer. Idempotent.
    pub fn close(&self) {
        self.lock().closed = true;
        self.cv.notify_all();
    }

    /// Drop everything buffered.
    pub fn clear(&self) {
        self.lock().samples.clear();
        self.cv.notify_all();
    }

    /// Push whole frames from `samples`, waiting up to `timeout` for space.
    ///
    /// Returns the number of frames taken: 0 when the queue stayed full for the
    /// whole timeout or is closed.
    pub fn push_available(&self, samples: &[f32], timeout: Duration) -> usize {
        let offered = samples.len() / self.channels;
        if offered == 0 {
            return 0;
        }
        let deadline = Instant::now() + timeout;
        let cap = self.capacity_frames * self.channels;

        let mut g = self.lock();
        while !g.closed && g.samples.len() + self.channels > cap {
            let now = Instant::now();
            if now >= deadline {
                return 0;
            }
            g = self
                .cv
                .wait_timeout(g, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        if g.closed {
            return 0;
        }

        let free_frames = (cap - g.samples.len()) / self.channels;
        let take = offered.min(free_frames);
        g.samples
            .extend(samples[..take * self.channels].iter().copied());
        take
    }

    /// Pop up to `out.len()` samples (whole frames only) without blocking.
    ///
    /// Returns the number of samples written to the front of `out`.
    pub fn pop_into(&self, out: &mut [f32]) -> usize {
        let mut g = self.lock();
        let n = out.len().min(g.samples.len()) / self.channels * self.channels;
        for (dst, src) in out[..n].iter_mut().zip(g.samples.drain(..n)) {
            *dst = src;
        }
        drop(g);
        if n > 0 {
            self.cv.notify_all();
        }
        n
    }
}
