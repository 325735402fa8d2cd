//! Fake sink and in-memory stream shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::clock::ManualClock;
use crate::error::{HwStep, SinkError, WriteError};
use crate::sink::{Access, HwParams, SampleFormat, Sink};
use crate::stream::SoundStream;

/// Poll `cond` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamCall {
    Access(Access),
    Channels(u16),
    Format(SampleFormat),
    Rate(u32),
    BufferTime(u32),
    BufferSize(u64),
}

/// Parameter set that records each setter and can reject one step.
#[derive(Debug, Default)]
pub struct FakeParams {
    pub calls: Vec<ParamCall>,
    pub fail_at: Option<HwStep>,
    pub rate_override: Option<u32>,
    pub buffer_time_override: Option<u32>,
}

impl FakeParams {
    fn record(&mut self, step: HwStep, call: ParamCall) -> Result<(), SinkError> {
        self.calls.push(call);
        if self.fail_at == Some(step) {
            return Err(SinkError::new(format!("{step} rejected")));
        }
        Ok(())
    }
}

impl HwParams for FakeParams {
    fn set_access(&mut self, access: Access) -> Result<(), SinkError> {
        self.record(HwStep::Access, ParamCall::Access(access))
    }

    fn set_channels(&mut self, channels: u16) -> Result<(), SinkError> {
        self.record(HwStep::Channels, ParamCall::Channels(channels))
    }

    fn set_format(&mut self, format: SampleFormat) -> Result<(), SinkError> {
        self.record(HwStep::Format, ParamCall::Format(format))
    }

    fn set_rate_near(&mut self, rate: u32) -> Result<u32, SinkError> {
        self.record(HwStep::Rate, ParamCall::Rate(rate))?;
        Ok(self.rate_override.unwrap_or(rate))
    }

    fn set_buffer_time_near(&mut self, micros: u32) -> Result<u32, SinkError> {
        self.record(HwStep::BufferTime, ParamCall::BufferTime(micros))?;
        Ok(self.buffer_time_override.unwrap_or(micros))
    }

    fn set_buffer_size_near(&mut self, frames: u64) -> Result<u64, SinkError> {
        self.record(HwStep::BufferSize, ParamCall::BufferSize(frames))?;
        Ok(frames)
    }
}

/// Everything the fake sink observed, shared with the test body.
#[derive(Debug, Default)]
pub struct SinkLog {
    pub opened: Vec<String>,
    pub is_open: bool,
    pub close_calls: usize,
    pub prepare_calls: usize,
    pub write_calls: usize,
    pub written: Vec<u8>,
    pub params: Vec<ParamCall>,
}

/// Scripted sink. Each write pops the next scripted outcome; `Ok(n)` accepts up
/// to `n` frames. An empty script accepts every frame.
pub struct FakeSink {
    pub log: Arc<Mutex<SinkLog>>,
    pub script: VecDeque<Result<usize, WriteError>>,
    pub fail_open: Option<String>,
    pub fail_param: Option<HwStep>,
    pub fail_prepare: bool,
    pub fail_writes_forever: bool,
    pub frame_bytes: usize,
    pub write_cost: Option<(Arc<ManualClock>, Duration)>,
}

impl FakeSink {
    pub fn new() -> (Self, Arc<Mutex<SinkLog>>) {
        let log = Arc::new(Mutex::new(SinkLog::default()));
        let sink = Self {
            log: log.clone(),
            script: VecDeque::new(),
            fail_open: None,
            fail_param: None,
            fail_prepare: false,
            fail_writes_forever: false,
            frame_bytes: 1,
            write_cost: None,
        };
        (sink, log)
    }
}

impl Sink for FakeSink {
    type Params = FakeParams;

    fn open(&mut self, name: &str) -> Result<(), SinkError> {
        if let Some(msg) = &self.fail_open {
            return Err(SinkError::new(msg.clone()));
        }
        let mut log = self.log.lock().unwrap();
        log.opened.push(name.to_string());
        log.is_open = true;
        Ok(())
    }

    fn hw_params(&mut self) -> Result<FakeParams, SinkError> {
        Ok(FakeParams {
            fail_at: self.fail_param,
            ..FakeParams::default()
        })
    }

    fn set_hw_params(&mut self, params: FakeParams) -> Result<(), SinkError> {
        self.log.lock().unwrap().params = params.calls;
        Ok(())
    }

    fn prepare(&mut self) -> Result<(), SinkError> {
        self.log.lock().unwrap().prepare_calls += 1;
        if self.fail_prepare {
            return Err(SinkError::new("prepare refused"));
        }
        Ok(())
    }

    fn writei(&mut self, buf: &[u8], frames: usize) -> Result<usize, WriteError> {
        if let Some((clock, cost)) = &self.write_cost {
            clock.advance(*cost);
        }
        let mut log = self.log.lock().unwrap();
        log.write_calls += 1;
        if self.fail_writes_forever {
            drop(log);
            std::thread::yield_now();
            return Err(SinkError::new("device unplugged").into());
        }
        let accepted = match self.script.pop_front() {
            None => frames,
            Some(Ok(n)) => n.min(frames),
            Some(Err(e)) => return Err(e),
        };
        log.written
            .extend_from_slice(&buf[..accepted * self.frame_bytes]);
        Ok(accepted)
    }

    fn bytes_to_frames(&self, bytes: usize) -> usize {
        bytes / self.frame_bytes
    }

    fn close(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.close_calls += 1;
        log.is_open = false;
    }
}

/// Counters observed on a [`MemoryStream`].
#[derive(Debug, Default)]
pub struct StreamProbe {
    pub reads: AtomicUsize,
    pub seeks: Mutex<Vec<u64>>,
}

impl StreamProbe {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

/// In-memory PCM stream producing a repeating byte pattern.
#[derive(Debug)]
pub struct MemoryStream {
    channels: u16,
    sample_rate: u32,
    bits: u16,
    block_align: u16,
    byte_rate: u32,
    total_seconds: u64,
    pos_bytes: u64,
    short_reads_left: usize,
    pub probe: Arc<StreamProbe>,
}

impl MemoryStream {
    /// Mono 8-bit stream where `byte_rate` bytes make one second.
    pub fn silent(total_seconds: u64, byte_rate: u32) -> Self {
        Self {
            channels: 1,
            sample_rate: byte_rate,
            bits: 8,
            block_align: 1,
            byte_rate,
            total_seconds,
            pos_bytes: 0,
            short_reads_left: 0,
            probe: Arc::new(StreamProbe::default()),
        }
    }

    /// A stream long enough that no test reaches its end.
    pub fn endless(byte_rate: u32) -> Self {
        Self::silent(1_000_000_000, byte_rate)
    }

    pub fn with_format(mut self, channels: u16, sample_rate: u32, bits: u16) -> Self {
        self.channels = channels;
        self.sample_rate = sample_rate;
        self.bits = bits;
        self.block_align = channels * bits / 8;
        self.byte_rate = sample_rate * u32::from(self.block_align);
        self
    }

    /// The next `count` reads return only half of the requested bytes.
    pub fn with_short_reads(mut self, count: usize) -> Self {
        self.short_reads_left = count;
        self
    }

    pub fn probe(&self) -> Arc<StreamProbe> {
        self.probe.clone()
    }

    fn total_bytes(&self) -> u64 {
        self.total_seconds * u64::from(self.byte_rate)
    }
}

impl SoundStream for MemoryStream {
    fn byte_rate(&self) -> u32 {
        self.byte_rate
    }

    fn block_align(&self) -> u16 {
        self.block_align
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn bits_per_sample(&self) -> u16 {
        self.bits
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        self.probe.reads.fetch_add(1, Ordering::SeqCst);
        let remaining = self.total_bytes().saturating_sub(self.pos_bytes);
        let mut want = buf.len();
        if self.short_reads_left > 0 {
            self.short_reads_left -= 1;
            want /= 2;
        }
        let n = (want as u64).min(remaining) as usize;
        for (i, b) in buf[..n].iter_mut().enumerate() {
            *b = ((self.pos_bytes + i as u64) % 251) as u8;
        }
        self.pos_bytes += n as u64;
        n
    }

    fn pos(&self) -> u64 {
        self.pos_bytes / u64::from(self.byte_rate.max(1))
    }

    fn total(&self) -> u64 {
        self.total_seconds
    }

    fn set_pos(&mut self, seconds: u64) {
        self.probe.seeks.lock().unwrap().push(seconds);
        self.pos_bytes = (seconds * u64::from(self.byte_rate)).min(self.total_bytes());
    }
}
