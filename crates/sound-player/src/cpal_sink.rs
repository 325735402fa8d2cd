//! [`Sink`] backed by a CPAL output stream.
//!
//! The CPAL stream is not `Send` on every platform, so it lives on a
//! dedicated output thread for as long as the sink is configured. Frames
//! written with [`CpalSink::writei`] are converted to `f32` and handed to the
//! stream callback through a bounded [`SampleQueue`].
//!
//! Underruns follow the usual PCM contract: once the callback had to play
//! silence after data was written, every write fails with
//! [`WriteError::Underrun`] until [`Sink::prepare`] is called again.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};

use crate::device;
use crate::error::{SinkError, WriteError};
use crate::queue::SampleQueue;
use crate::sink::{Access, HwParams, SampleFormat, Sink};

/// Longest a single write waits for queue space before reporting zero frames.
const WRITE_TIMEOUT: Duration = Duration::from_millis(500);

/// Underrun flags shared with the output callback.
#[derive(Debug, Default)]
struct XrunState {
    /// Set once data was written since the last prepare.
    armed: AtomicBool,
    /// Set by the callback when it ran dry while armed.
    underrun: AtomicBool,
    events: AtomicU64,
}

/// Everything the output thread needs to build its stream.
#[derive(Clone, Debug)]
struct OutputSpec {
    device: Option<String>,
    config: cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
}

struct OutputThread {
    stop_tx: Sender<()>,
    join: JoinHandle<()>,
}

/// Hardware parameters negotiated against a device's supported output configs.
#[derive(Clone, Debug)]
pub struct CpalHwParams {
    ranges: Vec<cpal::SupportedStreamConfigRange>,
    channels: Option<u16>,
    /// Channels the device stream runs with; differs from `channels` when mono is upmixed.
    device_channels: Option<u16>,
    format: Option<SampleFormat>,
    chosen: Option<usize>,
    rate: Option<u32>,
    period_frames: Option<u32>,
    buffer_frames: Option<u64>,
}

impl CpalHwParams {
    pub fn new(ranges: Vec<cpal::SupportedStreamConfigRange>) -> Self {
        Self {
            ranges,
            channels: None,
            device_channels: None,
            format: None,
            chosen: None,
            rate: None,
            period_frames: None,
            buffer_frames: None,
        }
    }

    fn chosen_range(&self) -> Option<&cpal::SupportedStreamConfigRange> {
        self.chosen.and_then(|i| self.ranges.get(i))
    }
}

impl HwParams for CpalHwParams {
    fn set_access(&mut self, access: Access) -> Result<(), SinkError> {
        match access {
            Access::RwInterleaved => Ok(()),
        }
    }

    fn set_channels(&mut self, channels: u16) -> Result<(), SinkError> {
        let device_channels =
            device_channels_for(self.ranges.iter().map(|r| r.channels()), channels)
                .ok_or_else(|| {
                    SinkError::new(format!("{channels} channel output not supported by device"))
                })?;
        self.ranges.retain(|r| r.channels() == device_channels);
        self.channels = Some(channels);
        self.device_channels = Some(device_channels);
        Ok(())
    }

    fn set_format(&mut self, format: SampleFormat) -> Result<(), SinkError> {
        self.ranges
            .retain(|r| device::sample_format_rank(r.sample_format()).is_some());
        if self.ranges.is_empty() {
            return Err(SinkError::new("no supported output sample format"));
        }
        self.format = Some(format);
        Ok(())
    }

    fn set_rate_near(&mut self, rate: u32) -> Result<u32, SinkError> {
        let mut best: Option<(u32, u8, usize, u32)> = None;
        for (i, range) in self.ranges.iter().enumerate() {
            let Some(rank) = device::sample_format_rank(range.sample_format()) else {
                continue;
            };
            let candidate =
                device::nearest_rate(range.min_sample_rate(), range.max_sample_rate(), rate);
            let distance = candidate.abs_diff(rate);
            let replace = match &best {
                None => true,
                Some((b_distance, b_rank, _, _)) => {
                    device::is_better_candidate(distance, rank, *b_distance, *b_rank)
                }
            };
            if replace {
                best = Some((distance, rank, i, candidate));
            }
        }
        let (_, _, index, chosen) =
            best.ok_or_else(|| SinkError::new("no output config available for rate"))?;
        self.chosen = Some(index);
        self.rate = Some(chosen);
        Ok(chosen)
    }

    fn set_buffer_time_near(&mut self, micros: u32) -> Result<u32, SinkError> {
        let rate = self
            .rate
            .ok_or_else(|| SinkError::new("rate must be set before buffer time"))?;
        let wanted = (u64::from(rate) * u64::from(micros) / 1_000_000).max(1) as u32;
        let frames = match self.chosen_range().map(|r| r.buffer_size().clone()) {
            Some(cpal::SupportedBufferSize::Range { min, max }) => wanted.clamp(min, max.max(min)),
            _ => wanted,
        };
        self.period_frames = Some(frames);
        Ok((u64::from(frames) * 1_000_000 / u64::from(rate.max(1))) as u32)
    }

    fn set_buffer_size_near(&mut self, frames: u64) -> Result<u64, SinkError> {
        let period = u64::from(self.period_frames.unwrap_or(1));
        let frames = frames.max(period * 2);
        self.buffer_frames = Some(frames);
        Ok(frames)
    }
}

/// Audio sink writing to a CPAL output device.
pub struct CpalSink {
    device: Option<String>,
    open: bool,
    format: SampleFormat,
    channels: u16,
    device_channels: u16,
    queue: Option<Arc<SampleQueue>>,
    xrun: Arc<XrunState>,
    output: Option<OutputThread>,
}

impl CpalSink {
    pub fn new() -> Self {
        Self {
            device: None,
            open: false,
            format: SampleFormat::S16Le,
            channels: 2,
            device_channels: 2,
            queue: None,
            xrun: Arc::new(XrunState::default()),
            output: None,
        }
    }

    /// Resolved device name after [`Sink::open`] (`None` for the host default).
    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    /// Underruns observed by the output callback since the sink was created.
    pub fn underrun_events(&self) -> u64 {
        self.xrun.events.load(Ordering::Relaxed)
    }

    fn frame_bytes(&self) -> usize {
        usize::from(self.channels) * self.format.bytes_per_sample()
    }

    fn stop_output(&mut self) {
        if let Some(queue) = self.queue.take() {
            queue.close();
        }
        if let Some(out) = self.output.take() {
            let _ = out.stop_tx.send(());
            if out.join.join().is_err() {
                tracing::warn!("cpal output thread panicked");
            }
        }
    }
}

impl Default for CpalSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for CpalSink {
    type Params = CpalHwParams;

    fn open(&mut self, name: &str) -> Result<(), SinkError> {
        let host = cpal::default_host();
        let dev = device::pick_device(&host, Some(name)).map_err(to_sink_error)?;
        self.device = if device::is_default_name(name) {
            None
        } else {
            Some(device::device_name(&dev).map_err(to_sink_error)?)
        };
        self.open = true;
        tracing::info!(device = self.device.as_deref().unwrap_or("default"), "sink opened");
        Ok(())
    }

    fn hw_params(&mut self) -> Result<CpalHwParams, SinkError> {
        if !self.open {
            return Err(SinkError::new("sink not open"));
        }
        let host = cpal::default_host();
        let dev = device::pick_device(&host, self.device.as_deref()).map_err(to_sink_error)?;
        let ranges: Vec<_> = dev
            .supported_output_configs()
            .map_err(|e| SinkError::new(e.to_string()))?
            .collect();
        if ranges.is_empty() {
            return Err(SinkError::new("No supported output configs"));
        }
        Ok(CpalHwParams::new(ranges))
    }

    fn set_hw_params(&mut self, params: CpalHwParams) -> Result<(), SinkError> {
        let (Some(channels), Some(format), Some(rate), Some(range)) = (
            params.channels,
            params.format,
            params.rate,
            params.chosen_range().cloned(),
        ) else {
            return Err(SinkError::new("incomplete hardware parameters"));
        };
        self.stop_output();

        let buffer_size = match params.period_frames {
            Some(frames) if !matches!(range.buffer_size(), cpal::SupportedBufferSize::Unknown) => {
                cpal::BufferSize::Fixed(frames)
            }
            _ => cpal::BufferSize::Default,
        };
        let supported = range.with_sample_rate(rate);
        let sample_format = supported.sample_format();
        let mut config: cpal::StreamConfig = supported.into();
        config.buffer_size = buffer_size;
        let spec = OutputSpec {
            device: self.device.clone(),
            config,
            sample_format,
        };
        let device_channels = params.device_channels.unwrap_or(channels);
        let capacity = params.buffer_frames.unwrap_or(u64::from(rate)) as usize;
        let queue = Arc::new(SampleQueue::new(usize::from(device_channels), capacity));

        let output = spawn_output_thread(spec.clone(), queue.clone(), self.xrun.clone())
            .map_err(to_sink_error)?;
        tracing::debug!(
            channels,
            device_channels,
            rate,
            device_format = ?spec.sample_format,
            queue_frames = capacity,
            "cpal output configured"
        );

        self.channels = channels;
        self.device_channels = device_channels;
        self.format = format;
        self.queue = Some(queue);
        self.output = Some(output);
        Ok(())
    }

    fn prepare(&mut self) -> Result<(), SinkError> {
        if self.output.is_none() {
            return Err(SinkError::new("sink not configured"));
        }
        self.xrun.underrun.store(false, Ordering::Release);
        self.xrun.armed.store(false, Ordering::Release);
        Ok(())
    }

    fn writei(&mut self, buf: &[u8], frames: usize) -> Result<usize, WriteError> {
        let Some(queue) = self.queue.as_ref() else {
            return Err(SinkError::new("sink not configured").into());
        };
        if self.xrun.underrun.load(Ordering::Acquire) {
            return Err(WriteError::Underrun);
        }
        let bytes = (frames * self.frame_bytes()).min(buf.len());
        let samples = upmix(
            decode_samples(&buf[..bytes], self.format),
            self.channels,
            self.device_channels,
        );
        let written = queue.push_available(&samples, WRITE_TIMEOUT);
        if written > 0 {
            self.xrun.armed.store(true, Ordering::Release);
        }
        Ok(written)
    }

    fn bytes_to_frames(&self, bytes: usize) -> usize {
        bytes / self.frame_bytes().max(1)
    }

    fn close(&mut self) {
        self.stop_output();
        if self.open {
            tracing::info!(device = self.device.as_deref().unwrap_or("default"), "sink closed");
        }
        self.open = false;
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.stop_output();
    }
}

fn to_sink_error(e: anyhow::Error) -> SinkError {
    SinkError::new(format!("{e:#}"))
}

/// Convert U8 or S16LE interleaved bytes to `f32` samples in `[-1.0, 1.0)`.
pub fn decode_samples(bytes: &[u8], format: SampleFormat) -> Vec<f32> {
    match format {
        SampleFormat::U8 => bytes
            .iter()
            .map(|&b| (f32::from(b) - 128.0) / 128.0)
            .collect(),
        SampleFormat::S16Le => bytes
            .chunks_exact(2)
            .map(|c| f32::from(i16::from_le_bytes([c[0], c[1]])) / 32_768.0)
            .collect(),
    }
}

/// Device channel count used for a `wanted`-channel source.
///
/// An exact match wins. A mono source falls back to the narrowest
/// multi-channel output and is upmixed.
fn device_channels_for(available: impl IntoIterator<Item = u16>, wanted: u16) -> Option<u16> {
    let available: Vec<u16> = available.into_iter().collect();
    if available.contains(&wanted) {
        return Some(wanted);
    }
    if wanted == 1 {
        return available.into_iter().filter(|&c| c > 1).min();
    }
    None
}

/// Copy each mono sample to every device channel. Other layouts pass through.
fn upmix(samples: Vec<f32>, channels: u16, device_channels: u16) -> Vec<f32> {
    if channels != 1 || device_channels <= 1 {
        return samples;
    }
    let n = usize::from(device_channels);
    let mut out = Vec::with_capacity(samples.len() * n);
    for s in samples {
        out.extend(std::iter::repeat_n(s, n));
    }
    out
}

/// Start the thread owning the CPAL stream and wait until it is playing.
fn spawn_output_thread(
    spec: OutputSpec,
    queue: Arc<SampleQueue>,
    xrun: Arc<XrunState>,
) -> Result<OutputThread> {
    let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), String>>(1);
    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);

    let join = std::thread::Builder::new()
        .name("cpal-output".to_string())
        .spawn(move || output_thread_main(spec, queue, xrun, ready_tx, stop_rx))?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(OutputThread { stop_tx, join }),
        Ok(Err(msg)) => {
            let _ = join.join();
            Err(anyhow!(msg))
        }
        Err(_) => {
            let _ = join.join();
            Err(anyhow!("cpal output thread exited before reporting"))
        }
    }
}

fn output_thread_main(
    spec: OutputSpec,
    queue: Arc<SampleQueue>,
    xrun: Arc<XrunState>,
    ready_tx: Sender<Result<(), String>>,
    stop_rx: Receiver<()>,
) {
    let host = cpal::default_host();
    let built = (|| -> Result<cpal::Stream> {
        let dev = device::pick_device(&host, spec.device.as_deref())?;
        let stream = build_output_stream(&dev, &spec.config, spec.sample_format, queue, xrun)?;
        stream.play()?;
        Ok(stream)
    })();

    match built {
        Ok(stream) => {
            let _ = ready_tx.send(Ok(()));
            // Either an explicit stop or the sink being dropped ends the stream.
            let _ = stop_rx.recv();
            drop(stream);
        }
        Err(e) => {
            let _ = ready_tx.send(Err(format!("{e:#}")));
        }
    }
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    queue: Arc<SampleQueue>,
    xrun: Arc<XrunState>,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, queue, xrun),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, queue, xrun),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, queue, xrun),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, queue, xrun),
        cpal::SampleFormat::U8 => build_stream::<u8>(device, config, queue, xrun),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

/// Type-specialized stream builder: drain the queue, pad with silence on underrun.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: Arc<SampleQueue>,
    xrun: Arc<XrunState>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let mut scratch: Vec<f32> = Vec::new();
    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            if scratch.len() < data.len() {
                scratch.resize(data.len(), 0.0);
            }
            let src = &mut scratch[..data.len()];
            let got = queue.pop_into(src);
            if got < src.len() {
                src[got..].fill(0.0);
                if xrun.armed.swap(false, Ordering::AcqRel) {
                    xrun.underrun.store(true, Ordering::Release);
                    xrun.events.fetch_add(1, Ordering::Relaxed);
                }
            }
            for (dst, s) in data.iter_mut().zip(src.iter()) {
                *dst = <T as cpal::Sample>::from_sample::<f32>(*s);
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}
