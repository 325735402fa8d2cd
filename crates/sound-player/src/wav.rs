//! WAV file [`SoundStream`] decoded with Symphonia.
//!
//! Packets are decoded on demand inside [`SoundStream::read`] and re-encoded as
//! interleaved PCM: unsigned 8-bit for 8-bit sources, signed 16-bit
//! little-endian for everything else.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use crate::stream::SoundStream;

/// Frame layout of the bytes a [`WavStream`] hands out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PcmLayout {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub block_align: u16,
    pub byte_rate: u32,
}

impl PcmLayout {
    pub fn new(channels: u16, sample_rate: u32, source_bits: Option<u32>) -> Self {
        let bits_per_sample = output_bits(source_bits);
        let block_align = channels * (bits_per_sample / 8);
        Self {
            channels,
            sample_rate,
            bits_per_sample,
            block_align,
            byte_rate: sample_rate * u32::from(block_align),
        }
    }
}

/// Output bit depth for a source bit depth.
fn output_bits(source_bits: Option<u32>) -> u16 {
    match source_bits {
        Some(8) => 8,
        _ => 16,
    }
}

/// Size of a canonical WAV header, used when estimating an unknown length.
const CANONICAL_HEADER_BYTES: u64 = 44;

/// Frame count estimated from the file size when the header carries none.
fn estimate_frames(file_len: u64, channels: u16, source_bits: Option<u32>) -> Option<u64> {
    let bytes_per_frame = u64::from(channels) * u64::from(source_bits?).div_ceil(8);
    if bytes_per_frame == 0 {
        return None;
    }
    Some(file_len.saturating_sub(CANONICAL_HEADER_BYTES) / bytes_per_frame)
}

/// Append `samples` as little-endian 16-bit PCM.
fn append_s16le(samples: &[i16], out: &mut Vec<u8>) {
    out.reserve(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
}

/// A WAV file opened for streaming playback.
pub struct WavStream {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    layout: PcmLayout,
    total_frames: u64,
    /// Whether `total_frames` came from the header rather than an estimate.
    frames_known: bool,
    /// Frame the current decode run started from (moves on seek).
    base_frame: u64,
    /// Bytes handed out by `read` since `base_frame`.
    delivered: u64,
    pending: Vec<u8>,
    pending_pos: usize,
    /// Decoded bytes still to discard after landing on a packet boundary.
    skip: u64,
    eof: bool,
}

impl WavStream {
    /// Probe and open `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("open {:?}", path))?;
        let file_len = file.metadata().map(|m| m.len()).unwrap_or(0);

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let mss = MediaSourceStream::new(Box::new(file), Default::default());
        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .with_context(|| format!("probe {:?}", path))?;
        let format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| anyhow!("No default audio track"))?;
        let params = track.codec_params.clone();
        let track_id = track.id;

        let channels = params
            .channels
            .ok_or_else(|| anyhow!("Unknown channels"))?
            .count();
        let channels = u16::try_from(channels).context("channel count out of range")?;
        let sample_rate = params
            .sample_rate
            .ok_or_else(|| anyhow!("Unknown sample rate"))?;
        let layout = PcmLayout::new(channels, sample_rate, params.bits_per_sample);

        let source_bits = params.bits_per_coded_sample.or(params.bits_per_sample);
        let (total_frames, frames_known) = match params.n_frames {
            Some(n) => (n, true),
            None => {
                let estimate = estimate_frames(file_len, channels, source_bits);
                tracing::warn!(
                    path = %path.display(),
                    estimate,
                    "wav header has no frame count, length will be estimated"
                );
                (estimate.unwrap_or(u64::MAX), false)
            }
        };

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .context("create decoder")?;

        tracing::debug!(
            path = %path.display(),
            channels,
            sample_rate,
            bits = layout.bits_per_sample,
            frames = params.n_frames,
            "wav stream opened"
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            layout,
            total_frames,
            frames_known,
            base_frame: 0,
            delivered: 0,
            pending: Vec::new(),
            pending_pos: 0,
            skip: 0,
            eof: false,
        })
    }

    pub fn layout(&self) -> PcmLayout {
        self.layout
    }

    fn played_frames(&self) -> u64 {
        self.base_frame + self.delivered / u64::from(self.layout.block_align.max(1))
    }

    /// Decode the next packet of our track into `pending`. `false` at end of stream.
    fn refill(&mut self) -> bool {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(_) => return false,
            };
            if packet.track_id() != self.track_id {
                continue;
            }
            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::debug!("skipping undecodable packet: {e}");
                    continue;
                }
                Err(e) => {
                    tracing::warn!("wav decode failed: {e}");
                    return false;
                }
            };

            self.pending.clear();
            self.pending_pos = 0;
            let frames = decoded.frames() as u64;
            let spec = *decoded.spec();
            if self.layout.bits_per_sample == 8 {
                let mut buf = SampleBuffer::<u8>::new(frames, spec);
                buf.copy_interleaved_ref(decoded);
                self.pending.extend_from_slice(buf.samples());
            } else {
                let mut buf = SampleBuffer::<i16>::new(frames, spec);
                buf.copy_interleaved_ref(decoded);
                append_s16le(buf.samples(), &mut self.pending);
            }
            let dropped = self.skip.min(self.pending.len() as u64);
            self.skip -= dropped;
            self.pending_pos = dropped as usize;
            if self.pending_pos < self.pending.len() {
                return true;
            }
        }
    }
}

impl SoundStream for WavStream {
    fn byte_rate(&self) -> u32 {
        self.layout.byte_rate
    }

    fn block_align(&self) -> u16 {
        self.layout.block_align
    }

    fn channels(&self) -> u16 {
        self.layout.channels
    }

    fn sample_rate(&self) -> u32 {
        self.layout.sample_rate
    }

    fn bits_per_sample(&self) -> u16 {
        self.layout.bits_per_sample
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut filled = 0;
        while filled < buf.len() {
            if self.pending_pos >= self.pending.len() {
                if self.eof || !self.refill() {
                    if !self.eof && !self.frames_known {
                        // The real length is only known once the data runs out.
                        let tail = filled as u64 / u64::from(self.layout.block_align.max(1));
                        self.total_frames = self.played_frames() + tail;
                        self.frames_known = true;
                    }
                    self.eof = true;
                    break;
                }
            }
            let available = &self.pending[self.pending_pos..];
            let n = available.len().min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&available[..n]);
            self.pending_pos += n;
            filled += n;
        }
        self.delivered += filled as u64;
        filled
    }

    fn pos(&self) -> u64 {
        self.played_frames() / u64::from(self.layout.sample_rate.max(1))
    }

    fn total(&self) -> u64 {
        self.total_frames / u64::from(self.layout.sample_rate.max(1))
    }

    fn set_pos(&mut self, seconds: u64) {
        let target = seconds.min(self.total());
        let seeked = self.format.seek(
            SeekMode::Accurate,
            SeekTo::Time {
                time: Time::new(target, 0.0),
                track_id: Some(self.track_id),
            },
        );
        match seeked {
            Ok(to) => {
                self.decoder.reset();
                self.pending.clear();
                self.pending_pos = 0;
                self.delivered = 0;
                // WAV timestamps count frames; the reader lands on a packet
                // boundary at or before the requested frame.
                self.base_frame = to.required_ts;
                self.skip = to.required_ts.saturating_sub(to.actual_ts)
                    * u64::from(self.layout.block_align);
                self.eof = false;
            }
            Err(e) => tracing::warn!(seconds, "wav seek failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn write_wav(name: &str, channels: u16, rate: u32, bits: u16, data: &[u8]) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("sound-player-{}-{name}.wav", std::process::id()));
        let block_align = channels * bits / 8;
        let byte_rate = rate * u32::from(block_align);

        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data.len() as u32).to_le_bytes());
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(b"fmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&channels.to_le_bytes());
        bytes.extend_from_slice(&rate.to_le_bytes());
        bytes.extend_from_slice(&byte_rate.to_le_bytes());
        bytes.extend_from_slice(&block_align.to_le_bytes());
        bytes.extend_from_slice(&bits.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
        bytes.extend_from_slice(data);

        let mut f = File::create(&path).unwrap();
        f.write_all(&bytes).unwrap();
        path
    }

    #[test]
    fn layout_keeps_eight_bit_and_widens_the_rest() {
        let u8_layout = PcmLayout::new(1, 8_000, Some(8));
        assert_eq!(u8_layout.block_align, 1);
        assert_eq!(u8_layout.byte_rate, 8_000);

        let cd = PcmLayout::new(2, 44_100, Some(24));
        assert_eq!(cd.bits_per_sample, 16);
        assert_eq!(cd.block_align, 4);
        assert_eq!(cd.byte_rate, 176_400);

        assert_eq!(PcmLayout::new(2, 48_000, None).bits_per_sample, 16);
    }

    #[test]
    fn s16_samples_are_little_endian() {
        let mut out = Vec::new();
        append_s16le(&[1, -2, i16::MAX], &mut out);
        assert_eq!(out, vec![0x01, 0x00, 0xfe, 0xff, 0xff, 0x7f]);
    }

    #[test]
    fn frame_estimate_uses_source_width() {
        assert_eq!(estimate_frames(44 + 8_000, 1, Some(8)), Some(8_000));
        assert_eq!(estimate_frames(44 + 4 * 1_000, 2, Some(16)), Some(1_000));
        assert_eq!(estimate_frames(44 + 6 * 10, 2, Some(24)), Some(10));
        assert_eq!(estimate_frames(10, 2, Some(16)), Some(0));
        assert_eq!(estimate_frames(1_000, 2, None), None);
    }

    #[test]
    fn unknown_length_is_learned_at_end_of_data() {
        let data: Vec<u8> = (0..16_000u32).map(|i| (i % 251) as u8).collect();
        let path = write_wav("u8-unknown-len", 1, 8_000, 8, &data);

        let mut stream = WavStream::open(&path).unwrap();
        stream.total_frames = u64::MAX;
        stream.frames_known = false;
        assert!(stream.total() > 2);

        let mut buf = vec![0u8; 10_000];
        assert_eq!(stream.read(&mut buf), 10_000);
        assert_eq!(stream.read(&mut buf), 6_000);
        assert_eq!(stream.total(), 2);
        assert_eq!(stream.pos(), 2);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(WavStream::open("/nonexistent/sound-player.wav").is_err());
    }

    #[test]
    fn reads_and_seeks_eight_bit_mono() {
        let data: Vec<u8> = (0..16_000u32).map(|i| (i % 251) as u8).collect();
        let path = write_wav("u8-mono", 1, 8_000, 8, &data);

        let mut stream = WavStream::open(&path).unwrap();
        assert_eq!(stream.byte_rate(), 8_000);
        assert_eq!(stream.block_align(), 1);
        assert_eq!(stream.bits_per_sample(), 8);
        assert_eq!(stream.total(), 2);
        assert_eq!(stream.pos(), 0);

        let mut buf = vec![0u8; 8_000];
        assert_eq!(stream.read(&mut buf), 8_000);
        assert_eq!(&buf[..], &data[..8_000]);
        assert_eq!(stream.pos(), 1);

        stream.set_pos(0);
        assert_eq!(stream.pos(), 0);
        let mut again = vec![0u8; 100];
        assert_eq!(stream.read(&mut again), 100);
        assert_eq!(&again[..], &data[..100]);

        stream.set_pos(1);
        let mut tail = vec![0u8; 10_000];
        assert_eq!(stream.read(&mut tail), 8_000);
        assert_eq!(&tail[..8_000], &data[8_000..]);
        assert_eq!(stream.pos(), 2);
        assert_eq!(stream.read(&mut tail), 0);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn sixteen_bit_stereo_passes_through() {
        let samples: Vec<i16> = (0..(4_000 * 2)).map(|i| (i as i16).wrapping_mul(7)).collect();
        let mut data = Vec::new();
        append_s16le(&samples, &mut data);
        let path = write_wav("s16-stereo", 2, 4_000, 16, &data);

        let mut stream = WavStream::open(&path).unwrap();
        assert_eq!(stream.channels(), 2);
        assert_eq!(stream.sample_rate(), 4_000);
        assert_eq!(stream.byte_rate(), 16_000);
        assert_eq!(stream.total(), 1);

        let mut buf = vec![0u8; data.len()];
        assert_eq!(stream.read(&mut buf), data.len());
        assert_eq!(buf, data);

        let _ = std::fs::remove_file(path);
    }
}
