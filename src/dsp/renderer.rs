//! Offline rendering and WAV encoding.
//!
//! `OutputManager::render_offline` runs a single synchronous render pass:
//! it allocates the output buffer at the requested rate and channel count,
//! mints a fresh `RenderContext`, and hands both to the caller's fill
//! callback. Nothing else touches the buffer, so identical inputs produce
//! bit-identical output.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic source of render-context ids. Ids are never reused, so cache
/// entries keyed by a dead context can always be evicted safely.
static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one offline render pass. Sample caches key their
/// materialized buffers by `id`.
#[derive(Debug, Clone)]
pub struct RenderContext {
    id: u64,
    sample_rate: f64,
    channels: usize,
}

impl RenderContext {
    pub fn new(sample_rate: f64, channels: usize) -> Self {
        RenderContext {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            sample_rate,
            channels: channels.max(1),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

/// A rendered audio buffer: one `Vec<f64>` per channel, equal lengths.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f64>>,
}

impl AudioBuffer {
    pub fn silent(sample_rate: u32, channels: usize, frames: usize) -> Self {
        AudioBuffer {
            sample_rate,
            channels: vec![vec![0.0; frames]; channels.max(1)],
        }
    }

    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, |c| c.len())
    }

    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Options for an offline render pass.
#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    pub sample_rate: u32,
    pub channels: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        RenderOptions {
            sample_rate: 44100,
            channels: 2,
        }
    }
}

/// Offline render entry point plus WAV encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputManager;

impl OutputManager {
    /// Run a deterministic offline render. The fill callback receives the
    /// pass's context and the zeroed output buffer.
    pub fn render_offline<F>(&self, duration: f64, options: RenderOptions, fill: F) -> AudioBuffer
    where
        F: FnOnce(&RenderContext, &mut AudioBuffer),
    {
        let frames = (duration * options.sample_rate as f64).ceil() as usize;
        let context = RenderContext::new(options.sample_rate as f64, options.channels);
        let mut buffer = AudioBuffer::silent(options.sample_rate, options.channels, frames);
        log::debug!(
            "offline render: context {} — {frames} frames, {} ch @ {} Hz",
            context.id(),
            options.channels,
            options.sample_rate
        );
        fill(&context, &mut buffer);
        buffer
    }

    /// Encode a buffer as 16-bit PCM WAV bytes.
    pub fn audio_buffer_to_wav(&self, buffer: &AudioBuffer) -> Vec<u8> {
        encode_wav(buffer)
    }
}

/// Encode interleaved 16-bit PCM into a RIFF/WAVE container.
fn encode_wav(buffer: &AudioBuffer) -> Vec<u8> {
    let channels = buffer.channels.len() as u16;
    let sample_rate = buffer.sample_rate;
    let bits_per_sample: u16 = 16;
    let block_align = channels * (bits_per_sample / 8);
    let byte_rate = sample_rate * block_align as u32;
    let frames = buffer.frames();
    let data_size = (frames * channels as usize * 2) as u32;
    let file_size = 36 + data_size;

    let mut out = Vec::with_capacity(44 + data_size as usize);

    // RIFF header
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&file_size.to_le_bytes());
    out.extend_from_slice(b"WAVE");

    // fmt chunk
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes()); // chunk size
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM format
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&bits_per_sample.to_le_bytes());

    // data chunk
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_size.to_le_bytes());
    for frame in 0..frames {
        for channel in &buffer.channels {
            let sample = channel[frame].clamp(-1.0, 1.0);
            // Asymmetric scaling: the 16-bit range has one more negative step
            let int16 = if sample < 0.0 {
                (sample * 32768.0) as i16
            } else {
                (sample * 32767.0) as i16
            };
            out.extend_from_slice(&int16.to_le_bytes());
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contexts_get_unique_ids() {
        let a = RenderContext::new(44100.0, 2);
        let b = RenderContext::new(44100.0, 2);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn render_offline_sizes_the_buffer() {
        let om = OutputManager;
        let buffer = om.render_offline(
            0.5,
            RenderOptions {
                sample_rate: 44100,
                channels: 2,
            },
            |ctx, buf| {
                assert_eq!(ctx.sample_rate(), 44100.0);
                assert_eq!(buf.channels.len(), 2);
            },
        );
        assert_eq!(buffer.frames(), 22050);
        assert!((buffer.duration() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn render_offline_starts_silent() {
        let om = OutputManager;
        let buffer = om.render_offline(0.1, RenderOptions::default(), |_, _| {});
        assert!(buffer.channels.iter().all(|c| c.iter().all(|&s| s == 0.0)));
    }

    #[test]
    fn fill_callback_output_is_returned_verbatim() {
        let om = OutputManager;
        let buffer = om.render_offline(0.01, RenderOptions::default(), |_, buf| {
            for channel in &mut buf.channels {
                channel[0] = 0.25;
            }
        });
        assert_eq!(buffer.channels[0][0], 0.25);
        assert_eq!(buffer.channels[1][0], 0.25);
    }

    #[test]
    fn wav_header_valid() {
        let om = OutputManager;
        let buffer = AudioBuffer::silent(44100, 2, 1000);
        let wav = om.audio_buffer_to_wav(&buffer);

        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(&wav[36..40], b"data");

        let sr = u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]);
        assert_eq!(sr, 44100);
        let ch = u16::from_le_bytes([wav[22], wav[23]]);
        assert_eq!(ch, 2);
    }

    #[test]
    fn wav_size_matches_frame_count() {
        let om = OutputManager;
        let buffer = AudioBuffer::silent(22050, 2, 22050);
        let wav = om.audio_buffer_to_wav(&buffer);

        let data_size = u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]);
        assert_eq!(data_size, 22050 * 2 * 2);
        assert_eq!(wav.len(), 44 + data_size as usize);
    }

    #[test]
    fn wav_encodes_full_scale_asymmetrically() {
        let om = OutputManager;
        let mut buffer = AudioBuffer::silent(44100, 1, 2);
        buffer.channels[0][0] = 1.0;
        buffer.channels[0][1] = -1.0;
        let wav = om.audio_buffer_to_wav(&buffer);
        let pos = i16::from_le_bytes([wav[44], wav[45]]);
        let neg = i16::from_le_bytes([wav[46], wav[47]]);
        assert_eq!(pos, 32767);
        assert_eq!(neg, -32768);
    }

    #[test]
    fn out_of_range_samples_clamp() {
        let om = OutputManager;
        let mut buffer = AudioBuffer::silent(44100, 1, 1);
        buffer.channels[0][0] = 3.5;
        let wav = om.audio_buffer_to_wav(&buffer);
        let s = i16::from_le_bytes([wav[44], wav[45]]);
        assert_eq!(s, 32767);
    }
}
