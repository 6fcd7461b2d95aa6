//! Sample storage and per-context buffer cache.
//!
//! `SampleLibrary` holds decoded recordings and hands out render-ready mono
//! buffers materialized for a specific render context (mono-mixed and
//! resampled to the context rate). Materialized buffers are cached under the
//! context's integer id; registering new sample data clears the cache, and
//! callers evict a finished context explicitly.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::EngineError;

use super::noise::LfsrNoise;
use super::renderer::RenderContext;

/// Raw decoded audio: equal-length channel buffers at a native sample rate.
#[derive(Debug, Clone)]
pub struct SampleData {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl SampleData {
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Result<Self, EngineError> {
        if channels.is_empty() {
            return Err(EngineError::SampleDecode {
                id: String::new(),
                reason: "no channels".to_string(),
            });
        }
        let len = channels[0].len();
        if channels.iter().any(|c| c.len() != len) {
            return Err(EngineError::SampleDecode {
                id: String::new(),
                reason: "channel buffers differ in length".to_string(),
            });
        }
        Ok(SampleData {
            sample_rate,
            channels,
        })
    }

    pub fn from_mono(sample_rate: u32, data: Vec<f32>) -> Self {
        SampleData {
            sample_rate,
            channels: vec![data],
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mix down to mono and resample to `target_rate` (linear interpolation).
    fn materialize(&self, target_rate: f64) -> Vec<f64> {
        let src_len = self.len();
        if src_len == 0 {
            return Vec::new();
        }
        let mono: Vec<f64> = (0..src_len)
            .map(|i| {
                let sum: f64 = self.channels.iter().map(|c| c[i] as f64).sum();
                sum / self.channels.len() as f64
            })
            .collect();

        let ratio = self.sample_rate as f64 / target_rate;
        if (ratio - 1.0).abs() < 1e-9 {
            return mono;
        }
        let out_len = (src_len as f64 / ratio).ceil() as usize;
        (0..out_len)
            .map(|i| {
                let pos = i as f64 * ratio;
                let idx = pos as usize;
                if idx + 1 >= src_len {
                    mono[src_len - 1]
                } else {
                    let frac = pos - idx as f64;
                    mono[idx] * (1.0 - frac) + mono[idx + 1] * frac
                }
            })
            .collect()
    }
}

/// One entry of a sample manifest.
#[cfg(feature = "manifest")]
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ManifestEntry {
    pub id: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Named sample store with a per-render-context buffer cache.
#[derive(Debug, Clone, Default)]
pub struct SampleLibrary {
    data: HashMap<String, SampleData>,
    cache: HashMap<u64, HashMap<String, Arc<Vec<f64>>>>,
}

impl SampleLibrary {
    pub fn new() -> Self {
        SampleLibrary::default()
    }

    /// Register sample data under an id. Any cached buffers are stale after
    /// this, so the whole cache is dropped.
    pub fn set_from_data(&mut self, id: &str, data: SampleData) {
        self.data.insert(id.to_string(), data);
        self.cache.clear();
    }

    pub fn has(&self, id: &str) -> bool {
        self.data.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// A render-ready mono buffer for `id`, materialized at the context's
    /// sample rate. Repeated calls for the same context return the cached
    /// allocation.
    pub fn get_buffer(&mut self, context: &RenderContext, id: &str) -> Option<Arc<Vec<f64>>> {
        if !self.data.contains_key(id) {
            return None;
        }
        let per_context = self.cache.entry(context.id()).or_default();
        if let Some(buffer) = per_context.get(id) {
            return Some(Arc::clone(buffer));
        }
        let buffer = Arc::new(self.data[id].materialize(context.sample_rate()));
        per_context.insert(id.to_string(), Arc::clone(&buffer));
        Some(buffer)
    }

    /// Drop cached buffers for a context that is done rendering.
    pub fn invalidate_context(&mut self, context_id: u64) {
        self.cache.remove(&context_id);
    }

    /// Fetch, decode, and register every manifest entry. All entries are
    /// decoded before any is registered, so one bad entry aborts the load
    /// without disturbing previously-registered samples.
    #[cfg(feature = "manifest")]
    pub async fn load_from_manifest(&mut self, manifest: &[ManifestEntry]) -> Result<(), EngineError> {
        let mut decoded = Vec::with_capacity(manifest.len());
        for entry in manifest {
            let bytes = manifest_fetch(entry).await?;
            if let Some(expected) = &entry.sha256 {
                verify_sha256(&entry.id, &bytes, expected)?;
            }
            let data = decode_sample(&entry.id, &bytes)?;
            log::debug!(
                "decoded sample \"{}\": {} ch, {} frames @ {} Hz",
                entry.id,
                data.channel_count(),
                data.len(),
                data.sample_rate()
            );
            decoded.push((entry.id.clone(), data));
        }
        for (id, data) in decoded {
            self.set_from_data(&id, data);
        }
        log::info!("sample manifest loaded: {} entries", manifest.len());
        Ok(())
    }
}

#[cfg(feature = "manifest")]
async fn manifest_fetch(entry: &ManifestEntry) -> Result<Vec<u8>, EngineError> {
    use base64::Engine as _;

    let fetch_err = |reason: String| EngineError::SampleFetch {
        id: entry.id.clone(),
        reason,
    };

    if let Some(encoded) = entry.url.strip_prefix("data:") {
        let payload = encoded.split_once("base64,").map(|(_, p)| p).unwrap_or(encoded);
        return base64::engine::general_purpose::STANDARD
            .decode(payload)
            .map_err(|e| fetch_err(e.to_string()));
    }

    if entry.url.starts_with("http://") || entry.url.starts_with("https://") {
        let response = reqwest::get(&entry.url).await.map_err(|e| fetch_err(e.to_string()))?;
        if !response.status().is_success() {
            return Err(fetch_err(format!("HTTP {}", response.status())));
        }
        let bytes = response.bytes().await.map_err(|e| fetch_err(e.to_string()))?;
        return Ok(bytes.to_vec());
    }

    tokio::fs::read(&entry.url)
        .await
        .map_err(|e| fetch_err(e.to_string()))
}

#[cfg(feature = "manifest")]
fn verify_sha256(id: &str, bytes: &[u8], expected: &str) -> Result<(), EngineError> {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(bytes);
    let actual = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(EngineError::SampleFetch {
            id: id.to_string(),
            reason: format!("sha256 mismatch: expected {expected}, got {actual}"),
        })
    }
}

#[cfg(feature = "manifest")]
fn decode_sample(id: &str, bytes: &[u8]) -> Result<SampleData, EngineError> {
    let decode_err = |reason: String| EngineError::SampleDecode {
        id: id.to_string(),
        reason,
    };

    // WAV first (magic check), then MP3.
    if bytes.len() >= 4 && &bytes[0..4] == b"RIFF" {
        let mut reader =
            hound::WavReader::new(std::io::Cursor::new(bytes)).map_err(|e| decode_err(e.to_string()))?;
        let spec = reader.spec();
        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(|e| decode_err(e.to_string()))?,
            hound::SampleFormat::Int => {
                let max = (1_i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / max))
                    .collect::<Result<_, _>>()
                    .map_err(|e| decode_err(e.to_string()))?
            }
        };
        let ch = spec.channels as usize;
        let frames = samples.len() / ch;
        let channels: Vec<Vec<f32>> = (0..ch)
            .map(|c| (0..frames).map(|f| samples[f * ch + c]).collect())
            .collect();
        return SampleData::new(spec.sample_rate, channels).map_err(|e| match e {
            EngineError::SampleDecode { reason, .. } => decode_err(reason),
            other => other,
        });
    }

    let mut decoder = minimp3::Decoder::new(std::io::Cursor::new(bytes));
    let mut sample_rate = 0_u32;
    let mut channel_count = 0_usize;
    let mut interleaved: Vec<i16> = Vec::new();
    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = frame.sample_rate as u32;
                channel_count = frame.channels;
                interleaved.extend_from_slice(&frame.data);
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(decode_err(e.to_string())),
        }
    }
    if interleaved.is_empty() || channel_count == 0 {
        return Err(decode_err("no audio frames".to_string()));
    }
    let frames = interleaved.len() / channel_count;
    let channels: Vec<Vec<f32>> = (0..channel_count)
        .map(|c| {
            (0..frames)
                .map(|f| interleaved[f * channel_count + c] as f32 / 32768.0)
                .collect()
        })
        .collect();
    SampleData::new(sample_rate, channels).map_err(|e| match e {
        EngineError::SampleDecode { reason, .. } => decode_err(reason),
        other => other,
    })
}

// ── Procedural default kit ──────────────────────────────────

const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Library pre-loaded with plausible hats and cymbals so the engine is
/// usable with no external assets. All synthesis is LFSR-seeded and
/// therefore reproducible.
pub fn default_percussion_library() -> SampleLibrary {
    let mut library = SampleLibrary::new();
    library.set_from_data("closed-hat", synth_hat(0.3, 8000.0, 1.0));
    library.set_from_data("open-hat", synth_hat(0.9, 6000.0, 0.6));
    library.set_from_data("crash", synth_cymbal(1.6, &[410.0, 620.0, 830.0, 1200.0]));
    library.set_from_data("ride", synth_cymbal(2.8, &[320.0, 480.0, 650.0]));
    library
}

/// Filtered noise burst with a metallic tone component.
fn synth_hat(duration: f64, tone_hz: f64, level: f32) -> SampleData {
    let sample_rate = DEFAULT_SAMPLE_RATE;
    let length = (duration * sample_rate as f64) as usize;
    let mut noise = LfsrNoise::new();
    let mut data = Vec::with_capacity(length);
    let mut last = noise.next();
    for i in 0..length {
        let white = noise.next();
        // crude first-difference highpass with a leaky memory term
        let filtered = white - last + 0.99 * (last - white / 2.0);
        last = filtered;
        let envelope = (-5.0 * i as f64 / length as f64).exp();
        let tone = (2.0 * std::f64::consts::PI * tone_hz * i as f64 / sample_rate as f64).sin();
        data.push(((filtered + tone * 0.2) * envelope) as f32 * level);
    }
    SampleData::from_mono(sample_rate, data)
}

/// Inharmonic partial stack with exponential decay.
fn synth_cymbal(duration: f64, partials: &[f64]) -> SampleData {
    let sample_rate = DEFAULT_SAMPLE_RATE;
    let length = (duration * sample_rate as f64) as usize;
    let mut data = Vec::with_capacity(length);
    for i in 0..length {
        let mut sample = 0.0_f64;
        for (idx, freq) in partials.iter().enumerate() {
            let phase = 2.0 * std::f64::consts::PI * freq * i as f64 / sample_rate as f64;
            sample += (phase + idx as f64 * 0.2).sin() / (idx + 1) as f64;
        }
        let envelope = (-3.0 * i as f64 / length as f64).exp();
        data.push((sample * envelope * 0.7) as f32);
    }
    SampleData::from_mono(sample_rate, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::renderer::RenderContext;

    #[test]
    fn rejects_mismatched_channel_lengths() {
        let err = SampleData::new(44100, vec![vec![0.0; 10], vec![0.0; 9]]).unwrap_err();
        assert!(matches!(err, EngineError::SampleDecode { .. }));
    }

    #[test]
    fn default_library_has_the_four_kit_pieces() {
        let lib = default_percussion_library();
        for id in ["closed-hat", "open-hat", "crash", "ride"] {
            assert!(lib.has(id), "missing default sample {id}");
        }
        assert!(!lib.has("cowbell"));
    }

    #[test]
    fn default_samples_are_deterministic() {
        let mut a = default_percussion_library();
        let mut b = default_percussion_library();
        let ctx = RenderContext::new(44100.0, 1);
        let buf_a = a.get_buffer(&ctx, "closed-hat").unwrap();
        let buf_b = b.get_buffer(&ctx, "closed-hat").unwrap();
        assert_eq!(*buf_a, *buf_b);
    }

    #[test]
    fn get_buffer_caches_per_context() {
        let mut lib = default_percussion_library();
        let ctx = RenderContext::new(44100.0, 2);
        let first = lib.get_buffer(&ctx, "ride").unwrap();
        let second = lib.get_buffer(&ctx, "ride").unwrap();
        assert!(Arc::ptr_eq(&first, &second), "same context should reuse the buffer");

        let other = RenderContext::new(44100.0, 2);
        let third = lib.get_buffer(&other, "ride").unwrap();
        assert!(!Arc::ptr_eq(&first, &third), "new context gets its own materialization");
    }

    #[test]
    fn registering_data_invalidates_the_cache() {
        let mut lib = SampleLibrary::new();
        lib.set_from_data("hit", SampleData::from_mono(44100, vec![0.5; 100]));
        let ctx = RenderContext::new(44100.0, 1);
        let stale = lib.get_buffer(&ctx, "hit").unwrap();

        lib.set_from_data("hit", SampleData::from_mono(44100, vec![-0.5; 100]));
        let fresh = lib.get_buffer(&ctx, "hit").unwrap();
        assert!(!Arc::ptr_eq(&stale, &fresh));
        assert!((fresh[0] + 0.5).abs() < 1e-6);
    }

    #[test]
    fn invalidate_context_evicts_only_that_context() {
        let mut lib = default_percussion_library();
        let ctx_a = RenderContext::new(44100.0, 1);
        let ctx_b = RenderContext::new(44100.0, 1);
        let a1 = lib.get_buffer(&ctx_a, "crash").unwrap();
        let b1 = lib.get_buffer(&ctx_b, "crash").unwrap();

        lib.invalidate_context(ctx_a.id());
        let a2 = lib.get_buffer(&ctx_a, "crash").unwrap();
        let b2 = lib.get_buffer(&ctx_b, "crash").unwrap();
        assert!(!Arc::ptr_eq(&a1, &a2), "evicted context rematerializes");
        assert!(Arc::ptr_eq(&b1, &b2), "other context untouched");
    }

    #[test]
    fn materialize_resamples_to_context_rate() {
        let mut lib = SampleLibrary::new();
        lib.set_from_data("tone", SampleData::from_mono(22050, vec![0.25; 22050]));
        let ctx = RenderContext::new(44100.0, 1);
        let buf = lib.get_buffer(&ctx, "tone").unwrap();
        // One second of source audio should still be about one second long
        assert!((buf.len() as f64 - 44100.0).abs() <= 2.0);
        assert!((buf[100] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn stereo_mixes_down_to_mono() {
        let mut lib = SampleLibrary::new();
        let data = SampleData::new(44100, vec![vec![1.0; 50], vec![0.0; 50]]).unwrap();
        lib.set_from_data("wide", data);
        let ctx = RenderContext::new(44100.0, 1);
        let buf = lib.get_buffer(&ctx, "wide").unwrap();
        assert!((buf[10] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn unknown_id_returns_none() {
        let mut lib = SampleLibrary::new();
        let ctx = RenderContext::new(44100.0, 1);
        assert!(lib.get_buffer(&ctx, "nope").is_none());
    }
}
