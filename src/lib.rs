pub mod dsp;
pub mod error;
pub mod pattern;
pub mod preset;

use crate::dsp::engine::{RenderRequest, SynthEngine};
use crate::error::EngineError;

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default engine sample rate in Hz.
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Render a request on a freshly built default kit and return WAV bytes.
///
/// One-call pipeline for command surfaces: the engine, voices, and sample
/// library are constructed from scratch, so equal requests give equal bytes.
pub fn render_request_wav(request: &RenderRequest) -> Result<Vec<u8>, EngineError> {
    let sample_rate = request.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE);
    let mut engine = SynthEngine::with_default_kit(sample_rate as f64);
    let buffer = engine.render_to_buffer(request)?;
    Ok(engine.audio_buffer_to_wav(&buffer))
}

/// Render a stored preset for a number of bars.
pub fn render_preset_wav(preset_id: &str, bars: usize) -> Result<Vec<u8>, EngineError> {
    let store = preset::PresetStore::builtin();
    let preset = store.get(preset_id)?;
    render_request_wav(&preset.to_render_request(bars))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn render_preset_wav_produces_a_riff_container() {
        let wav = render_preset_wav("four-floor", 1).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert!(wav.len() > 44, "WAV should carry audio data");

        // Not all silence
        let has_signal = wav[44..]
            .chunks_exact(2)
            .any(|c| i16::from_le_bytes([c[0], c[1]]) != 0);
        assert!(has_signal, "rendered preset should be audible");
    }

    #[test]
    fn unknown_preset_is_reported() {
        let err = render_preset_wav("not-a-preset", 1).unwrap_err();
        assert!(matches!(err, EngineError::UnknownPreset { .. }));
    }

    #[test]
    fn full_pipeline_is_deterministic() {
        let a = render_preset_wav("acid-line", 2).unwrap();
        let b = render_preset_wav("acid-line", 2).unwrap();
        assert_eq!(a, b);
    }
}
