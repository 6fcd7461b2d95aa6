//! Voice — the capability every sound source implements.
//!
//! A voice is one triggerable sound: a synthesized drum, a sample player, or
//! the monophonic bass. The engine talks to all of them uniformly: trigger,
//! per-sample processing, string-addressed parameters declared through
//! descriptors, and an owned output stage for mixing.

use crate::error::EngineError;

use super::renderer::RenderContext;
use super::sample::SampleLibrary;

/// Declares one tunable control of a voice. Immutable: descriptor tables are
/// `'static` and shared by every instance of a voice type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterDescriptor {
    pub id: &'static str,
    pub label: &'static str,
    pub min: f64,
    pub max: f64,
    pub default: f64,
}

impl ParameterDescriptor {
    pub const fn new(id: &'static str, label: &'static str, min: f64, max: f64, default: f64) -> Self {
        ParameterDescriptor {
            id,
            label,
            min,
            max,
            default,
        }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// The amplitude stage every voice owns. Engine-level mixing reads it, so
/// mixing works the same regardless of how a voice makes sound.
#[derive(Debug, Clone)]
pub struct OutputStage {
    gain: f64,
    connected: bool,
}

impl OutputStage {
    pub fn new() -> Self {
        OutputStage {
            gain: 1.0,
            connected: false,
        }
    }

    pub fn connect(&mut self) {
        self.connected = true;
    }

    pub fn disconnect(&mut self) {
        self.connected = false;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn set_gain(&mut self, gain: f64) {
        self.gain = gain.clamp(0.0, 1.0);
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }
}

impl Default for OutputStage {
    fn default() -> Self {
        OutputStage::new()
    }
}

/// A triggerable sound source.
///
/// `trigger` is the sole entry point that starts sound generation and must
/// not allocate — sample-based voices resolve their buffers in `prepare`
/// beforehand. When a trigger should happen is the engine's business; the
/// voice always starts immediately.
pub trait Voice {
    /// Start the sound at the given velocity [0, 1]. Resets the voice's
    /// internal envelope/filter/noise state.
    fn trigger(&mut self, velocity: f64);

    /// Close the gate. One-shot percussion ignores this.
    fn gate_off(&mut self) {}

    /// Pitch the voice for the next/current note. Percussion ignores this;
    /// the bass voice glides when `slide` is set.
    fn set_pitch(&mut self, _freq_hz: f64, _slide: bool) {}

    /// Switch the source waveform. Only oscillator-based voices respond.
    fn set_waveform(&mut self, _waveform: super::oscillator::Waveform) {}

    /// Produce the next output sample, after the voice's output gain.
    fn process_sample(&mut self) -> f64;

    /// Set a declared parameter. Unknown ids are an error; known values are
    /// clamped to the descriptor range.
    fn set_parameter(&mut self, id: &str, value: f64) -> Result<(), EngineError>;

    /// The controls this voice exposes.
    fn parameter_descriptors(&self) -> &'static [ParameterDescriptor];

    fn output(&self) -> &OutputStage;

    fn output_mut(&mut self) -> &mut OutputStage;

    /// Resolve per-render resources (cached sample buffers) before the
    /// real-time path runs.
    fn prepare(&mut self, _context: &RenderContext, _library: &mut SampleLibrary) {}

    /// Drop all playback state without touching parameters.
    fn reset(&mut self);

    /// Whether the voice is still producing audible output.
    fn is_active(&self) -> bool;

    /// Fast fade applied when another voice chokes this one (open hats).
    fn choke(&mut self) {}
}

/// Shared helper: reject ids missing from a descriptor table, clamp known
/// values into range.
pub fn clamp_parameter(
    descriptors: &'static [ParameterDescriptor],
    voice: &str,
    id: &str,
    value: f64,
) -> Result<f64, EngineError> {
    match descriptors.iter().find(|d| d.id == id) {
        Some(d) => Ok(d.clamp(value)),
        None => Err(EngineError::UnknownParameter {
            voice: voice.to_string(),
            parameter: id.to_string(),
        }),
    }
}
