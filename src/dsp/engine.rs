//! Synth engine — owns the voice set, the sequencer, and the output graph.
//!
//! The engine is the single entry point the command surface talks to:
//! register voices, set the pattern and parameters, trigger sounds, and
//! render a request deterministically to a buffer.

use std::collections::BTreeMap;

use crate::error::EngineError;
use crate::pattern::{Pattern, STEPS_PER_BAR};

use super::bass::BassVoice;
use super::drums::{ClapVoice, KickVoice, MetalKind, MetalVoice, RimshotVoice, SnareVoice, TomRange, TomVoice};
use super::mixer::OutputBus;
use super::oscillator::Waveform;
use super::renderer::{AudioBuffer, OutputManager, RenderOptions};
use super::sample::{default_percussion_library, SampleLibrary};
use super::sequencer::{expand_pattern, step_duration, EventKind, ScheduledEvent, StepSequencer};
use super::voice::{ParameterDescriptor, Voice};

/// Everything that determines one reproducible render.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub pattern: Pattern,
    /// `"<voice>.<param>"` keys, e.g. `"kick.decay"` or `"bass.cutoff"`.
    pub parameters: BTreeMap<String, f64>,
    pub waveform: Option<Waveform>,
    pub bpm: f64,
    pub bars: usize,
    pub sample_rate: Option<u32>,
    pub channels: Option<usize>,
}

impl RenderRequest {
    pub fn new(pattern: Pattern, bpm: f64, bars: usize) -> Self {
        RenderRequest {
            pattern,
            parameters: BTreeMap::new(),
            waveform: None,
            bpm,
            bars,
            sample_rate: None,
            channels: None,
        }
    }
}

/// Parse a note name (e.g. "C2", "F#3", "Bb5") into a MIDI note number.
pub fn note_to_midi(note: &str) -> Option<i32> {
    let bytes = note.as_bytes();
    if bytes.is_empty() {
        return None;
    }

    let base_semitone = match bytes[0] as char {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };

    let mut idx = 1;
    let mut semitone = base_semitone;
    if idx < bytes.len() {
        match bytes[idx] as char {
            '#' => {
                semitone += 1;
                idx += 1;
            }
            'b' => {
                semitone -= 1;
                idx += 1;
            }
            _ => {}
        }
    }

    let octave: i32 = note[idx..].parse().ok()?;
    // MIDI note number: C4 = 60
    Some((octave + 1) * 12 + semitone)
}

/// Convert a MIDI note number to frequency (A4 = 440 Hz).
pub fn midi_to_frequency(midi: i32) -> f64 {
    440.0 * (2.0_f64).powf((midi as f64 - 69.0) / 12.0)
}

/// Note-name-to-frequency shortcut.
pub fn note_to_frequency(note: &str) -> Option<f64> {
    note_to_midi(note).map(midi_to_frequency)
}

/// Default lookahead window for live scheduling, in seconds.
const LIVE_LOOKAHEAD: f64 = 0.1;

pub struct SynthEngine {
    sample_rate: f64,
    voices: BTreeMap<String, Box<dyn Voice>>,
    pub sequencer: StepSequencer,
    library: SampleLibrary,
    bus: OutputBus,
    output_manager: OutputManager,
    /// When the left voice triggers, the right voice is cut short.
    choke_pairs: Vec<(String, String)>,
    /// Live-mode transport position in seconds.
    transport_time: f64,
    /// Live events scheduled ahead of their audible time.
    pending: Vec<ScheduledEvent>,
}

impl SynthEngine {
    pub fn new(sample_rate: f64) -> Self {
        SynthEngine {
            sample_rate,
            voices: BTreeMap::new(),
            sequencer: StepSequencer::new(120.0),
            library: SampleLibrary::new(),
            bus: OutputBus::new(sample_rate),
            output_manager: OutputManager,
            choke_pairs: Vec::new(),
            transport_time: 0.0,
            pending: Vec::new(),
        }
    }

    /// An engine with the full default kit: the synthesized drum set, the
    /// sample-backed hats/cymbals, and the acid bass, plus the closed-hat /
    /// open-hat choke rule.
    pub fn with_default_kit(sample_rate: f64) -> Self {
        let mut engine = SynthEngine::new(sample_rate);
        engine.library = default_percussion_library();

        engine.register_voice("kick", Box::new(KickVoice::new(sample_rate)));
        engine.register_voice("snare", Box::new(SnareVoice::new(sample_rate)));
        engine.register_voice("clap", Box::new(ClapVoice::new(sample_rate)));
        engine.register_voice("rimshot", Box::new(RimshotVoice::new(sample_rate)));
        engine.register_voice("ltom", Box::new(TomVoice::new(sample_rate, TomRange::Low)));
        engine.register_voice("mtom", Box::new(TomVoice::new(sample_rate, TomRange::Mid)));
        engine.register_voice("htom", Box::new(TomVoice::new(sample_rate, TomRange::High)));
        engine.register_voice("ch", Box::new(MetalVoice::new(sample_rate, MetalKind::ClosedHat)));
        engine.register_voice("oh", Box::new(MetalVoice::new(sample_rate, MetalKind::OpenHat)));
        engine.register_voice("crash", Box::new(MetalVoice::new(sample_rate, MetalKind::Crash)));
        engine.register_voice("ride", Box::new(MetalVoice::new(sample_rate, MetalKind::Ride)));
        engine.register_voice("bass", Box::new(BassVoice::new(sample_rate)));

        engine.add_choke_pair("ch", "oh");
        engine
    }

    /// Register a voice under an id, connecting it to the mix bus. Replaces
    /// any voice previously registered under the same id.
    pub fn register_voice(&mut self, id: &str, mut voice: Box<dyn Voice>) {
        voice.output_mut().connect();
        self.voices.insert(id.to_string(), voice);
    }

    /// A closed-hat-style choke rule: triggering `trigger_id` cuts
    /// `choked_id` short.
    pub fn add_choke_pair(&mut self, trigger_id: &str, choked_id: &str) {
        self.choke_pairs
            .push((trigger_id.to_string(), choked_id.to_string()));
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn voice_ids(&self) -> Vec<&str> {
        self.voices.keys().map(String::as_str).collect()
    }

    pub fn has_voice(&self, id: &str) -> bool {
        self.voices.contains_key(id)
    }

    /// Declared controls of every voice, for UIs and CLIs.
    pub fn parameter_descriptors(&self) -> BTreeMap<String, &'static [ParameterDescriptor]> {
        self.voices
            .iter()
            .map(|(id, voice)| (id.clone(), voice.parameter_descriptors()))
            .collect()
    }

    pub fn sample_library(&mut self) -> &mut SampleLibrary {
        &mut self.library
    }

    pub fn is_voice_active(&self, id: &str) -> Result<bool, EngineError> {
        self.voices
            .get(id)
            .map(|v| v.is_active())
            .ok_or_else(|| EngineError::UnknownVoice { voice: id.to_string() })
    }

    /// Trigger a voice immediately. Fails without touching any state when
    /// the id is unknown.
    pub fn trigger(&mut self, voice_id: &str, velocity: f64) -> Result<(), EngineError> {
        if !self.voices.contains_key(voice_id) {
            return Err(EngineError::UnknownVoice {
                voice: voice_id.to_string(),
            });
        }
        self.apply_chokes(voice_id);
        if let Some(voice) = self.voices.get_mut(voice_id) {
            voice.trigger(velocity.clamp(0.0, 1.0));
        }
        Ok(())
    }

    pub fn set_voice_parameter(
        &mut self,
        voice_id: &str,
        parameter: &str,
        value: f64,
    ) -> Result<(), EngineError> {
        let voice = self
            .voices
            .get_mut(voice_id)
            .ok_or_else(|| EngineError::UnknownVoice {
                voice: voice_id.to_string(),
            })?;
        voice.set_parameter(parameter, value)
    }

    /// Apply a `"voice.param"` keyed map.
    pub fn apply_parameters(&mut self, parameters: &BTreeMap<String, f64>) -> Result<(), EngineError> {
        for (key, &value) in parameters {
            let Some((voice_id, param)) = key.split_once('.') else {
                return Err(EngineError::UnknownVoice { voice: key.clone() });
            };
            self.set_voice_parameter(voice_id, param, value)?;
        }
        Ok(())
    }

    /// Validate and install a pattern: every referenced voice must be
    /// registered, step counts must be uniform, and note names must parse.
    pub fn set_pattern(&mut self, pattern: Pattern) -> Result<(), EngineError> {
        pattern.validate()?;
        for (voice_id, track) in &pattern.tracks {
            if !self.voices.contains_key(voice_id) {
                return Err(EngineError::InvalidPattern {
                    reason: format!("pattern references unknown voice \"{voice_id}\""),
                });
            }
            for (i, step) in track.iter().enumerate() {
                if let Some(note) = &step.note {
                    if note_to_midi(note).is_none() {
                        return Err(EngineError::InvalidPattern {
                            reason: format!(
                                "track \"{voice_id}\" step {i} has unparseable note \"{note}\""
                            ),
                        });
                    }
                }
            }
        }
        self.sequencer.set_pattern(pattern);
        Ok(())
    }

    pub fn start(&mut self) {
        self.sequencer.start(self.transport_time);
    }

    /// Stop playback: pending scheduled triggers are dropped, but audio
    /// already rendered is not affected.
    pub fn stop(&mut self) {
        self.sequencer.stop();
        self.pending.clear();
    }

    pub fn is_playing(&self) -> bool {
        self.sequencer.is_playing()
    }

    fn apply_chokes(&mut self, trigger_id: &str) {
        apply_chokes(&mut self.voices, &self.choke_pairs, trigger_id);
    }

    fn apply_event(&mut self, event: &ScheduledEvent) {
        dispatch_event(&mut self.voices, &self.choke_pairs, event);
    }

    /// Mix one sample from every connected voice through the bus.
    #[inline]
    fn mix_sample(&mut self) -> f64 {
        let mut mixed = 0.0;
        for voice in self.voices.values_mut() {
            if voice.output().is_connected() {
                mixed += voice.process_sample();
            }
        }
        self.bus.process(mixed)
    }

    /// Live mode: fill one output block, firing sequencer events as their
    /// times arrive. The lookahead keeps event computation off the
    /// per-sample path.
    pub fn process_block(&mut self, block: &mut [f64]) {
        let block_start = self.transport_time;
        let lookahead = LIVE_LOOKAHEAD.max(block.len() as f64 / self.sample_rate);
        self.sequencer
            .collect_events(block_start, lookahead, &mut self.pending);
        self.pending
            .sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap_or(std::cmp::Ordering::Equal));

        for (i, out) in block.iter_mut().enumerate() {
            let now = block_start + i as f64 / self.sample_rate;
            while let Some(event) = self.pending.first() {
                if event.time > now {
                    break;
                }
                let event = self.pending.remove(0);
                self.apply_event(&event);
            }
            *out = self.mix_sample();
        }
        self.transport_time += block.len() as f64 / self.sample_rate;
    }

    /// Render a request to a buffer: fully deterministic, offline, no tail
    /// past the last bar.
    pub fn render_to_buffer(&mut self, request: &RenderRequest) -> Result<AudioBuffer, EngineError> {
        if request.bpm <= 0.0 {
            return Err(EngineError::InvalidPattern {
                reason: format!("bpm must be positive, got {}", request.bpm),
            });
        }
        if request.bars == 0 {
            return Err(EngineError::InvalidPattern {
                reason: "bars must be at least 1".to_string(),
            });
        }
        self.set_pattern(request.pattern.clone())?;
        self.apply_parameters(&request.parameters)?;
        if let Some(waveform) = request.waveform {
            for voice in self.voices.values_mut() {
                voice.set_waveform(waveform);
            }
        }

        let options = RenderOptions {
            sample_rate: request.sample_rate.unwrap_or(self.sample_rate as u32),
            channels: request.channels.unwrap_or(2),
        };
        let duration = request.bars as f64 * STEPS_PER_BAR as f64 * step_duration(request.bpm);
        let events = expand_pattern(
            &request.pattern,
            request.bpm,
            request.bars,
            self.sequencer.swing(),
        );
        log::info!(
            "rendering {} bars at {} bpm: {} events, {:.3}s",
            request.bars,
            request.bpm,
            events.len(),
            duration
        );

        let voices = &mut self.voices;
        let library = &mut self.library;
        let bus = &mut self.bus;
        let choke_pairs = &self.choke_pairs;
        let mut context_id = 0;

        let render_rate = options.sample_rate as f64;
        let buffer = self.output_manager.render_offline(duration, options, |context, buffer| {
            context_id = context.id();

            // Fresh state for a reproducible pass
            bus.reset();
            for voice in voices.values_mut() {
                voice.reset();
                voice.prepare(context, library);
            }

            let event_samples: Vec<(usize, &ScheduledEvent)> = events
                .iter()
                .map(|e| ((e.time * render_rate).round() as usize, e))
                .collect();

            let frames = buffer.frames();
            let mut next_event = 0;
            for frame in 0..frames {
                while next_event < event_samples.len() && event_samples[next_event].0 <= frame {
                    dispatch_event(voices, choke_pairs, event_samples[next_event].1);
                    next_event += 1;
                }

                let mut mixed = 0.0;
                for voice in voices.values_mut() {
                    if voice.output().is_connected() {
                        mixed += voice.process_sample();
                    }
                }
                let out = bus.process(mixed);
                for channel in &mut buffer.channels {
                    channel[frame] = out;
                }
            }
        });

        // The render context is dead; evict its cached sample buffers.
        self.library.invalidate_context(context_id);
        Ok(buffer)
    }

    /// Encode a rendered buffer as WAV bytes.
    pub fn audio_buffer_to_wav(&self, buffer: &AudioBuffer) -> Vec<u8> {
        self.output_manager.audio_buffer_to_wav(buffer)
    }
}

fn apply_chokes(
    voices: &mut BTreeMap<String, Box<dyn Voice>>,
    choke_pairs: &[(String, String)],
    trigger_id: &str,
) {
    for (trigger, choked) in choke_pairs {
        if trigger == trigger_id {
            if let Some(voice) = voices.get_mut(choked) {
                voice.choke();
            }
        }
    }
}

/// Apply one scheduled event to the voice set. Shared by the live block
/// path and the offline render loop.
fn dispatch_event(
    voices: &mut BTreeMap<String, Box<dyn Voice>>,
    choke_pairs: &[(String, String)],
    event: &ScheduledEvent,
) {
    match &event.kind {
        EventKind::Trigger {
            velocity,
            note,
            slide,
        } => {
            apply_chokes(voices, choke_pairs, &event.voice);
            let freq = note.as_deref().and_then(note_to_frequency);
            if let Some(voice) = voices.get_mut(&event.voice) {
                if let Some(freq) = freq {
                    voice.set_pitch(freq, *slide);
                    if *slide && voice.is_active() {
                        // A slid note glides; the envelopes keep running
                        return;
                    }
                }
                voice.trigger(*velocity);
            }
        }
        EventKind::GateOff => {
            if let Some(voice) = voices.get_mut(&event.voice) {
                voice.gate_off();
            }
        }
    }
}
