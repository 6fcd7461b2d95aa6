//! Monophonic acid bass voice.
//!
//! One oscillator into the resonant ladder, with separate filter and amp
//! envelopes and a drive stage. Accented notes open the filter further and
//! momentarily boost resonance for the characteristic squelch; slid notes
//! glide to the new pitch without retriggering the envelopes.

use crate::error::EngineError;

use super::drive::{Drive, DriveCurve};
use super::envelope::AdsrEnvelope;
use super::ladder::LadderFilter;
use super::oscillator::{Oscillator, Waveform};
use super::voice::{clamp_parameter, OutputStage, ParameterDescriptor, Voice};

static BASS_PARAMS: [ParameterDescriptor; 7] = [
    ParameterDescriptor::new("cutoff", "Cutoff", 0.0, 1.0, 0.3),
    ParameterDescriptor::new("resonance", "Resonance", 0.0, 1.0, 0.45),
    ParameterDescriptor::new("env_mod", "Env Mod", 0.0, 1.0, 0.75),
    ParameterDescriptor::new("decay", "Decay", 0.0, 1.0, 0.45),
    ParameterDescriptor::new("accent", "Accent", 0.0, 1.0, 0.8),
    ParameterDescriptor::new("level", "Level", 0.0, 1.0, 0.8),
    ParameterDescriptor::new("slide", "Slide Time", 0.01, 0.3, 0.06),
];

/// Velocity at or above which a trigger counts as accented.
const ACCENT_VELOCITY: f64 = 1.0 - 1e-9;

/// Map a normalized 0–1 cutoff control onto 20 Hz–16 kHz, log scale.
pub fn normalized_to_hz(normalized: f64) -> f64 {
    20.0 * (800.0_f64).powf(normalized.clamp(0.0, 1.0))
}

pub struct BassVoice {
    sample_rate: f64,

    cutoff: f64,
    resonance: f64,
    env_mod: f64,
    decay: f64,
    accent: f64,
    level: f64,
    slide_time: f64,

    osc: Oscillator,
    filter: LadderFilter,
    filter_env: AdsrEnvelope,
    amp_env: AdsrEnvelope,
    drive: Drive,

    current_freq: f64,
    target_freq: f64,
    slide_coef: f64,
    gate_open: bool,
    accent_active: bool,
    accent_res_boost: f64,

    output: OutputStage,
}

impl BassVoice {
    pub fn new(sample_rate: f64) -> Self {
        let mut voice = BassVoice {
            sample_rate,
            cutoff: 0.3,
            resonance: 0.45,
            env_mod: 0.75,
            decay: 0.45,
            accent: 0.8,
            level: 0.8,
            slide_time: 0.06,
            osc: Oscillator::new(Waveform::Sawtooth, sample_rate),
            filter: LadderFilter::new(sample_rate),
            filter_env: AdsrEnvelope::new(sample_rate),
            amp_env: AdsrEnvelope::new(sample_rate),
            drive: Drive::new(sample_rate),
            current_freq: 110.0,
            target_freq: 110.0,
            slide_coef: 0.0,
            gate_open: false,
            accent_active: false,
            accent_res_boost: 0.0,
            output: OutputStage::new(),
        };
        voice.configure_envelopes();
        // Subtle fixed saturation, always in circuit
        voice.drive.set_amount(20.0);
        voice.drive.set_curve(DriveCurve::Soft);
        voice
    }

    pub fn waveform(&self) -> Waveform {
        self.osc.waveform
    }

    fn configure_envelopes(&mut self) {
        // Filter: instant attack, knob-controlled decay, full sweep down
        self.filter_env
            .set_parameters(0.0, self.decay * 100.0, 0.0, 5.0);
        // Amp: instant attack, short decay into a high sustain
        self.amp_env.set_parameters(0.0, 10.0, 80.0, 10.0);
        self.slide_coef = 1.0 - (-4.6 / (self.slide_time * self.sample_rate)).exp();
    }
}

impl Voice for BassVoice {
    /// New note: retrigger both envelopes (value-preserving, so a retrigger
    /// mid-release is click-free) and arm the accent boosts when the hit is
    /// at peak velocity.
    fn trigger(&mut self, velocity: f64) {
        let velocity = velocity.clamp(0.0, 1.0);
        let accented = velocity >= ACCENT_VELOCITY;
        self.amp_env
            .trigger(if accented { 1.0 } else { velocity * 0.7 });
        self.filter_env
            .trigger(if accented { 1.0 + 0.5 * self.accent } else { 1.0 });
        self.accent_active = accented;
        self.accent_res_boost = if accented { 35.0 * self.accent } else { 0.0 };
        self.gate_open = true;
    }

    fn gate_off(&mut self) {
        self.amp_env.gate_off();
        self.filter_env.gate_off();
        self.gate_open = false;
    }

    fn set_waveform(&mut self, waveform: Waveform) {
        self.osc.waveform = waveform;
    }

    /// Pitch the voice. With `slide` set while the gate is open, the pitch
    /// glides; otherwise it jumps.
    fn set_pitch(&mut self, freq_hz: f64, slide: bool) {
        self.target_freq = freq_hz.max(1.0);
        if !(slide && self.gate_open) {
            self.current_freq = self.target_freq;
        }
    }

    fn process_sample(&mut self) -> f64 {
        if !self.amp_env.is_active() {
            return 0.0;
        }

        // Exponential glide toward the slide target
        let gap = self.target_freq - self.current_freq;
        if gap.abs() > 1e-3 {
            self.current_freq += gap * self.slide_coef;
        } else {
            self.current_freq = self.target_freq;
        }
        self.osc.set_frequency(self.current_freq);

        let mut sample = self.osc.next_sample();

        let amp = self.amp_env.process_sample();
        let filter_env = self.filter_env.process_sample();

        // The accent resonance boost decays over ~50 ms for a snappy squelch
        if self.accent_res_boost > 0.0 {
            self.accent_res_boost *= 0.9995;
            if self.accent_res_boost < 0.5 {
                self.accent_res_boost = 0.0;
            }
        }

        let base_cutoff = normalized_to_hz(self.cutoff);
        let accent_cutoff_boost = if self.accent_active { 1.0 + 0.4 * self.accent } else { 1.0 };
        let mod_cutoff =
            (base_cutoff + self.env_mod * filter_env * 10_000.0 * accent_cutoff_boost)
                .clamp(20.0, 18_000.0);
        // Multiplicative resonance boost, capped below self-oscillation
        let accent_mult = 1.0 + self.accent_res_boost / 100.0;
        let mod_resonance = (self.resonance * accent_mult).min(0.85);

        self.filter.set_frequency(mod_cutoff);
        self.filter.set_resonance(mod_resonance);
        sample = self.filter.process_sample(sample);

        sample *= amp;
        sample = self.drive.process_sample(sample);

        sample * self.level * self.output.gain()
    }

    fn set_parameter(&mut self, id: &str, value: f64) -> Result<(), EngineError> {
        let v = clamp_parameter(&BASS_PARAMS, "bass", id, value)?;
        match id {
            "cutoff" => self.cutoff = v,
            "resonance" => self.resonance = v,
            "env_mod" => self.env_mod = v,
            "decay" => {
                self.decay = v;
                self.configure_envelopes();
            }
            "accent" => self.accent = v,
            "level" => self.level = v,
            "slide" => {
                self.slide_time = v;
                self.configure_envelopes();
            }
            _ => unreachable!(),
        }
        Ok(())
    }

    fn parameter_descriptors(&self) -> &'static [ParameterDescriptor] {
        &BASS_PARAMS
    }

    fn output(&self) -> &OutputStage {
        &self.output
    }

    fn output_mut(&mut self) -> &mut OutputStage {
        &mut self.output
    }

    fn reset(&mut self) {
        self.osc.reset();
        self.filter.reset();
        self.filter_env.reset();
        self.amp_env.reset();
        self.drive.reset();
        self.gate_open = false;
        self.accent_active = false;
        self.accent_res_boost = 0.0;
    }

    fn is_active(&self) -> bool {
        self.amp_env.is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peak(buf: &[f64]) -> f64 {
        buf.iter().fold(0.0_f64, |m, &s| m.max(s.abs()))
    }

    fn play(voice: &mut BassVoice, freq: f64, velocity: f64, samples: usize) -> Vec<f64> {
        voice.output_mut().connect();
        voice.set_pitch(freq, false);
        voice.trigger(velocity);
        (0..samples).map(|_| voice.process_sample()).collect()
    }

    #[test]
    fn produces_sound_and_stays_bounded() {
        let mut bass = BassVoice::new(44100.0);
        let buf = play(&mut bass, 55.0, 0.8, 22050);
        assert!(peak(&buf) > 0.01, "bass should be audible");
        assert!(peak(&buf) <= 1.0 + 1e-6, "bass should stay bounded");
    }

    #[test]
    fn gate_off_fades_to_silence() {
        let mut bass = BassVoice::new(44100.0);
        play(&mut bass, 110.0, 0.8, 4410);
        bass.gate_off();
        let mut tail = Vec::new();
        for _ in 0..44100 {
            tail.push(bass.process_sample());
        }
        assert!(!bass.is_active(), "bass should go idle after release");
        assert!(peak(&tail[22050..]) < 1e-3);
    }

    #[test]
    fn accent_is_louder_and_brighter() {
        let mut plain = BassVoice::new(44100.0);
        let plain_buf = play(&mut plain, 110.0, 0.8, 11025);

        let mut accented = BassVoice::new(44100.0);
        let accent_buf = play(&mut accented, 110.0, 1.0, 11025);

        assert!(peak(&accent_buf) > peak(&plain_buf), "accent should be louder");

        let zcr = |buf: &[f64]| buf.windows(2).filter(|w| w[0] * w[1] < 0.0).count();
        assert!(
            zcr(&accent_buf) >= zcr(&plain_buf),
            "accent should open the filter at least as far"
        );
    }

    #[test]
    fn slide_glides_without_retrigger() {
        let mut bass = BassVoice::new(44100.0);
        play(&mut bass, 110.0, 0.8, 2205);
        let before = bass.current_freq;

        bass.set_pitch(220.0, true);
        for _ in 0..441 {
            bass.process_sample();
        }
        let early = bass.current_freq;
        for _ in 0..8820 {
            bass.process_sample();
        }
        let settled = bass.current_freq;

        assert!(before < early && early < 220.0, "glide should be gradual, at {early}");
        assert!((settled - 220.0).abs() < 1.0, "glide should settle at the target");
    }

    #[test]
    fn unslid_pitch_change_jumps() {
        let mut bass = BassVoice::new(44100.0);
        play(&mut bass, 110.0, 0.8, 100);
        bass.set_pitch(220.0, false);
        assert_eq!(bass.current_freq, 220.0);
    }

    #[test]
    fn retrigger_mid_release_has_no_click() {
        let mut bass = BassVoice::new(44100.0);
        let mut rendered = play(&mut bass, 110.0, 0.8, 8820);
        bass.gate_off();
        // The amp release is ~22ms; stay well inside it
        for _ in 0..441 {
            rendered.push(bass.process_sample());
        }
        // Retrigger while the release is still sounding
        assert!(bass.is_active());
        let boundary = rendered.len();
        bass.set_pitch(110.0, false);
        bass.trigger(0.8);
        for _ in 0..2205 {
            rendered.push(bass.process_sample());
        }

        let max_step = |buf: &[f64]| {
            buf.windows(2)
                .map(|w| (w[1] - w[0]).abs())
                .fold(0.0_f64, f64::max)
        };
        // The retrigger boundary may not step harder than the signal already
        // does during normal playback (saw edges through an open filter).
        let normal = max_step(&rendered[441..8820]);
        let at_boundary = max_step(&rendered[boundary - 1..boundary + 64]);
        assert!(
            at_boundary <= normal + 0.02,
            "retrigger clicked: boundary step {at_boundary} vs normal {normal}"
        );
    }

    #[test]
    fn waveform_is_switchable() {
        let mut bass = BassVoice::new(44100.0);
        bass.set_waveform(Waveform::Square);
        assert_eq!(bass.waveform(), Waveform::Square);
        let buf = play(&mut bass, 82.4, 0.8, 4410);
        assert!(peak(&buf) > 0.01);
    }

    #[test]
    fn rejects_unknown_parameter() {
        let mut bass = BassVoice::new(44100.0);
        assert!(bass.set_parameter("wobble", 0.5).is_err());
        assert!(bass.set_parameter("cutoff", 5.0).is_ok());
    }

    #[test]
    fn is_deterministic() {
        let mut a = BassVoice::new(44100.0);
        let mut b = BassVoice::new(44100.0);
        assert_eq!(play(&mut a, 65.4, 1.0, 11025), play(&mut b, 65.4, 1.0, 11025));
    }
}
