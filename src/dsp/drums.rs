//! Percussion voices — per-sample models of the classic drum machine
//! circuits.
//!
//! Kick, snare, clap, rimshot, and toms are fully synthesized; hats and
//! cymbals play library samples and fall back to synthesis when no sample is
//! registered. Parameter ids, ranges, and defaults follow the hardware-style
//! control panels.

use std::sync::Arc;

use crate::error::EngineError;

use super::filter::{BiquadFilter, FilterType};
use super::noise::LfsrNoise;
use super::renderer::RenderContext;
use super::sample::SampleLibrary;
use super::voice::{clamp_parameter, OutputStage, ParameterDescriptor, Voice};

#[inline]
fn cents_ratio(cents: f64) -> f64 {
    (2.0_f64).powf(cents / 1200.0)
}

#[inline]
fn semitone_ratio(semitones: f64) -> f64 {
    (2.0_f64).powf(semitones / 12.0)
}

/// Per-sample multiplier that walks a value from `from` to `to` in `seconds`.
#[inline]
fn ramp_coef(from: f64, to: f64, seconds: f64, sample_rate: f64) -> f64 {
    let samples = (seconds * sample_rate).max(1.0);
    (to / from).powf(1.0 / samples)
}

/// Multiplier decaying to 1/1000 of the start value over `seconds`.
#[inline]
fn decay_coef(seconds: f64, sample_rate: f64) -> f64 {
    ramp_coef(1.0, 1e-3, seconds, sample_rate)
}

/// Floor under which an exponentially decaying partial counts as silent.
const SILENCE: f64 = 1e-4;

// ── Kick ────────────────────────────────────────────────────

static KICK_PARAMS: [ParameterDescriptor; 5] = [
    ParameterDescriptor::new("tune", "Tune", -1200.0, 1200.0, 0.0),
    ParameterDescriptor::new("decay", "Decay", 0.05, 2.0, 0.8),
    ParameterDescriptor::new("attack", "Attack", 0.0, 1.0, 0.5),
    ParameterDescriptor::new("sweep", "Sweep", 0.0, 1.0, 1.0),
    ParameterDescriptor::new("level", "Level", 0.0, 1.0, 1.0),
];

/// Swept triangle through a diode-style clipper, with an impulse click and a
/// lowpassed noise thump on the attack.
pub struct KickVoice {
    sample_rate: f64,
    tune: f64,
    decay: f64,
    attack: f64,
    sweep: f64,
    level: f64,

    phase: f64,
    freq: f64,
    base_freq: f64,
    freq_coef: f64,
    amp: f64,
    amp_coef: f64,
    hold_samples: usize,
    click_idx: usize,
    click_level: f64,
    noise: LfsrNoise,
    noise_filter: BiquadFilter,
    elapsed: usize,
    length: usize,
    output: OutputStage,
}

impl KickVoice {
    pub fn new(sample_rate: f64) -> Self {
        KickVoice {
            sample_rate,
            tune: 0.0,
            decay: 0.8,
            attack: 0.5,
            sweep: 1.0,
            level: 1.0,
            phase: 0.0,
            freq: 55.0,
            base_freq: 55.0,
            freq_coef: 1.0,
            amp: 0.0,
            amp_coef: 1.0,
            hold_samples: 0,
            click_idx: usize::MAX,
            click_level: 0.0,
            noise: LfsrNoise::new(),
            noise_filter: BiquadFilter::with_params(FilterType::Lowpass, sample_rate, 3000.0, 0.7),
            elapsed: 0,
            length: 0,
            output: OutputStage::new(),
        }
    }

    /// The back-to-back diode clipper: linear below the knee, heavily
    /// compressed above it, turning a triangle into a rounded pseudo-sine.
    #[inline]
    fn diode_clip(x: f64) -> f64 {
        let threshold = 0.6;
        if x.abs() < threshold {
            x
        } else {
            let excess = x.abs() - threshold;
            x.signum() * (threshold + excess * 0.3)
        }
    }
}

impl Voice for KickVoice {
    fn trigger(&mut self, velocity: f64) {
        let peak = (velocity * self.level).clamp(0.0, 1.0);
        self.base_freq = 55.0 * cents_ratio(self.tune);
        let sweep_time = 0.03 + (1.0 - self.attack) * 0.09;
        let peak_freq = self.base_freq * (1.0 + self.sweep);

        self.phase = 0.0;
        self.freq = peak_freq;
        self.freq_coef = if self.sweep > 0.01 {
            ramp_coef(peak_freq, self.base_freq, sweep_time, self.sample_rate)
        } else {
            1.0
        };

        let decay_time = 0.15 + self.decay * 0.85;
        self.amp = peak;
        self.hold_samples = (0.005 * self.sample_rate) as usize;
        // setTargetAtTime-style tail: one time constant per decay_time * 0.2
        self.amp_coef = (-1.0 / (decay_time * 0.2 * self.sample_rate)).exp();

        self.click_idx = 0;
        self.click_level = if self.level > 0.1 { peak } else { 0.0 };
        self.noise.reset(super::noise::DEFAULT_SEED);
        self.noise_filter.reset();

        self.elapsed = 0;
        self.length = ((decay_time + 0.5) * self.sample_rate) as usize;
    }

    fn process_sample(&mut self) -> f64 {
        if self.elapsed >= self.length {
            return 0.0;
        }
        self.elapsed += 1;

        // Body: swept triangle through the clipper
        let tri = if self.phase < 0.5 {
            4.0 * self.phase - 1.0
        } else {
            3.0 - 4.0 * self.phase
        };
        let body = Self::diode_clip(tri) * self.amp;

        self.phase += self.freq / self.sample_rate;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        if self.freq > self.base_freq {
            self.freq = (self.freq * self.freq_coef).max(self.base_freq);
        }
        if self.hold_samples > 0 {
            self.hold_samples -= 1;
        } else {
            self.amp *= self.amp_coef;
        }

        // Attack transient: short impulse plus a lowpassed noise thump
        let mut click = 0.0;
        if self.click_idx < 128 && self.click_level > 0.0 {
            let i = self.click_idx as f64;
            let impulse = if self.click_idx < 8 { (-i / 6.0).exp() } else { 0.0 };
            let thump = self.noise_filter.process(self.noise.next() * (-i / 20.0).exp());
            click = impulse * self.click_level * 0.5 + thump * self.click_level * 0.3;
            self.click_idx += 1;
        }

        (body + click) * self.output.gain()
    }

    fn set_parameter(&mut self, id: &str, value: f64) -> Result<(), EngineError> {
        let v = clamp_parameter(&KICK_PARAMS, "kick", id, value)?;
        match id {
            "tune" => self.tune = v,
            "decay" => self.decay = v,
            "attack" => self.attack = v,
            "sweep" => self.sweep = v,
            "level" => self.level = v,
            _ => unreachable!(),
        }
        Ok(())
    }

    fn parameter_descriptors(&self) -> &'static [ParameterDescriptor] {
        &KICK_PARAMS
    }

    fn output(&self) -> &OutputStage {
        &self.output
    }

    fn output_mut(&mut self) -> &mut OutputStage {
        &mut self.output
    }

    fn reset(&mut self) {
        self.elapsed = 0;
        self.length = 0;
        self.amp = 0.0;
        self.phase = 0.0;
        self.click_idx = usize::MAX;
        self.noise_filter.reset();
    }

    fn is_active(&self) -> bool {
        self.elapsed < self.length && self.amp > SILENCE
    }
}

// ── Snare ───────────────────────────────────────────────────

static SNARE_PARAMS: [ParameterDescriptor; 4] = [
    ParameterDescriptor::new("tune", "Tune", -1200.0, 1200.0, 0.0),
    ParameterDescriptor::new("tone", "Tone", 0.0, 1.0, 0.5),
    ParameterDescriptor::new("snappy", "Snappy", 0.0, 1.0, 0.5),
    ParameterDescriptor::new("level", "Level", 0.0, 1.0, 1.0),
];

/// Two swept sine partials for the shell plus band-limited noise for the
/// wires. `snappy` trades body against noise.
pub struct SnareVoice {
    sample_rate: f64,
    tune: f64,
    tone: f64,
    snappy: f64,
    level: f64,

    phase1: f64,
    freq1: f64,
    base1: f64,
    coef1: f64,
    amp1: f64,
    amp1_coef: f64,

    phase2: f64,
    freq2: f64,
    base2: f64,
    coef2: f64,
    amp2: f64,
    amp2_coef: f64,

    noise: LfsrNoise,
    highpass: BiquadFilter,
    lowpass: BiquadFilter,
    noise_amp: f64,
    noise_coef: f64,

    elapsed: usize,
    length: usize,
    output: OutputStage,
}

impl SnareVoice {
    pub fn new(sample_rate: f64) -> Self {
        SnareVoice {
            sample_rate,
            tune: 0.0,
            tone: 0.5,
            snappy: 0.5,
            level: 1.0,
            phase1: 0.0,
            freq1: 180.0,
            base1: 180.0,
            coef1: 1.0,
            amp1: 0.0,
            amp1_coef: 1.0,
            phase2: 0.0,
            freq2: 330.0,
            base2: 330.0,
            coef2: 1.0,
            amp2: 0.0,
            amp2_coef: 1.0,
            noise: LfsrNoise::new(),
            highpass: BiquadFilter::with_params(FilterType::Highpass, sample_rate, 2250.0, 0.707),
            lowpass: BiquadFilter::with_params(FilterType::Lowpass, sample_rate, 6000.0, 0.707),
            noise_amp: 0.0,
            noise_coef: 1.0,
            elapsed: 0,
            length: 0,
            output: OutputStage::new(),
        }
    }
}

impl Voice for SnareVoice {
    fn trigger(&mut self, velocity: f64) {
        let peak = (velocity * self.level).clamp(0.0, 1.0);
        let tm = cents_ratio(self.tune);
        let body_mix = 1.0 - self.snappy * 0.5;

        self.base1 = 180.0 * tm;
        self.freq1 = self.base1 * 1.5;
        self.coef1 = ramp_coef(self.freq1, self.base1, 0.03, self.sample_rate);
        self.phase1 = 0.0;
        self.amp1 = peak * body_mix * 0.8;
        self.amp1_coef = decay_coef(0.15, self.sample_rate);

        self.base2 = 330.0 * tm;
        self.freq2 = self.base2 * 1.3;
        self.coef2 = ramp_coef(self.freq2, self.base2, 0.02, self.sample_rate);
        self.phase2 = 0.0;
        self.amp2 = peak * body_mix * 0.5;
        self.amp2_coef = decay_coef(0.08, self.sample_rate);

        self.noise.reset(super::noise::DEFAULT_SEED);
        self.highpass.set_frequency(1500.0 + self.tone * 1500.0);
        self.lowpass.set_frequency(4000.0 + self.tone * 4000.0);
        self.highpass.reset();
        self.lowpass.reset();
        let noise_decay = 0.15 + self.snappy * 0.1;
        self.noise_amp = peak * (0.3 + self.snappy * 0.7);
        self.noise_coef = decay_coef(noise_decay, self.sample_rate);

        self.elapsed = 0;
        self.length = ((noise_decay + 0.25) * self.sample_rate) as usize;
    }

    fn process_sample(&mut self) -> f64 {
        if self.elapsed >= self.length {
            return 0.0;
        }
        self.elapsed += 1;

        let s1 = (2.0 * std::f64::consts::PI * self.phase1).sin() * self.amp1;
        self.phase1 += self.freq1 / self.sample_rate;
        if self.phase1 >= 1.0 {
            self.phase1 -= 1.0;
        }
        if self.freq1 > self.base1 {
            self.freq1 = (self.freq1 * self.coef1).max(self.base1);
        }
        self.amp1 *= self.amp1_coef;

        let s2 = (2.0 * std::f64::consts::PI * self.phase2).sin() * self.amp2;
        self.phase2 += self.freq2 / self.sample_rate;
        if self.phase2 >= 1.0 {
            self.phase2 -= 1.0;
        }
        if self.freq2 > self.base2 {
            self.freq2 = (self.freq2 * self.coef2).max(self.base2);
        }
        self.amp2 *= self.amp2_coef;

        let wires = self.lowpass.process(self.highpass.process(self.noise.next())) * self.noise_amp;
        self.noise_amp *= self.noise_coef;

        (s1 + s2 + wires) * self.output.gain()
    }

    fn set_parameter(&mut self, id: &str, value: f64) -> Result<(), EngineError> {
        let v = clamp_parameter(&SNARE_PARAMS, "snare", id, value)?;
        match id {
            "tune" => self.tune = v,
            "tone" => self.tone = v,
            "snappy" => self.snappy = v,
            "level" => self.level = v,
            _ => unreachable!(),
        }
        Ok(())
    }

    fn parameter_descriptors(&self) -> &'static [ParameterDescriptor] {
        &SNARE_PARAMS
    }

    fn output(&self) -> &OutputStage {
        &self.output
    }

    fn output_mut(&mut self) -> &mut OutputStage {
        &mut self.output
    }

    fn reset(&mut self) {
        self.elapsed = 0;
        self.length = 0;
        self.amp1 = 0.0;
        self.amp2 = 0.0;
        self.noise_amp = 0.0;
        self.highpass.reset();
        self.lowpass.reset();
    }

    fn is_active(&self) -> bool {
        self.elapsed < self.length
    }
}

// ── Clap ────────────────────────────────────────────────────

static CLAP_PARAMS: [ParameterDescriptor; 3] = [
    ParameterDescriptor::new("tone", "Tone", 0.0, 1.0, 0.5),
    ParameterDescriptor::new("decay", "Decay", 0.0, 1.0, 0.5),
    ParameterDescriptor::new("level", "Level", 0.0, 1.0, 1.0),
];

const CLAP_BURST_OFFSETS: [f64; 4] = [0.0, 0.012, 0.024, 0.036];
const CLAP_BURST_GAINS: [f64; 4] = [0.8, 1.0, 0.7, 0.4];
const CLAP_BURST_DECAYS: [f64; 4] = [0.01, 0.01, 0.01, 0.04];

/// Four staggered noise bursts through a bandpass — the classic "many hands"
/// trick — followed by a longer bandpassed tail.
pub struct ClapVoice {
    sample_rate: f64,
    tone: f64,
    decay: f64,
    level: f64,

    peak: f64,
    next_burst: usize,
    burst_amp: f64,
    burst_coef: f64,
    tail_amp: f64,
    tail_coef: f64,
    tail_started: bool,

    noise: LfsrNoise,
    burst_filter: BiquadFilter,
    tail_filter: BiquadFilter,

    elapsed: usize,
    length: usize,
    output: OutputStage,
}

impl ClapVoice {
    pub fn new(sample_rate: f64) -> Self {
        ClapVoice {
            sample_rate,
            tone: 0.5,
            decay: 0.5,
            level: 1.0,
            peak: 0.0,
            next_burst: 0,
            burst_amp: 0.0,
            burst_coef: 1.0,
            tail_amp: 0.0,
            tail_coef: 1.0,
            tail_started: false,
            noise: LfsrNoise::new(),
            burst_filter: BiquadFilter::with_params(FilterType::Bandpass, sample_rate, 1150.0, 2.0),
            tail_filter: BiquadFilter::with_params(FilterType::Bandpass, sample_rate, 750.0, 3.0),
            elapsed: 0,
            length: 0,
            output: OutputStage::new(),
        }
    }
}

impl Voice for ClapVoice {
    fn trigger(&mut self, velocity: f64) {
        self.peak = (velocity * self.level).clamp(0.0, 1.0);
        self.next_burst = 0;
        self.burst_amp = 0.0;
        self.burst_coef = 1.0;
        self.tail_amp = 0.0;
        self.tail_started = false;
        self.noise.reset(super::noise::DEFAULT_SEED);
        self.burst_filter.set_frequency(300.0 + self.tone * 1700.0);
        self.burst_filter.reset();
        self.tail_filter.reset();

        let tail_decay = 0.03 + self.decay * 0.37;
        self.tail_coef = decay_coef(tail_decay, self.sample_rate);

        self.elapsed = 0;
        self.length = ((0.044 + tail_decay + 0.1) * self.sample_rate) as usize;
    }

    fn process_sample(&mut self) -> f64 {
        if self.elapsed >= self.length {
            return 0.0;
        }
        let t = self.elapsed as f64 / self.sample_rate;
        self.elapsed += 1;

        // Restart the burst envelope at each clap offset
        if self.next_burst < CLAP_BURST_OFFSETS.len() && t >= CLAP_BURST_OFFSETS[self.next_burst] {
            self.burst_amp = self.peak * CLAP_BURST_GAINS[self.next_burst];
            self.burst_coef = decay_coef(CLAP_BURST_DECAYS[self.next_burst], self.sample_rate);
            self.next_burst += 1;
        }
        if !self.tail_started && t >= 0.044 {
            self.tail_amp = self.peak * 0.3;
            self.tail_started = true;
        }

        let white = self.noise.next();
        let bursts = self.burst_filter.process(white) * self.burst_amp;
        self.burst_amp *= self.burst_coef;
        let tail = self.tail_filter.process(white) * self.tail_amp;
        self.tail_amp *= self.tail_coef;

        (bursts + tail) * self.output.gain()
    }

    fn set_parameter(&mut self, id: &str, value: f64) -> Result<(), EngineError> {
        let v = clamp_parameter(&CLAP_PARAMS, "clap", id, value)?;
        match id {
            "tone" => self.tone = v,
            "decay" => self.decay = v,
            "level" => self.level = v,
            _ => unreachable!(),
        }
        Ok(())
    }

    fn parameter_descriptors(&self) -> &'static [ParameterDescriptor] {
        &CLAP_PARAMS
    }

    fn output(&self) -> &OutputStage {
        &self.output
    }

    fn output_mut(&mut self) -> &mut OutputStage {
        &mut self.output
    }

    fn reset(&mut self) {
        self.elapsed = 0;
        self.length = 0;
        self.burst_amp = 0.0;
        self.tail_amp = 0.0;
        self.burst_filter.reset();
        self.tail_filter.reset();
    }

    fn is_active(&self) -> bool {
        self.elapsed < self.length
    }
}

// ── Rimshot ─────────────────────────────────────────────────

static RIMSHOT_PARAMS: [ParameterDescriptor; 2] = [
    ParameterDescriptor::new("level", "Level", 0.0, 1.0, 1.0),
    ParameterDescriptor::new("tone", "Tone", 0.0, 1.0, 0.5),
];

const RIM_FREQS: [f64; 3] = [220.0, 500.0, 1000.0];
const RIM_GAINS: [f64; 3] = [0.6, 1.0, 0.4];
const RIM_DECAYS: [f64; 3] = [0.05, 0.04, 0.03];

/// Three high-Q band-passed partials with a tiny pitch drop, plus a short
/// highpassed noise tick.
pub struct RimshotVoice {
    sample_rate: f64,
    level: f64,
    tone: f64,

    phases: [f64; 3],
    freqs: [f64; 3],
    coefs: [f64; 3],
    amps: [f64; 3],
    amp_coefs: [f64; 3],
    filters: [BiquadFilter; 3],

    noise: LfsrNoise,
    noise_filter: BiquadFilter,
    noise_amp: f64,
    noise_coef: f64,

    elapsed: usize,
    length: usize,
    output: OutputStage,
}

impl RimshotVoice {
    pub fn new(sample_rate: f64) -> Self {
        let filters = [
            BiquadFilter::with_params(FilterType::Bandpass, sample_rate, RIM_FREQS[0], 15.0),
            BiquadFilter::with_params(FilterType::Bandpass, sample_rate, RIM_FREQS[1], 15.0),
            BiquadFilter::with_params(FilterType::Bandpass, sample_rate, RIM_FREQS[2], 15.0),
        ];
        RimshotVoice {
            sample_rate,
            level: 1.0,
            tone: 0.5,
            phases: [0.0; 3],
            freqs: RIM_FREQS,
            coefs: [1.0; 3],
            amps: [0.0; 3],
            amp_coefs: [1.0; 3],
            filters,
            noise: LfsrNoise::new(),
            noise_filter: BiquadFilter::with_params(FilterType::Highpass, sample_rate, 2000.0, 0.707),
            noise_amp: 0.0,
            noise_coef: 1.0,
            elapsed: 0,
            length: 0,
            output: OutputStage::new(),
        }
    }
}

impl Voice for RimshotVoice {
    fn trigger(&mut self, velocity: f64) {
        let level = (velocity * self.level).clamp(0.0, 1.0);
        for i in 0..3 {
            self.phases[i] = 0.0;
            self.freqs[i] = RIM_FREQS[i] * 1.2;
            self.coefs[i] = ramp_coef(self.freqs[i], RIM_FREQS[i], 0.005, self.sample_rate);
            self.amps[i] = RIM_GAINS[i] * level * 0.7;
            self.amp_coefs[i] = decay_coef(RIM_DECAYS[i], self.sample_rate);
            self.filters[i].reset();
        }
        self.noise.reset(super::noise::DEFAULT_SEED);
        self.noise_filter.reset();
        self.noise_amp = if self.tone > 0.0 { self.tone * 0.3 * level * 0.7 } else { 0.0 };
        self.noise_coef = decay_coef(0.008, self.sample_rate);
        self.elapsed = 0;
        self.length = (0.08 * self.sample_rate) as usize;
    }

    fn process_sample(&mut self) -> f64 {
        if self.elapsed >= self.length {
            return 0.0;
        }
        self.elapsed += 1;

        let mut sum = 0.0;
        for i in 0..3 {
            let osc = (2.0 * std::f64::consts::PI * self.phases[i]).sin();
            sum += self.filters[i].process(osc) * self.amps[i];
            self.phases[i] += self.freqs[i] / self.sample_rate;
            if self.phases[i] >= 1.0 {
                self.phases[i] -= 1.0;
            }
            if self.freqs[i] > RIM_FREQS[i] {
                self.freqs[i] = (self.freqs[i] * self.coefs[i]).max(RIM_FREQS[i]);
            }
            self.amps[i] *= self.amp_coefs[i];
        }

        let tick = self.noise_filter.process(self.noise.next()) * self.noise_amp;
        self.noise_amp *= self.noise_coef;

        (sum + tick) * self.output.gain()
    }

    fn set_parameter(&mut self, id: &str, value: f64) -> Result<(), EngineError> {
        let v = clamp_parameter(&RIMSHOT_PARAMS, "rimshot", id, value)?;
        match id {
            "level" => self.level = v,
            "tone" => self.tone = v,
            _ => unreachable!(),
        }
        Ok(())
    }

    fn parameter_descriptors(&self) -> &'static [ParameterDescriptor] {
        &RIMSHOT_PARAMS
    }

    fn output(&self) -> &OutputStage {
        &self.output
    }

    fn output_mut(&mut self) -> &mut OutputStage {
        &mut self.output
    }

    fn reset(&mut self) {
        self.elapsed = 0;
        self.length = 0;
        self.amps = [0.0; 3];
        self.noise_amp = 0.0;
        for f in &mut self.filters {
            f.reset();
        }
        self.noise_filter.reset();
    }

    fn is_active(&self) -> bool {
        self.elapsed < self.length
    }
}

// ── Toms ────────────────────────────────────────────────────

/// Tom shell size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TomRange {
    Low,
    Mid,
    High,
}

impl TomRange {
    fn base_frequency(self) -> f64 {
        match self {
            TomRange::Low => 100.0,
            TomRange::Mid => 150.0,
            TomRange::High => 200.0,
        }
    }
}

static TOM_PARAMS: [ParameterDescriptor; 3] = [
    ParameterDescriptor::new("tune", "Tune", -120.0, 120.0, 0.0),
    ParameterDescriptor::new("decay", "Decay", 0.1, 2.0, 0.5),
    ParameterDescriptor::new("level", "Level", 0.0, 1.0, 1.0),
];

const TOM_RATIOS: [f64; 3] = [1.0, 1.5, 2.77];
const TOM_GAINS: [f64; 3] = [1.0, 0.5, 0.25];

/// Three inharmonic partials with a fast pitch drop through a tanh shaper,
/// plus a click partial at 4x the fundamental.
pub struct TomVoice {
    sample_rate: f64,
    range: TomRange,
    tune: f64,
    decay: f64,
    level: f64,

    phases: [f64; 3],
    freqs: [f64; 3],
    targets: [f64; 3],
    coefs: [f64; 3],
    amps: [f64; 3],
    amp_coefs: [f64; 3],

    click_phase: f64,
    click_freq: f64,
    click_amp: f64,
    click_coef: f64,

    elapsed: usize,
    length: usize,
    output: OutputStage,
}

impl TomVoice {
    pub fn new(sample_rate: f64, range: TomRange) -> Self {
        TomVoice {
            sample_rate,
            range,
            tune: 0.0,
            decay: 0.5,
            level: 1.0,
            phases: [0.0; 3],
            freqs: [0.0; 3],
            targets: [0.0; 3],
            coefs: [1.0; 3],
            amps: [0.0; 3],
            amp_coefs: [1.0; 3],
            click_phase: 0.0,
            click_freq: 0.0,
            click_amp: 0.0,
            click_coef: 1.0,
            elapsed: 0,
            length: 0,
            output: OutputStage::new(),
        }
    }
}

impl Voice for TomVoice {
    fn trigger(&mut self, velocity: f64) {
        let level = (velocity * self.level).clamp(0.0, 1.0) * 0.7;
        let base = self.range.base_frequency() * cents_ratio(self.tune);
        for i in 0..3 {
            self.targets[i] = base * TOM_RATIOS[i];
            self.freqs[i] = self.targets[i] * 1.6;
            self.coefs[i] = ramp_coef(self.freqs[i], self.targets[i], 0.05, self.sample_rate);
            self.phases[i] = 0.0;
            self.amps[i] = TOM_GAINS[i] * level;
            let decay_time = (self.decay * (1.0 - i as f64 * 0.15)).max(0.05);
            self.amp_coefs[i] = decay_coef(decay_time, self.sample_rate);
        }
        self.click_phase = 0.0;
        self.click_freq = base * 4.0;
        self.click_amp = 0.15 * level;
        self.click_coef = decay_coef(0.01, self.sample_rate);
        self.elapsed = 0;
        self.length = ((self.decay + 0.2) * self.sample_rate) as usize;
    }

    fn process_sample(&mut self) -> f64 {
        if self.elapsed >= self.length {
            return 0.0;
        }
        self.elapsed += 1;

        let mut sum = 0.0;
        for i in 0..3 {
            let osc = (2.0 * std::f64::consts::PI * self.phases[i]).sin();
            sum += (osc * 1.5).tanh() * self.amps[i];
            self.phases[i] += self.freqs[i] / self.sample_rate;
            if self.phases[i] >= 1.0 {
                self.phases[i] -= 1.0;
            }
            if self.freqs[i] > self.targets[i] {
                self.freqs[i] = (self.freqs[i] * self.coefs[i]).max(self.targets[i]);
            }
            self.amps[i] *= self.amp_coefs[i];
        }

        let click = (2.0 * std::f64::consts::PI * self.click_phase).sin() * self.click_amp;
        self.click_phase += self.click_freq / self.sample_rate;
        if self.click_phase >= 1.0 {
            self.click_phase -= 1.0;
        }
        self.click_amp *= self.click_coef;

        (sum + click) * self.output.gain()
    }

    fn set_parameter(&mut self, id: &str, value: f64) -> Result<(), EngineError> {
        let v = clamp_parameter(&TOM_PARAMS, "tom", id, value)?;
        match id {
            "tune" => self.tune = v,
            "decay" => self.decay = v,
            "level" => self.level = v,
            _ => unreachable!(),
        }
        Ok(())
    }

    fn parameter_descriptors(&self) -> &'static [ParameterDescriptor] {
        &TOM_PARAMS
    }

    fn output(&self) -> &OutputStage {
        &self.output
    }

    fn output_mut(&mut self) -> &mut OutputStage {
        &mut self.output
    }

    fn reset(&mut self) {
        self.elapsed = 0;
        self.length = 0;
        self.amps = [0.0; 3];
        self.click_amp = 0.0;
    }

    fn is_active(&self) -> bool {
        self.elapsed < self.length
    }
}

// ── Hats & cymbals (sample-backed) ──────────────────────────

/// Which library sample and fallback character a metal voice uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetalKind {
    ClosedHat,
    OpenHat,
    Crash,
    Ride,
}

impl MetalKind {
    pub fn sample_id(self) -> &'static str {
        match self {
            MetalKind::ClosedHat => "closed-hat",
            MetalKind::OpenHat => "open-hat",
            MetalKind::Crash => "crash",
            MetalKind::Ride => "ride",
        }
    }

    fn default_decay(self) -> f64 {
        match self {
            MetalKind::ClosedHat => 0.08,
            MetalKind::OpenHat => 0.4,
            MetalKind::Crash => 1.2,
            MetalKind::Ride => 2.0,
        }
    }

    fn partials(self) -> &'static [f64] {
        match self {
            // Inharmonic stacks measured off the metal sound generators
            MetalKind::ClosedHat | MetalKind::OpenHat => {
                &[205.3, 304.4, 369.6, 522.7, 800.0, 1204.4]
            }
            MetalKind::Crash => &[245.0, 367.5, 489.0, 612.5, 857.5, 1225.0],
            MetalKind::Ride => &[180.0, 270.0, 360.0, 480.0, 720.0, 1080.0],
        }
    }

    fn bandpass_frequency(self, tone: f64) -> f64 {
        match self {
            MetalKind::ClosedHat | MetalKind::OpenHat => 8000.0 + tone * 4000.0,
            MetalKind::Crash => 6000.0 + tone * 4000.0,
            MetalKind::Ride => 4000.0 + tone * 4000.0,
        }
    }

    fn highpass_frequency(self) -> f64 {
        match self {
            MetalKind::ClosedHat => 7000.0,
            MetalKind::OpenHat => 5000.0,
            MetalKind::Crash => 3000.0,
            MetalKind::Ride => 2000.0,
        }
    }
}

static METAL_PARAMS: [ParameterDescriptor; 4] = [
    ParameterDescriptor::new("tune", "Tune", -12.0, 12.0, 0.0),
    ParameterDescriptor::new("decay", "Decay", 0.02, 4.0, 0.4),
    ParameterDescriptor::new("tone", "Tone", 0.0, 1.0, 0.5),
    ParameterDescriptor::new("level", "Level", 0.0, 1.0, 1.0),
];

/// Hat/cymbal voice: plays its library sample when one is registered,
/// otherwise synthesizes a square-partial stack with filtered noise.
pub struct MetalVoice {
    sample_rate: f64,
    kind: MetalKind,
    tune: f64,
    decay: f64,
    tone: f64,
    level: f64,

    // Sample playback state
    buffer: Option<Arc<Vec<f64>>>,
    position: f64,
    playback_rate: f64,
    playing: bool,
    gain: f64,

    // Synthesis fallback state
    synth_active: bool,
    phases: [f64; 6],
    partial_amps: [f64; 6],
    partial_coefs: [f64; 6],
    noise: LfsrNoise,
    noise_amp: f64,
    noise_coef: f64,
    bandpass: BiquadFilter,
    highpass: BiquadFilter,
    synth_elapsed: usize,
    synth_length: usize,

    choke_gain: f64,
    choke_coef: f64,
    output: OutputStage,
}

impl MetalVoice {
    pub fn new(sample_rate: f64, kind: MetalKind) -> Self {
        MetalVoice {
            sample_rate,
            kind,
            tune: 0.0,
            decay: kind.default_decay(),
            tone: 0.5,
            level: 1.0,
            buffer: None,
            position: 0.0,
            playback_rate: 1.0,
            playing: false,
            gain: 0.0,
            synth_active: false,
            phases: [0.0; 6],
            partial_amps: [0.0; 6],
            partial_coefs: [1.0; 6],
            noise: LfsrNoise::new(),
            noise_amp: 0.0,
            noise_coef: 1.0,
            synth_elapsed: 0,
            synth_length: 0,
            bandpass: BiquadFilter::with_params(
                FilterType::Bandpass,
                sample_rate,
                kind.bandpass_frequency(0.5),
                1.5,
            ),
            highpass: BiquadFilter::with_params(
                FilterType::Highpass,
                sample_rate,
                kind.highpass_frequency(),
                0.707,
            ),
            choke_gain: 1.0,
            choke_coef: 1.0,
            output: OutputStage::new(),
        }
    }

    pub fn kind(&self) -> MetalKind {
        self.kind
    }

    fn trigger_synthesis(&mut self, level: f64) {
        let tune_ratio = semitone_ratio(self.tune);
        for (i, freq) in self.kind.partials().iter().enumerate() {
            self.phases[i] = (freq * tune_ratio / self.sample_rate).fract();
            self.partial_amps[i] = 0.15 * level * 0.5;
            let partial_decay = (self.decay * (1.0 - i as f64 * 0.05)).max(0.02);
            self.partial_coefs[i] = decay_coef(partial_decay, self.sample_rate);
        }
        self.noise.reset(super::noise::DEFAULT_SEED);
        self.noise_amp = 0.3 * level * 0.5;
        self.noise_coef = decay_coef((self.decay * 0.5).max(0.01), self.sample_rate);
        self.bandpass.set_frequency(self.kind.bandpass_frequency(self.tone));
        self.bandpass.reset();
        self.highpass.reset();
        self.synth_elapsed = 0;
        self.synth_length = ((self.decay + 0.1) * self.sample_rate) as usize;
        self.synth_active = true;
    }

    fn synth_sample(&mut self) -> f64 {
        if self.synth_elapsed >= self.synth_length {
            self.synth_active = false;
            return 0.0;
        }
        self.synth_elapsed += 1;

        let tune_ratio = semitone_ratio(self.tune);
        let mut metal = 0.0;
        for (i, freq) in self.kind.partials().iter().enumerate() {
            // Square partials, the cheap way
            let square = if self.phases[i] < 0.5 { 1.0 } else { -1.0 };
            metal += square * self.partial_amps[i];
            self.phases[i] += freq * tune_ratio / self.sample_rate;
            if self.phases[i] >= 1.0 {
                self.phases[i] -= 1.0;
            }
            self.partial_amps[i] *= self.partial_coefs[i];
        }

        let hiss = self.noise.next() * self.noise_amp;
        self.noise_amp *= self.noise_coef;

        self.highpass.process(self.bandpass.process(metal + hiss))
    }
}

impl Voice for MetalVoice {
    fn trigger(&mut self, velocity: f64) {
        let level = (velocity * self.level).clamp(0.0, 1.0);
        self.choke_gain = 1.0;
        self.choke_coef = 1.0;
        if self.buffer.is_some() {
            self.position = 0.0;
            self.playback_rate = semitone_ratio(self.tune);
            self.gain = level;
            self.playing = true;
            self.synth_active = false;
        } else {
            self.playing = false;
            self.trigger_synthesis(level);
        }
    }

    fn process_sample(&mut self) -> f64 {
        let raw = if self.playing {
            let (sample, ended) = match &self.buffer {
                Some(buffer) => {
                    let idx = self.position as usize;
                    if idx + 1 < buffer.len() {
                        let frac = self.position - idx as f64;
                        (buffer[idx] * (1.0 - frac) + buffer[idx + 1] * frac, false)
                    } else if idx < buffer.len() {
                        (buffer[idx], false)
                    } else {
                        (0.0, true)
                    }
                }
                None => (0.0, true),
            };
            if ended {
                self.playing = false;
            }
            self.position += self.playback_rate;
            sample * self.gain
        } else if self.synth_active {
            self.synth_sample()
        } else {
            return 0.0;
        };

        self.choke_gain *= self.choke_coef;
        if self.choke_gain < 1e-3 {
            self.playing = false;
            self.synth_active = false;
        }
        raw * self.choke_gain * self.output.gain()
    }

    fn set_parameter(&mut self, id: &str, value: f64) -> Result<(), EngineError> {
        let v = clamp_parameter(&METAL_PARAMS, self.kind.sample_id(), id, value)?;
        match id {
            "tune" => self.tune = v,
            "decay" => self.decay = v,
            "tone" => self.tone = v,
            "level" => self.level = v,
            _ => unreachable!(),
        }
        Ok(())
    }

    fn parameter_descriptors(&self) -> &'static [ParameterDescriptor] {
        &METAL_PARAMS
    }

    fn output(&self) -> &OutputStage {
        &self.output
    }

    fn output_mut(&mut self) -> &mut OutputStage {
        &mut self.output
    }

    fn prepare(&mut self, context: &RenderContext, library: &mut SampleLibrary) {
        self.buffer = library.get_buffer(context, self.kind.sample_id());
    }

    fn reset(&mut self) {
        self.playing = false;
        self.synth_active = false;
        self.position = 0.0;
        self.choke_gain = 1.0;
        self.choke_coef = 1.0;
        self.bandpass.reset();
        self.highpass.reset();
    }

    fn is_active(&self) -> bool {
        self.playing || self.synth_active
    }

    /// 20 ms fade, matching the hardware's hat-choke behavior.
    fn choke(&mut self) {
        if self.playing || self.synth_active {
            self.choke_coef = decay_coef(0.02, self.sample_rate);
        }
    }
}
