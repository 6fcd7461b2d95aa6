//! Ladder filter — the resonant lowpass behind the acid bass voice.
//!
//! Three cascaded one-pole lowpass stages (~6 dB/octave each, ~18 dB/octave
//! total), each detuned by a small fixed percentage to model component
//! mismatch in the analog ladder. A feedback path taps the clipped output,
//! scales it by a resonance-derived gain, and subtracts it from the input;
//! the tanh bound on the output keeps self-oscillation from growing without
//! limit.

/// Fixed per-stage cutoff detune factors (component mismatch).
const STAGE_DETUNE: [f64; 3] = [1.02, 1.0, 0.98];

/// Peak feedback gain at full resonance. Calibrated, not derived: high
/// enough that the loop self-oscillates near full resonance across the
/// musical cutoff range, low enough to stay resonant-but-stable below it.
const FEEDBACK_SCALE: f64 = 16.0;

/// Exponent shaping the resonance control curve. Keeps the lower half of the
/// knob in the "squelchy but pitched" zone and reserves the top for scream.
const FEEDBACK_CURVE: f64 = 1.8;

#[derive(Debug, Clone)]
pub struct LadderFilter {
    sample_rate: f64,
    cutoff: f64,
    resonance: f64,

    // Exponential cutoff ramp (click-free sweeps)
    ramp_target: f64,
    ramp_ratio: f64,
    ramp_remaining: usize,

    // Per-stage smoothing coefficients, recomputed when the cutoff moves
    stage_coef: [f64; 3],
    coef_dirty: bool,

    stages: [f64; 3],
    last_output: f64,
}

impl LadderFilter {
    pub fn new(sample_rate: f64) -> Self {
        let mut f = LadderFilter {
            sample_rate,
            cutoff: 1000.0,
            resonance: 0.0,
            ramp_target: 1000.0,
            ramp_ratio: 1.0,
            ramp_remaining: 0,
            stage_coef: [0.0; 3],
            coef_dirty: true,
            stages: [0.0; 3],
            last_output: 0.0,
        };
        f.update_coefficients();
        f
    }

    /// Set the cutoff immediately, cancelling any ramp in progress.
    pub fn set_frequency(&mut self, hz: f64) {
        self.cutoff = hz.clamp(20.0, self.sample_rate * 0.45);
        self.ramp_target = self.cutoff;
        self.ramp_remaining = 0;
        self.coef_dirty = true;
    }

    /// Glide the cutoff exponentially to `hz` over `seconds`.
    pub fn ramp_frequency(&mut self, hz: f64, seconds: f64) {
        let target = hz.clamp(20.0, self.sample_rate * 0.45);
        let samples = (seconds * self.sample_rate) as usize;
        if samples == 0 || (target - self.cutoff).abs() < f64::EPSILON {
            self.set_frequency(target);
            return;
        }
        self.ramp_target = target;
        self.ramp_ratio = (target / self.cutoff).powf(1.0 / samples as f64);
        self.ramp_remaining = samples;
    }

    /// Resonance in [0, 1]; out-of-range values clamp.
    pub fn set_resonance(&mut self, amount: f64) {
        self.resonance = amount.clamp(0.0, 1.0);
    }

    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }

    /// The resonance-derived gain on the feedback path. Monotonic in
    /// resonance; exposed so calibration is testable.
    pub fn feedback_gain(&self) -> f64 {
        self.resonance.powf(FEEDBACK_CURVE) * FEEDBACK_SCALE
    }

    /// Output compensation, reduced as resonance rises so the resonant peak
    /// does not jump out against the unresonant signal.
    fn output_gain(&self) -> f64 {
        1.0 / (1.0 + 0.6 * self.resonance)
    }

    fn update_coefficients(&mut self) {
        for (i, detune) in STAGE_DETUNE.iter().enumerate() {
            let fc = (self.cutoff * detune).min(self.sample_rate * 0.45);
            self.stage_coef[i] = 1.0 - (-2.0 * std::f64::consts::PI * fc / self.sample_rate).exp();
        }
        self.coef_dirty = false;
    }

    #[inline]
    fn advance_ramp(&mut self) {
        if self.ramp_remaining > 0 {
            self.cutoff *= self.ramp_ratio;
            self.ramp_remaining -= 1;
            if self.ramp_remaining == 0 {
                self.cutoff = self.ramp_target;
            }
            self.coef_dirty = true;
        }
    }

    /// Process one sample through the ladder.
    #[inline]
    pub fn process_sample(&mut self, input: f64) -> f64 {
        self.advance_ramp();
        if self.coef_dirty {
            self.update_coefficients();
        }

        let mut signal = input - self.feedback_gain() * self.last_output;
        for i in 0..3 {
            self.stages[i] += self.stage_coef[i] * (signal - self.stages[i]);
            signal = self.stages[i];
        }

        // The feedback tap sees the clipped output, pre-compensation.
        self.last_output = signal.tanh();
        self.last_output * self.output_gain()
    }

    /// Clear all filter state.
    pub fn reset(&mut self) {
        self.stages = [0.0; 3];
        self.last_output = 0.0;
        self.ramp_remaining = 0;
        self.ramp_target = self.cutoff;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn feedback_gain_monotonic_in_resonance() {
        let mut f = LadderFilter::new(44100.0);
        let mut prev = -1.0;
        for i in 0..=100 {
            f.set_resonance(i as f64 / 100.0);
            let k = f.feedback_gain();
            assert!(k >= prev, "feedback gain decreased at resonance {i}%");
            assert!(k.is_finite() && k <= FEEDBACK_SCALE + 1e-9);
            prev = k;
        }
    }

    #[test]
    fn resonance_clamps_out_of_range() {
        let mut f = LadderFilter::new(44100.0);
        f.set_resonance(7.5);
        assert!((f.feedback_gain() - FEEDBACK_SCALE).abs() < 1e-9);
        f.set_resonance(-2.0);
        assert_eq!(f.feedback_gain(), 0.0);
    }

    #[test]
    fn passes_dc_without_resonance() {
        let mut f = LadderFilter::new(44100.0);
        f.set_frequency(1000.0);
        f.set_resonance(0.0);
        let mut out = 0.0;
        for _ in 0..10_000 {
            out = f.process_sample(1.0);
        }
        // tanh(1.0) is the ceiling of the bounded output stage
        assert!(out > 0.7, "DC should pass a resonance-free ladder, got {out}");
    }

    #[test]
    fn attenuates_above_cutoff() {
        let mut f = LadderFilter::new(44100.0);
        f.set_frequency(300.0);
        f.set_resonance(0.0);
        let mut max_out = 0.0_f64;
        for i in 0..44100 {
            let t = i as f64 / 44100.0;
            let out = f.process_sample(0.5 * (2.0 * PI * 8000.0 * t).sin());
            if i > 4410 {
                max_out = max_out.max(out.abs());
            }
        }
        assert!(max_out < 0.02, "8kHz should be ~18dB/oct down from 300Hz, got {max_out}");
    }

    #[test]
    fn stable_over_ten_second_tone_at_every_resonance() {
        for res in [0.0, 0.25, 0.5, 0.75, 1.0] {
            let mut f = LadderFilter::new(44100.0);
            f.set_frequency(800.0);
            f.set_resonance(res);
            for i in 0..441_000 {
                let t = i as f64 / 44100.0;
                let out = f.process_sample((2.0 * PI * 110.0 * t).sin());
                assert!(out.is_finite(), "blew up at res {res}, sample {i}");
                assert!(out.abs() <= 1.0 + 1e-9, "unbounded at res {res}: {out}");
            }
        }
    }

    #[test]
    fn self_oscillates_at_full_resonance() {
        let mut f = LadderFilter::new(44100.0);
        f.set_frequency(2000.0);
        f.set_resonance(1.0);
        // Kick the loop with an impulse, then let it ring on silence.
        f.process_sample(1.0);
        let mut tail = Vec::new();
        for i in 0..88_200 {
            let out = f.process_sample(0.0);
            if i >= 83_790 {
                tail.push(out);
            }
        }
        let rms = (tail.iter().map(|v| v * v).sum::<f64>() / tail.len() as f64).sqrt();
        assert!(rms > 0.005, "expected sustained self-oscillation, rms={rms}");
    }

    #[test]
    fn ramp_reaches_target_without_jumps() {
        let mut f = LadderFilter::new(44100.0);
        f.set_frequency(200.0);
        f.ramp_frequency(4000.0, 0.05);
        let mut prev = f.cutoff();
        for _ in 0..(44100 / 10) {
            f.process_sample(0.0);
            let c = f.cutoff();
            // Exponential ramp: strictly rising, small relative increments
            assert!(c >= prev - 1e-9);
            assert!(c / prev < 1.01, "ramp stepped too far in one sample");
            prev = c;
        }
        assert!((f.cutoff() - 4000.0).abs() < 1.0);
    }

    #[test]
    fn set_frequency_cancels_ramp() {
        let mut f = LadderFilter::new(44100.0);
        f.ramp_frequency(8000.0, 1.0);
        f.set_frequency(500.0);
        for _ in 0..100 {
            f.process_sample(0.0);
        }
        assert!((f.cutoff() - 500.0).abs() < 1e-9);
    }

    #[test]
    fn reset_clears_ring_state() {
        let mut f = LadderFilter::new(44100.0);
        f.set_resonance(0.9);
        for _ in 0..1000 {
            f.process_sample(1.0);
        }
        f.reset();
        let out = f.process_sample(0.0);
        assert_eq!(out, 0.0);
    }
}
