//! ADSR envelope generator.
//!
//! Parameters are set on a 0–100 knob scale. The knob-to-time mapping is
//! quadratic — `time = 0.002 + (knob/100)² · 1.998` seconds — giving fine
//! control over short times and coarse control over long ones, which is how
//! envelope knobs are perceived. Attack ramps linearly toward the trigger
//! velocity; decay and release approach their targets exponentially with a
//! rate derived from a −60 dB time constant, snapping once within epsilon so
//! the envelope always terminates.

/// Envelope stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// Value gap under which an exponential segment snaps to its target. Sized
/// so a full-scale release settles inside 1.5x the release time.
const EPSILON: f64 = 1.5e-3;

#[derive(Debug, Clone)]
pub struct AdsrEnvelope {
    sample_rate: f64,

    // Knob values, 0–100
    attack_knob: f64,
    decay_knob: f64,
    sustain_knob: f64,
    release_knob: f64,

    stage: Stage,
    value: f64,
    velocity: f64,
    /// Per-sample increment during the linear attack.
    attack_step: f64,
    /// Per-sample approach rate for the exponential decay/release.
    decay_rate: f64,
    release_rate: f64,
}

/// Map a 0–100 knob value to seconds.
pub fn knob_to_time(knob: f64) -> f64 {
    let normalized = (knob / 100.0).clamp(0.0, 1.0);
    0.002 + normalized * normalized * 1.998
}

/// Per-sample rate reaching −60 dB of the remaining distance in `seconds`.
fn time_to_rate(seconds: f64, sample_rate: f64) -> f64 {
    let samples = (seconds * sample_rate).max(1.0);
    1.0 - (-4.6 / samples).exp()
}

impl AdsrEnvelope {
    pub fn new(sample_rate: f64) -> Self {
        let mut env = AdsrEnvelope {
            sample_rate,
            attack_knob: 0.0,
            decay_knob: 30.0,
            sustain_knob: 70.0,
            release_knob: 20.0,
            stage: Stage::Idle,
            value: 0.0,
            velocity: 1.0,
            attack_step: 0.0,
            decay_rate: 0.0,
            release_rate: 0.0,
        };
        env.recompute_rates();
        env
    }

    /// Set attack/decay/sustain/release on the 0–100 knob scale.
    /// Out-of-range values clamp.
    pub fn set_parameters(&mut self, attack: f64, decay: f64, sustain: f64, release: f64) {
        self.attack_knob = attack.clamp(0.0, 100.0);
        self.decay_knob = decay.clamp(0.0, 100.0);
        self.sustain_knob = sustain.clamp(0.0, 100.0);
        self.release_knob = release.clamp(0.0, 100.0);
        self.recompute_rates();
    }

    fn recompute_rates(&mut self) {
        let attack_samples = (knob_to_time(self.attack_knob) * self.sample_rate).max(1.0);
        self.attack_step = 1.0 / attack_samples;
        self.decay_rate = time_to_rate(knob_to_time(self.decay_knob), self.sample_rate);
        self.release_rate = time_to_rate(knob_to_time(self.release_knob), self.sample_rate);
    }

    /// Attack time in seconds (for schedulers sizing render tails).
    pub fn release_time(&self) -> f64 {
        knob_to_time(self.release_knob)
    }

    fn sustain_level(&self) -> f64 {
        (self.sustain_knob / 100.0) * self.velocity
    }

    /// Open the gate. The envelope continues from its current value, so a
    /// retrigger mid-release is click-free.
    pub fn trigger(&mut self, velocity: f64) {
        self.velocity = velocity.max(0.0);
        self.stage = Stage::Attack;
    }

    /// Close the gate. Valid from any non-idle stage.
    pub fn gate_off(&mut self) {
        if self.stage != Stage::Idle {
            self.stage = Stage::Release;
        }
    }

    /// Advance one sample and return the envelope value.
    #[inline]
    pub fn process_sample(&mut self) -> f64 {
        match self.stage {
            Stage::Idle => {
                self.value = 0.0;
            }
            Stage::Attack => {
                if self.value < self.velocity {
                    self.value = (self.value + self.attack_step * self.velocity).min(self.velocity);
                }
                // A retrigger above the target velocity skips straight to
                // decay, which eases the value down without a jump.
                if self.value >= self.velocity {
                    self.stage = Stage::Decay;
                }
            }
            Stage::Decay => {
                let target = self.sustain_level();
                self.value += (target - self.value) * self.decay_rate;
                if (self.value - target).abs() < EPSILON {
                    self.value = target;
                    self.stage = Stage::Sustain;
                }
            }
            Stage::Sustain => {
                self.value = self.sustain_level();
            }
            Stage::Release => {
                self.value -= self.value * self.release_rate;
                if self.value < EPSILON {
                    self.value = 0.0;
                    self.stage = Stage::Idle;
                }
            }
        }
        self.value
    }

    /// Render the envelope as a buffer: gate held for `duration` seconds,
    /// then released and run to idle (bounded by `release_duration` when
    /// given, or until the release finishes).
    pub fn generate(&mut self, duration: f64, release_duration: Option<f64>) -> Vec<f64> {
        let gate_samples = (duration * self.sample_rate) as usize;
        let mut out = Vec::with_capacity(gate_samples);
        self.reset();
        self.trigger(1.0);
        for _ in 0..gate_samples {
            out.push(self.process_sample());
        }
        self.gate_off();
        let max_tail = match release_duration {
            Some(secs) => (secs * self.sample_rate) as usize,
            None => (self.release_time() * 1.5 * self.sample_rate) as usize + 1,
        };
        for _ in 0..max_tail {
            out.push(self.process_sample());
            if self.stage == Stage::Idle {
                break;
            }
        }
        out
    }

    pub fn reset(&mut self) {
        self.stage = Stage::Idle;
        self.value = 0.0;
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn is_active(&self) -> bool {
        self.stage != Stage::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn knob_mapping_is_quadratic() {
        assert!((knob_to_time(0.0) - 0.002).abs() < 1e-12);
        assert!((knob_to_time(100.0) - 2.0).abs() < 1e-12);
        // Half knob is a quarter of the span, not half
        assert!((knob_to_time(50.0) - (0.002 + 0.25 * 1.998)).abs() < 1e-12);
        // Clamped outside the knob range
        assert_eq!(knob_to_time(250.0), knob_to_time(100.0));
    }

    #[test]
    fn starts_idle() {
        let env = AdsrEnvelope::new(44100.0);
        assert_eq!(env.stage(), Stage::Idle);
        assert!(!env.is_active());
    }

    #[test]
    fn attack_reaches_velocity() {
        let mut env = AdsrEnvelope::new(44100.0);
        env.set_parameters(10.0, 50.0, 100.0, 20.0);
        env.trigger(0.8);
        let mut max_value: f64 = 0.0;
        for _ in 0..44100 {
            max_value = max_value.max(env.process_sample());
        }
        assert!(
            (max_value - 0.8).abs() < 0.01,
            "attack should peak at trigger velocity, got {max_value}"
        );
    }

    #[test]
    fn sustain_holds_scaled_level() {
        let mut env = AdsrEnvelope::new(44100.0);
        env.set_parameters(0.0, 5.0, 60.0, 20.0);
        env.trigger(0.5);
        for _ in 0..44100 {
            env.process_sample();
        }
        assert_eq!(env.stage(), Stage::Sustain);
        let v = env.process_sample();
        assert!(
            (v - 0.6 * 0.5).abs() < 0.01,
            "sustain should hold sustain_level * velocity, got {v}"
        );
    }

    #[test]
    fn generate_always_terminates_idle() {
        let combos = [
            (0.0, 0.0, 0.0, 0.0),
            (0.0, 40.0, 0.0, 10.0),
            (25.0, 50.0, 75.0, 50.0),
            (100.0, 100.0, 100.0, 100.0),
            (5.0, 0.0, 100.0, 80.0),
        ];
        for (a, d, s, r) in combos {
            let mut env = AdsrEnvelope::new(44100.0);
            env.set_parameters(a, d, s, r);
            let buf = env.generate(0.25, None);
            assert_eq!(
                env.stage(),
                Stage::Idle,
                "A{a} D{d} S{s} R{r} did not reach idle"
            );
            let last = *buf.last().unwrap();
            assert!(last < 1e-4, "A{a} D{d} S{s} R{r} ended at {last}");
        }
    }

    #[test]
    fn release_settles_inside_one_and_a_half_release_times() {
        let mut env = AdsrEnvelope::new(44100.0);
        env.set_parameters(0.0, 10.0, 100.0, 60.0);
        env.trigger(1.0);
        for _ in 0..4410 {
            env.process_sample();
        }
        env.gate_off();
        let allowed = (env.release_time() * 1.5 * 44100.0) as usize;
        let mut landed = None;
        for i in 0..allowed {
            env.process_sample();
            if env.stage() == Stage::Idle {
                landed = Some(i);
                break;
            }
        }
        let landed = landed.expect("release should settle within 1.5x release time");
        assert!(env.value() < 1e-4, "value {} after {} samples", env.value(), landed);
    }

    #[test]
    fn release_reachable_from_attack() {
        let mut env = AdsrEnvelope::new(44100.0);
        env.set_parameters(80.0, 50.0, 100.0, 5.0);
        env.trigger(1.0);
        for _ in 0..100 {
            env.process_sample();
        }
        assert_eq!(env.stage(), Stage::Attack);
        env.gate_off();
        assert_eq!(env.stage(), Stage::Release);
    }

    #[test]
    fn gate_off_while_idle_stays_idle() {
        let mut env = AdsrEnvelope::new(44100.0);
        env.gate_off();
        assert_eq!(env.stage(), Stage::Idle);
    }

    #[test]
    fn retrigger_continues_from_current_value() {
        let mut env = AdsrEnvelope::new(44100.0);
        env.set_parameters(0.0, 20.0, 80.0, 50.0);
        env.trigger(1.0);
        for _ in 0..8820 {
            env.process_sample();
        }
        env.gate_off();
        for _ in 0..441 {
            env.process_sample();
        }
        let before = env.value();
        assert!(before > 0.1, "test needs a mid-release retrigger point");

        // Retrigger must not reset to zero; the largest step allowed is one
        // attack increment.
        env.trigger(1.0);
        let after = env.process_sample();
        assert!(
            (after - before).abs() < 0.05,
            "retrigger jumped from {before} to {after}"
        );
    }

    #[test]
    fn values_never_leave_unit_range() {
        let mut env = AdsrEnvelope::new(44100.0);
        env.set_parameters(15.0, 30.0, 45.0, 25.0);
        env.trigger(1.0);
        for _ in 0..20_000 {
            let v = env.process_sample();
            assert!((0.0..=1.0).contains(&v), "envelope out of range: {v}");
        }
        env.gate_off();
        for _ in 0..100_000 {
            let v = env.process_sample();
            assert!((0.0..=1.0).contains(&v), "envelope out of range after gate-off: {v}");
        }
        assert_eq!(env.stage(), Stage::Idle);
    }
}
