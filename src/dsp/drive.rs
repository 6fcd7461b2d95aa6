//! Drive — waveshaping saturation with four curve families.
//!
//! Saturation generates harmonics above Nyquist that fold back as aliasing,
//! so a 2x oversampled path is available: zero-stuff, lowpass, shape,
//! lowpass, decimate.

use super::filter::{BiquadFilter, FilterType};

/// Saturation curve family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveCurve {
    /// Arctan-like rounding, symmetric.
    Soft,
    /// Symmetric clip at an amount-derived threshold.
    Hard,
    /// Asymmetric tanh — the positive half saturates later, like a
    /// single-ended tube stage.
    Tube,
    /// Repeated reflection about the threshold; strong harmonic folding.
    Foldback,
}

#[derive(Debug, Clone)]
pub struct Drive {
    /// Drive amount, 0–100. Zero is an exact bypass.
    amount: f64,
    /// Wet/dry mix, 0–100.
    mix: f64,
    curve: DriveCurve,

    // Anti-imaging / anti-aliasing filters for the oversampled path
    up_filter: BiquadFilter,
    down_filter: BiquadFilter,
}

impl Drive {
    pub fn new(sample_rate: f64) -> Self {
        // Halfband-ish lowpass at the original Nyquist, run at 2x rate
        let up = BiquadFilter::with_params(FilterType::Lowpass, sample_rate * 2.0, sample_rate * 0.45, 0.707);
        let down = up.clone();
        Drive {
            amount: 0.0,
            mix: 100.0,
            curve: DriveCurve::Soft,
            up_filter: up,
            down_filter: down,
        }
    }

    pub fn set_amount(&mut self, amount: f64) {
        self.amount = amount.clamp(0.0, 100.0);
    }

    pub fn set_mix(&mut self, mix: f64) {
        self.mix = mix.clamp(0.0, 100.0);
    }

    pub fn set_curve(&mut self, curve: DriveCurve) {
        self.curve = curve;
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    /// Shape one sample.
    #[inline]
    pub fn process_sample(&mut self, input: f64) -> f64 {
        if self.amount <= 0.0 {
            return input;
        }
        let wet = self.shape(input);
        let mix = self.mix / 100.0;
        input * (1.0 - mix) + wet * mix
    }

    /// Shape one sample at 2x internal rate. The input is zero-stuffed, both
    /// half-rate samples are filtered and shaped, and the result is filtered
    /// again before decimating back down.
    #[inline]
    pub fn process_sample_oversampled(&mut self, input: f64) -> f64 {
        if self.amount <= 0.0 {
            return input;
        }
        // Zero-stuffing halves the passband energy; the 2x gain restores it.
        let a = self.up_filter.process(input * 2.0);
        let b = self.up_filter.process(0.0);

        let shaped_a = self.shape(a);
        let shaped_b = self.shape(b);

        let out = self.down_filter.process(shaped_a);
        self.down_filter.process(shaped_b);

        let mix = self.mix / 100.0;
        input * (1.0 - mix) + out * mix
    }

    #[inline]
    fn shape(&self, x: f64) -> f64 {
        let k = self.amount / 100.0;
        match self.curve {
            DriveCurve::Soft => {
                let drive = k * 20.0;
                ((std::f64::consts::PI + drive) * x)
                    / (std::f64::consts::PI + drive * x.abs())
            }
            DriveCurve::Hard => {
                let threshold = 1.0 - 0.8 * k;
                (x * (1.0 + 2.0 * k)).clamp(-threshold, threshold)
            }
            DriveCurve::Tube => {
                let pos_drive = 1.0 + 3.0 * k;
                let neg_drive = 1.0 + 6.0 * k;
                if x >= 0.0 {
                    (x * pos_drive).tanh() / pos_drive.tanh()
                } else {
                    (x * neg_drive).tanh() / neg_drive.tanh()
                }
            }
            DriveCurve::Foldback => {
                let threshold = 1.0 - 0.75 * k;
                let mut y = x * (1.0 + 2.0 * k);
                // Reflect until the sample is back inside the threshold
                while y.abs() > threshold {
                    y = if y > threshold {
                        2.0 * threshold - y
                    } else {
                        -2.0 * threshold - y
                    };
                }
                y
            }
        }
    }

    pub fn reset(&mut self) {
        self.up_filter.reset();
        self.down_filter.reset();
    }
}
