//! Output bus — the shared graph every voice mixes into.
//!
//! Compression, then peak metering, then master gain, then a tanh soft clip
//! so hot mixes saturate instead of wrapping.

use super::compressor::Compressor;

#[derive(Debug, Clone)]
pub struct OutputBus {
    pub master_gain: f64,
    compressor: Compressor,
    peak: f64,
    peak_decay: f64,
}

impl OutputBus {
    pub fn new(sample_rate: f64) -> Self {
        OutputBus {
            master_gain: 0.8,
            compressor: Compressor::new(sample_rate),
            peak: 0.0,
            // ~0.5s to fall 60 dB, a display-rate ballistic
            peak_decay: (-4.6 / (0.5 * sample_rate)).exp(),
        }
    }

    /// Run one mixed sample through the bus.
    #[inline]
    pub fn process(&mut self, mixed: f64) -> f64 {
        let compressed = self.compressor.process(mixed);

        let level = compressed.abs();
        self.peak = if level > self.peak {
            level
        } else {
            self.peak * self.peak_decay
        };

        soft_clip(compressed * self.master_gain)
    }

    /// Peak level after compression, before master gain.
    pub fn peak_level(&self) -> f64 {
        self.peak
    }

    /// Current compressor gain reduction in dB.
    pub fn gain_reduction(&self) -> f64 {
        self.compressor.gain_reduction()
    }

    pub fn reset(&mut self) {
        self.compressor.reset();
        self.peak = 0.0;
    }
}

/// Soft clipper using tanh to prevent harsh digital clipping.
fn soft_clip(x: f64) -> f64 {
    x.tanh()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_in_silence_out() {
        let mut bus = OutputBus::new(44100.0);
        for _ in 0..128 {
            assert_eq!(bus.process(0.0), 0.0);
        }
        assert_eq!(bus.peak_level(), 0.0);
    }

    #[test]
    fn output_never_exceeds_unity() {
        let mut bus = OutputBus::new(44100.0);
        bus.master_gain = 1.0;
        for i in 0..10_000 {
            let hot = (i % 7) as f64; // 0..6, well past full scale
            let out = bus.process(hot);
            assert!(out.abs() <= 1.0, "soft clip should bound output, got {out}");
        }
    }

    #[test]
    fn peak_meter_tracks_and_decays() {
        let mut bus = OutputBus::new(44100.0);
        bus.process(0.5);
        let held = bus.peak_level();
        assert!(held > 0.0);
        for _ in 0..44100 {
            bus.process(0.0);
        }
        assert!(bus.peak_level() < held * 0.01, "peak should decay on silence");
    }

    #[test]
    fn reset_clears_meter_and_compressor() {
        let mut bus = OutputBus::new(44100.0);
        for _ in 0..1000 {
            bus.process(0.9);
        }
        bus.reset();
        assert_eq!(bus.peak_level(), 0.0);
        assert_eq!(bus.gain_reduction(), -0.0);
    }
}
