//! Per-channel soft limiter: envelope follower with fast attack, slow
//! release, and a quadratic soft knee around the threshold.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LimiterParams {
    /// Level where limiting begins (linear, ~-6 dBFS at 0.5).
    pub threshold: f32,
    /// Width of the soft-knee region (linear).
    pub knee: f32,
    /// Compression ratio above the threshold.
    pub ratio: f32,
    /// Envelope smoothing when the signal rises. Tuned for 48 kHz.
    pub attack_coef: f32,
    /// Envelope smoothing when the signal falls. Tuned for 48 kHz.
    pub release_coef: f32,
}

impl Default for LimiterParams {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            knee: 0.2,
            ratio: 8.0,
            attack_coef: 0.01,
            release_coef: 0.0004,
        }
    }
}

/// Stateful per-sample limiter. One instance per channel; the envelope is
/// the only state, and `reset` zeroes it.
#[derive(Debug, Clone)]
pub struct SoftLimiter {
    params: LimiterParams,
    env: f32,
}

impl SoftLimiter {
    pub fn new(params: LimiterParams) -> Self {
        Self { params, env: 0.0 }
    }

    pub fn reset(&mut self) {
        self.env = 0.0;
    }

    pub fn envelope(&self) -> f32 {
        self.env
    }

    pub fn process(&mut self, samples: &mut [f32]) {
        for sample in samples {
            *sample = self.process_sample(*sample);
        }
    }

    #[inline]
    fn process_sample(&mut self, x: f32) -> f32 {
        let p = &self.params;
        let mag = x.abs();

        self.env = if mag > self.env {
            p.attack_coef * mag + (1.0 - p.attack_coef) * self.env
        } else {
            p.release_coef * mag + (1.0 - p.release_coef) * self.env
        };

        let knee_start = p.threshold - p.knee / 2.0;
        let knee_end = p.threshold + p.knee / 2.0;

        let gain = if self.env <= knee_start || self.env <= f32::EPSILON {
            1.0
        } else if self.env < knee_end {
            let progress = (self.env - knee_start) / p.knee;
            let compression = progress * progress / 2.0;
            let overshoot = self.env - p.threshold;
            let reduction = overshoot * (1.0 - 1.0 / p.ratio) * compression;
            (self.env - reduction) / self.env
        } else {
            let compressed = p.threshold + (self.env - p.threshold) / p.ratio;
            compressed / self.env
        };

        // The lower knee half computes a negative reduction; a limiter only
        // ever attenuates.
        x * gain.min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_signal_passes_unchanged() {
        let mut limiter = SoftLimiter::new(LimiterParams::default());
        let mut samples = vec![0.1f32; 4800];
        let original = samples.clone();
        limiter.process(&mut samples);
        assert_eq!(samples, original);
    }

    #[test]
    fn test_sustained_loud_signal_is_compressed() {
        let mut limiter = SoftLimiter::new(LimiterParams::default());
        let mut samples = vec![1.0f32; 48_000];
        limiter.process(&mut samples);
        // Once the envelope settles, gain approaches
        // (threshold + (1 - threshold) / ratio) / 1 = 0.5625.
        let tail = &samples[40_000..];
        assert!(tail.iter().all(|&s| s < 0.6), "tail not compressed");
        assert!(tail.iter().all(|&s| s > 0.5), "over-compressed");
    }

    #[test]
    fn test_output_is_bounded_for_full_scale_input() {
        let mut limiter = SoftLimiter::new(LimiterParams::default());
        let mut samples: Vec<f32> = (0..48_000)
            .map(|i| (i as f32 * 440.0 * std::f32::consts::TAU / 48_000.0).sin())
            .collect();
        limiter.process(&mut samples);
        assert!(samples.iter().all(|&s| s.abs() <= 1.0 + 1e-6));
    }

    #[test]
    fn test_attack_is_faster_than_release() {
        let mut limiter = SoftLimiter::new(LimiterParams::default());
        let mut loud = vec![1.0f32; 1000];
        limiter.process(&mut loud);
        let peak_env = limiter.envelope();

        let mut silence = vec![0.0f32; 1000];
        limiter.process(&mut silence);
        // Release is far slower; after the same sample count most of the
        // envelope remains.
        assert!(limiter.envelope() > peak_env * 0.5);
    }

    #[test]
    fn test_reset_clears_envelope() {
        let mut limiter = SoftLimiter::new(LimiterParams::default());
        let mut samples = vec![1.0f32; 1000];
        limiter.process(&mut samples);
        assert!(limiter.envelope() > 0.0);
        limiter.reset();
        assert_eq!(limiter.envelope(), 0.0);
    }

    #[test]
    fn test_limiter_never_amplifies() {
        // Walk the envelope through the whole knee region; output magnitude
        // must never exceed input magnitude.
        let mut limiter = SoftLimiter::new(LimiterParams::default());
        for i in 0..20_000 {
            let x = 0.3 + 0.4 * (i as f32 / 20_000.0);
            let mut buf = [x];
            limiter.process(&mut buf);
            assert!(
                buf[0].abs() <= x.abs() + 1e-6,
                "amplified at sample {i}: {} -> {}",
                x,
                buf[0]
            );
        }
    }
}
