use serde::{Deserialize, Serialize};

/// Per-channel RMS levels for UI metering, on a normalized [0, 1] scale
/// where 0 is -60 dBFS (or quieter) and 1 is full scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelEvent {
    pub mic_rms_unit: f32,
    pub system_rms_unit: f32,
}

/// RMS of a block mapped through dBFS onto the unit meter scale.
pub fn rms_unit(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let mean_sq = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    let rms = mean_sq.sqrt();
    let db = 20.0 * rms.max(1e-10).log10();
    ((db + 60.0) / 60.0).clamp(0.0, 1.0)
}
