use murmur_mixer::LimiterParams;
use serde::{Deserialize, Serialize};

/// Every knob the session recognizes, with the defaults the pipeline is
/// tuned for. Values are validated at `Session::start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Internal processing rate; also the rate of the output file.
    pub target_sample_rate: u32,
    /// Samples per mixer output block.
    pub block_size: usize,
    /// Per-channel warm-up sample count before the mixer emits.
    pub startup_threshold: usize,
    /// Frames of crossfade between mixer blocks.
    pub crossfade_len: usize,
    /// Sample slop absorbed without gap-fill.
    pub jitter_tolerance: u64,
    /// Minimum interval between level events.
    pub level_period_ms: u64,
    /// Per-channel transcript flush cadence.
    pub flush_interval_s: u64,
    /// Gap that forces a new speaker header in the merged transcript.
    pub speaker_gap_ms: u64,
    /// Max wait for recognizer drain on stop.
    pub finalize_timeout_s: u64,
    /// Linear gain on the mic source.
    pub mic_gain: f32,
    /// Linear gain on the system source.
    pub system_gain: f32,
    /// Soft-limiter threshold.
    pub limiter_threshold: f32,
    /// Compression ratio above the threshold.
    pub limiter_ratio: f32,
    /// Locale hint handed to both recognizers.
    pub locale: String,
    /// Tick rate of the capture sources' host clock.
    pub host_clock_hz: u64,
    /// Capture-frame queue depth, in seconds of audio.
    pub frame_queue_seconds: f32,
    /// Encoder handoff queue depth, in seconds of audio.
    pub encoder_queue_seconds: f32,
    /// Transcriber tap queue depth, in seconds of audio.
    pub tap_queue_seconds: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: murmur_audio::TARGET_SAMPLE_RATE,
            block_size: 8192,
            startup_threshold: 9600,
            crossfade_len: 64,
            jitter_tolerance: 128,
            level_period_ms: 67,
            flush_interval_s: 10,
            speaker_gap_ms: 1500,
            finalize_timeout_s: 30,
            mic_gain: 1.0,
            system_gain: 1.0,
            limiter_threshold: 0.5,
            limiter_ratio: 8.0,
            locale: "en-US".to_string(),
            host_clock_hz: murmur_audio::HOST_CLOCK_HZ,
            frame_queue_seconds: 4.0,
            encoder_queue_seconds: 2.0,
            tap_queue_seconds: 2.0,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.target_sample_rate == 0 {
            return Err(crate::SessionError::InvalidConfig(
                "target_sample_rate must be nonzero".into(),
            ));
        }
        if self.block_size == 0 {
            return Err(crate::SessionError::InvalidConfig(
                "block_size must be nonzero".into(),
            ));
        }
        if self.crossfade_len > self.block_size {
            return Err(crate::SessionError::InvalidConfig(format!(
                "crossfade_len {} exceeds block_size {}",
                self.crossfade_len, self.block_size
            )));
        }
        if self.host_clock_hz == 0 {
            return Err(crate::SessionError::InvalidConfig(
                "host_clock_hz must be nonzero".into(),
            ));
        }
        if !self.mic_gain.is_finite() || self.mic_gain < 0.0 {
            return Err(crate::SessionError::InvalidConfig(
                "mic_gain must be finite and non-negative".into(),
            ));
        }
        if !self.system_gain.is_finite() || self.system_gain < 0.0 {
            return Err(crate::SessionError::InvalidConfig(
                "system_gain must be finite and non-negative".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.limiter_threshold) || self.limiter_threshold == 0.0 {
            return Err(crate::SessionError::InvalidConfig(
                "limiter_threshold must be in (0, 1]".into(),
            ));
        }
        if self.limiter_ratio < 1.0 {
            return Err(crate::SessionError::InvalidConfig(
                "limiter_ratio must be >= 1".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn limiter_params(&self) -> LimiterParams {
        LimiterParams {
            threshold: self.limiter_threshold,
            ratio: self.limiter_ratio,
            ..LimiterParams::default()
        }
    }

    /// Nominal duration of one mixer block in milliseconds, used to size
    /// the seconds-denominated queues.
    pub(crate) fn block_ms(&self) -> u32 {
        ((self.block_size as u64 * 1000) / self.target_sample_rate as u64).max(1) as u32
    }
}
