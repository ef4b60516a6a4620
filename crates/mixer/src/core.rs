//! The mixer core: consumes aligned per-channel audio, emits limited,
//! crossfaded, interleaved stereo blocks plus the pre-interleave taps and
//! level events.
//!
//! All state here is owned by the mixer thread; nothing is locked. Output
//! never starts until both channels have buffered `startup_threshold`
//! samples, which keeps one source starting early from skewing the session
//! timeline.

use std::sync::Arc;

use murmur_audio::{AlignmentBuffer, HostClock, MonoFrame, SourceKind};
use murmur_bus::BusSender;
use serde::Serialize;

use crate::{rms_unit, LevelEvent, LimiterParams, SoftLimiter};

#[derive(Debug, Clone)]
pub struct MixerConfig {
    pub sample_rate: u32,
    /// Samples per output block (~170 ms at 48 kHz).
    pub block_size: usize,
    /// Per-channel warm-up before the first output block (~200 ms).
    pub startup_threshold: usize,
    /// Frames of crossfade across block boundaries (~1.3 ms).
    pub crossfade_len: usize,
    /// Sample slop absorbed without gap-fill or drop.
    pub jitter_tolerance: u64,
    pub host_clock_hz: u64,
    /// Minimum interval between level events.
    pub level_period_ms: u64,
    pub limiter: LimiterParams,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            sample_rate: murmur_audio::TARGET_SAMPLE_RATE,
            block_size: 8192,
            startup_threshold: 9600,
            crossfade_len: 64,
            jitter_tolerance: 128,
            host_clock_hz: murmur_audio::HOST_CLOCK_HZ,
            level_period_ms: 67,
            limiter: LimiterParams::default(),
        }
    }
}

/// Interleaved stereo output block: left = mic, right = system.
#[derive(Debug, Clone)]
pub struct StereoBlock {
    pub samples: Arc<[f32]>,
    /// Monotonic frame index of the block's first frame within the session.
    pub output_sample_index: u64,
}

impl StereoBlock {
    pub fn frame_count(&self) -> usize {
        self.samples.len() / 2
    }

    /// Presentation time of the block's first frame.
    pub fn presentation_secs(&self, sample_rate: u32) -> f64 {
        self.output_sample_index as f64 / sample_rate as f64
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MixerCounters {
    pub blocks_emitted: u64,
    pub output_frames: u64,
    pub gap_filled_samples: u64,
    pub overlap_dropped_samples: u64,
}

/// Where the mixer's products go. Taps are optional and weakly held: once a
/// tap's receiver is gone the mixer stops producing tap events for good.
pub struct MixerOutputs {
    pub encoder: BusSender<StereoBlock>,
    pub levels: BusSender<LevelEvent>,
    pub mic_tap: Option<BusSender<Arc<[f32]>>>,
    pub system_tap: Option<BusSender<Arc<[f32]>>>,
}

pub struct MixerCore {
    cfg: MixerConfig,
    clock: HostClock,
    mic: AlignmentBuffer,
    system: AlignmentBuffer,
    mic_limiter: SoftLimiter,
    system_limiter: SoftLimiter,
    outputs: MixerOutputs,
    started: bool,
    output_sample_index: u64,
    /// Last `crossfade_len * 2` interleaved samples of the previous block.
    previous_tail: Vec<f32>,
    last_level_ms: Option<u64>,
    counters: MixerCounters,
}

impl MixerCore {
    pub fn new(cfg: MixerConfig, outputs: MixerOutputs) -> Self {
        let clock = HostClock::new(cfg.host_clock_hz, cfg.sample_rate);
        Self {
            mic: AlignmentBuffer::new(cfg.jitter_tolerance),
            system: AlignmentBuffer::new(cfg.jitter_tolerance),
            mic_limiter: SoftLimiter::new(cfg.limiter),
            system_limiter: SoftLimiter::new(cfg.limiter),
            clock,
            outputs,
            started: false,
            output_sample_index: 0,
            previous_tail: Vec::new(),
            last_level_ms: None,
            counters: MixerCounters::default(),
            cfg,
        }
    }

    /// Fix the session's reference point on the host clock. Frames with
    /// ticks before this point land on negative indices and get trimmed.
    pub fn set_base_host_tick(&mut self, tick: u64) {
        self.clock.set_base(tick);
    }

    pub fn output_sample_index(&self) -> u64 {
        self.output_sample_index
    }

    pub fn counters(&self) -> MixerCounters {
        self.counters
    }

    /// Align one normalized frame onto its channel's timeline.
    pub fn append(&mut self, frame: MonoFrame) {
        let buffer = match frame.source {
            SourceKind::Mic => &mut self.mic,
            SourceKind::System => &mut self.system,
        };
        let outcome = buffer.append(&frame.samples, frame.host_tick, &mut self.clock);
        self.counters.gap_filled_samples += outcome.gap_filled as u64;
        self.counters.overlap_dropped_samples += outcome.dropped as u64;
    }

    /// Emit as many full blocks as both channels currently permit.
    /// Returns the number of blocks emitted.
    pub fn pump(&mut self) -> usize {
        if !self.started {
            if self.mic.len() < self.cfg.startup_threshold
                || self.system.len() < self.cfg.startup_threshold
            {
                return 0;
            }
            self.started = true;
            tracing::info!(
                mic_buffered = self.mic.len(),
                system_buffered = self.system.len(),
                "mixer startup gate satisfied"
            );
        }

        let mut emitted = 0;
        while self.mic.len() >= self.cfg.block_size && self.system.len() >= self.cfg.block_size {
            self.emit_block(self.cfg.block_size);
            emitted += 1;
        }
        emitted
    }

    /// Drain the remainder on session stop: one final block of
    /// `min(mic, system)` samples. Never pads, never extends past the
    /// shorter stream.
    pub fn flush(&mut self) {
        let n = self.mic.len().min(self.system.len());
        if n > 0 {
            self.emit_block(n);
        }
        tracing::info!(
            output_frames = self.counters.output_frames,
            "mixer flushed"
        );
    }

    fn emit_block(&mut self, n: usize) {
        let mut mic = self.mic.pop_block(n);
        let mut system = self.system.pop_block(n);

        // Pre-interleave tap: raw mono pair for the transcribers. A closed
        // receiver permanently disables its tap.
        if let Some(tap) = self.outputs.mic_tap.take() {
            let block: Arc<[f32]> = mic.clone().into();
            if tap.send(block) {
                self.outputs.mic_tap = Some(tap);
            } else {
                tracing::debug!("mic tap closed, disabling");
            }
        }
        if let Some(tap) = self.outputs.system_tap.take() {
            let block: Arc<[f32]> = system.clone().into();
            if tap.send(block) {
                self.outputs.system_tap = Some(tap);
            } else {
                tracing::debug!("system tap closed, disabling");
            }
        }

        self.maybe_emit_levels(&mic, &system);

        self.mic_limiter.process(&mut mic);
        self.system_limiter.process(&mut system);

        let mut stereo = Vec::with_capacity(n * 2);
        for i in 0..n {
            stereo.push(mic[i]);
            stereo.push(system[i]);
        }

        // Crossfade the block boundary against the previous block's tail to
        // keep it click-free.
        let fade_frames = self.cfg.crossfade_len.min(n).min(self.previous_tail.len() / 2);
        for k in 0..fade_frames {
            let t = k as f32 / self.cfg.crossfade_len as f32;
            stereo[2 * k] = self.previous_tail[2 * k] * (1.0 - t) + stereo[2 * k] * t;
            stereo[2 * k + 1] =
                self.previous_tail[2 * k + 1] * (1.0 - t) + stereo[2 * k + 1] * t;
        }
        let tail_samples = self.cfg.crossfade_len.min(n) * 2;
        self.previous_tail = stereo[stereo.len() - tail_samples..].to_vec();

        let block = StereoBlock {
            samples: stereo.into(),
            output_sample_index: self.output_sample_index,
        };
        self.output_sample_index += n as u64;
        self.counters.blocks_emitted += 1;
        self.counters.output_frames += n as u64;

        self.outputs.encoder.send(block);
    }

    fn maybe_emit_levels(&mut self, mic: &[f32], system: &[f32]) {
        let presentation_ms = self.output_sample_index * 1000 / self.cfg.sample_rate as u64;
        let due = match self.last_level_ms {
            None => true,
            Some(last) => presentation_ms.saturating_sub(last) >= self.cfg.level_period_ms,
        };
        if !due {
            return;
        }
        self.last_level_ms = Some(presentation_ms);
        self.outputs.levels.send(LevelEvent {
            mic_rms_unit: rms_unit(mic),
            system_rms_unit: rms_unit(system),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_bus::{Bus, BusReceiver};

    struct Rig {
        core: MixerCore,
        blocks: BusReceiver<StereoBlock>,
        levels: BusReceiver<LevelEvent>,
    }

    fn rig(cfg: MixerConfig) -> Rig {
        let (encoder_tx, blocks) = Bus::drop_oldest("encoder", 1024);
        let (level_tx, levels) = Bus::lossy("levels", 64);
        let core = MixerCore::new(
            cfg,
            MixerOutputs {
                encoder: encoder_tx,
                levels: level_tx,
                mic_tap: None,
                system_tap: None,
            },
        );
        Rig {
            core,
            blocks,
            levels,
        }
    }

    fn frame(source: SourceKind, samples: Vec<f32>) -> MonoFrame {
        MonoFrame {
            source,
            samples,
            host_tick: None,
        }
    }

    #[test]
    fn test_startup_gate_holds_output() {
        let mut r = rig(MixerConfig::default());
        r.core.append(frame(SourceKind::Mic, vec![0.1; 9599]));
        r.core.append(frame(SourceKind::System, vec![0.1; 20000]));
        assert_eq!(r.core.pump(), 0, "gate must hold until both sides warm");
        assert!(r.blocks.is_empty());

        // One more mic sample satisfies the gate; a full block is ready.
        r.core.append(frame(SourceKind::Mic, vec![0.1; 1]));
        assert_eq!(r.core.pump(), 1);
    }

    #[test]
    fn test_blocks_have_monotonic_indices() {
        let mut r = rig(MixerConfig::default());
        r.core.append(frame(SourceKind::Mic, vec![0.1; 8192 * 3]));
        r.core.append(frame(SourceKind::System, vec![0.1; 8192 * 3]));
        assert_eq!(r.core.pump(), 3);

        let blocks = r.blocks.drain();
        assert_eq!(blocks.len(), 3);
        let mut expected = 0u64;
        for b in &blocks {
            assert_eq!(b.output_sample_index, expected);
            expected += b.frame_count() as u64;
        }
        assert_eq!(r.core.output_sample_index(), 8192 * 3);
    }

    #[test]
    fn test_left_is_mic_right_is_system() {
        let mut r = rig(MixerConfig::default());
        // Constants below the limiter knee survive limiting and crossfading
        // untouched (a crossfade between equal values is the value).
        r.core.append(frame(SourceKind::Mic, vec![0.25; 16384]));
        r.core.append(frame(SourceKind::System, vec![-0.125; 16384]));
        r.core.pump();

        for block in r.blocks.drain() {
            for pair in block.samples.chunks_exact(2) {
                assert_eq!(pair[0], 0.25, "left must carry mic");
                assert_eq!(pair[1], -0.125, "right must carry system");
            }
        }
    }

    #[test]
    fn test_flush_drains_to_shorter_stream() {
        let mut r = rig(MixerConfig::default());
        r.core.append(frame(SourceKind::Mic, vec![0.1; 20000]));
        r.core.append(frame(SourceKind::System, vec![0.1; 12000]));
        assert_eq!(r.core.pump(), 1);
        r.core.flush();

        let total: usize = r.blocks.drain().iter().map(|b| b.frame_count()).sum();
        assert_eq!(total, 12000, "output must equal the shorter stream");
        assert_eq!(r.core.counters().output_frames, 12000);
    }

    #[test]
    fn test_flush_without_data_emits_nothing() {
        let mut r = rig(MixerConfig::default());
        r.core.append(frame(SourceKind::Mic, vec![0.1; 500]));
        r.core.flush();
        assert!(r.blocks.is_empty());
    }

    #[test]
    fn test_flush_handles_block_remainder_once() {
        // block_size does not divide the totals; flush emits the remainder
        // exactly once without padding.
        let mut r = rig(MixerConfig::default());
        r.core.append(frame(SourceKind::Mic, vec![0.1; 10000]));
        r.core.append(frame(SourceKind::System, vec![0.1; 10000]));
        assert_eq!(r.core.pump(), 1);
        r.core.flush();

        let blocks = r.blocks.drain();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].frame_count(), 8192);
        assert_eq!(blocks[1].frame_count(), 1808);
        assert_eq!(blocks[1].output_sample_index, 8192);
    }

    #[test]
    fn test_zero_input_yields_zero_output_and_floor_levels() {
        let mut r = rig(MixerConfig::default());
        r.core.append(frame(SourceKind::Mic, vec![0.0; 48000]));
        r.core.append(frame(SourceKind::System, vec![0.0; 48000]));
        r.core.pump();
        r.core.flush();

        let total: usize = r.blocks.drain().iter().map(|b| b.frame_count()).sum();
        assert_eq!(total, 48000);

        for event in r.levels.drain() {
            assert_eq!(event.mic_rms_unit, 0.0);
            assert_eq!(event.system_rms_unit, 0.0);
        }
    }

    #[test]
    fn test_level_events_are_throttled() {
        // 2400-sample blocks are 50 ms; at a 67 ms period every other block
        // emits at most.
        let cfg = MixerConfig {
            block_size: 2400,
            startup_threshold: 2400,
            ..Default::default()
        };
        let mut r = rig(cfg);
        r.core.append(frame(SourceKind::Mic, vec![0.1; 2400 * 8]));
        r.core.append(frame(SourceKind::System, vec![0.1; 2400 * 8]));
        assert_eq!(r.core.pump(), 8);

        let events = r.levels.drain();
        assert!(!events.is_empty());
        assert!(events.len() <= 4, "got {} level events", events.len());
    }

    #[test]
    fn test_tap_receives_pre_limit_audio() {
        let (encoder_tx, blocks) = Bus::drop_oldest("encoder", 64);
        let (level_tx, _levels) = Bus::lossy("levels", 8);
        let (mic_tap_tx, mic_tap_rx) = Bus::drop_oldest("mic-tap", 64);
        let mut core = MixerCore::new(
            MixerConfig::default(),
            MixerOutputs {
                encoder: encoder_tx,
                levels: level_tx,
                mic_tap: Some(mic_tap_tx),
                system_tap: None,
            },
        );

        // Loud input: the tap must see it unlimited.
        core.append(frame(SourceKind::Mic, vec![0.9; 16384]));
        core.append(frame(SourceKind::System, vec![0.0; 16384]));
        core.pump();

        let tapped = mic_tap_rx.drain();
        assert_eq!(tapped.len(), 2);
        assert!(tapped[0].iter().all(|&s| s == 0.9));

        // The encoded output went through the limiter.
        let emitted = blocks.drain();
        let late_left: Vec<f32> = emitted[1].samples.chunks_exact(2).map(|p| p[0]).collect();
        assert!(late_left.iter().skip(8000).all(|&s| s < 0.9));
    }

    #[test]
    fn test_closed_tap_disables_quietly() {
        let (encoder_tx, blocks) = Bus::drop_oldest("encoder", 64);
        let (level_tx, _levels) = Bus::lossy("levels", 8);
        let (mic_tap_tx, mic_tap_rx) = Bus::drop_oldest::<Arc<[f32]>>("mic-tap", 64);
        let mut core = MixerCore::new(
            MixerConfig::default(),
            MixerOutputs {
                encoder: encoder_tx,
                levels: level_tx,
                mic_tap: Some(mic_tap_tx),
                system_tap: None,
            },
        );
        drop(mic_tap_rx);

        core.append(frame(SourceKind::Mic, vec![0.1; 16384]));
        core.append(frame(SourceKind::System, vec![0.1; 16384]));
        core.pump();
        // Mixing continues; only the tap is gone.
        assert_eq!(blocks.drain().len(), 2);
    }

    #[test]
    fn test_crossfade_preserves_constant_signal() {
        let mut r = rig(MixerConfig::default());
        r.core.append(frame(SourceKind::Mic, vec![0.2; 24576]));
        r.core.append(frame(SourceKind::System, vec![0.2; 24576]));
        r.core.pump();

        for block in r.blocks.drain() {
            for &s in block.samples.iter() {
                assert!((s - 0.2).abs() < 1e-6, "crossfade distorted steady signal");
            }
        }
    }
}
