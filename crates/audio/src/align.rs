//! Host-tick alignment of per-source sample timelines.
//!
//! Each source has an independent buffer and a running `expected_sample_index`.
//! Incoming blocks are positioned against that index using the host clock:
//! small timing slop is absorbed, sources that fall behind get silence
//! gap-fill, and blocks that overlap already-committed timeline are trimmed.

/// Shared session clock: converts host ticks into sample indices relative to
/// the session's base tick.
#[derive(Debug)]
pub struct HostClock {
    hz: u64,
    sample_rate: u32,
    base_tick: Option<u64>,
}

impl HostClock {
    pub fn new(hz: u64, sample_rate: u32) -> Self {
        Self {
            hz,
            sample_rate,
            base_tick: None,
        }
    }

    /// Fix the session reference point. Later ticks map to positive indices.
    pub fn set_base(&mut self, tick: u64) {
        self.base_tick = Some(tick);
    }

    pub fn base(&self) -> Option<u64> {
        self.base_tick
    }

    /// Map a host tick onto the sample timeline. The first observed tick
    /// becomes the base when none was set.
    pub fn sample_index(&mut self, tick: u64) -> i64 {
        let base = *self.base_tick.get_or_insert(tick);
        let rel_ticks = tick as i64 - base as i64;
        let rel_secs = rel_ticks as f64 / self.hz as f64;
        (rel_secs * self.sample_rate as f64).round() as i64
    }
}

/// Outcome of one append, for the degradation counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Silence samples inserted because the source fell behind.
    pub gap_filled: usize,
    /// Incoming samples discarded because they overlapped the timeline.
    pub dropped: usize,
}

/// Jitter-absorbing buffer for one source.
///
/// `expected_sample_index` equals the total samples ever appended, including
/// silence gap-fill; it is not reduced by pops.
#[derive(Debug)]
pub struct AlignmentBuffer {
    samples: Vec<f32>,
    expected_sample_index: u64,
    jitter_tolerance: u64,
}

impl AlignmentBuffer {
    pub fn new(jitter_tolerance: u64) -> Self {
        Self {
            samples: Vec::new(),
            expected_sample_index: 0,
            jitter_tolerance,
        }
    }

    /// Position `block` on the timeline and push the aligned samples.
    pub fn append(
        &mut self,
        block: &[f32],
        host_tick: Option<u64>,
        clock: &mut HostClock,
    ) -> AppendOutcome {
        if block.is_empty() {
            return AppendOutcome::default();
        }

        let start_idx = match host_tick {
            Some(tick) => clock.sample_index(tick),
            None => self.expected_sample_index as i64,
        };
        let delta = start_idx - self.expected_sample_index as i64;
        let tolerance = self.jitter_tolerance as i64;

        if delta > tolerance {
            // Source fell behind: fill the gap with silence, then append.
            let gap = delta as usize;
            self.samples.extend(std::iter::repeat(0.0f32).take(gap));
            self.samples.extend_from_slice(block);
            self.expected_sample_index += (gap + block.len()) as u64;
            tracing::debug!(gap, block_len = block.len(), "alignment gap-filled");
            AppendOutcome {
                gap_filled: gap,
                dropped: 0,
            }
        } else if delta < -tolerance {
            // Block overlaps committed timeline: trim the stale prefix.
            let overlap = (-delta) as usize;
            if overlap >= block.len() {
                tracing::debug!(overlap, block_len = block.len(), "alignment dropped block");
                return AppendOutcome {
                    gap_filled: 0,
                    dropped: block.len(),
                };
            }
            self.samples.extend_from_slice(&block[overlap..]);
            self.expected_sample_index += (block.len() - overlap) as u64;
            AppendOutcome {
                gap_filled: 0,
                dropped: overlap,
            }
        } else {
            // Within jitter tolerance (or exactly on time): back-to-back.
            self.samples.extend_from_slice(block);
            self.expected_sample_index += block.len() as u64;
            AppendOutcome::default()
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn expected_sample_index(&self) -> u64 {
        self.expected_sample_index
    }

    /// Remove and return the first `n` buffered samples. `n` must not exceed
    /// `len()`.
    pub fn pop_block(&mut self, n: usize) -> Vec<f32> {
        debug_assert!(n <= self.samples.len());
        self.samples.drain(..n).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: u64 = 128;
    const RATE: u32 = 48_000;
    const HZ: u64 = 1_000_000_000;

    fn tick_for_sample(sample: u64) -> u64 {
        (sample as f64 / RATE as f64 * HZ as f64).round() as u64
    }

    #[test]
    fn test_first_tick_sets_base() {
        let mut clock = HostClock::new(HZ, RATE);
        let mut buf = AlignmentBuffer::new(TOLERANCE);

        let out = buf.append(&[0.1; 480], Some(123_456), &mut clock);
        assert_eq!(out, AppendOutcome::default());
        assert_eq!(buf.len(), 480);
        assert_eq!(buf.expected_sample_index(), 480);
        assert_eq!(clock.base(), Some(123_456));
    }

    #[test]
    fn test_untimed_frames_are_back_to_back() {
        let mut clock = HostClock::new(HZ, RATE);
        let mut buf = AlignmentBuffer::new(TOLERANCE);

        buf.append(&[0.1; 1000], None, &mut clock);
        buf.append(&[0.2; 1000], None, &mut clock);
        assert_eq!(buf.len(), 2000);
        assert_eq!(buf.expected_sample_index(), 2000);
    }

    #[test]
    fn test_jitter_within_tolerance_inserts_nothing() {
        let mut clock = HostClock::new(HZ, RATE);
        clock.set_base(0);
        let mut buf = AlignmentBuffer::new(TOLERANCE);

        // Frames arrive 50 us late each time (~2.4 samples), well under the
        // 128-sample window.
        let frame = vec![0.5f32; 1024];
        let mut cumulative = 0u64;
        for i in 0..20 {
            let tick = tick_for_sample(cumulative) + (i + 1) * 50_000;
            let out = buf.append(&frame, Some(tick), &mut clock);
            assert_eq!(out.gap_filled, 0, "frame {i} gap-filled");
            assert_eq!(out.dropped, 0, "frame {i} dropped");
            cumulative += frame.len() as u64;
        }
        assert_eq!(buf.expected_sample_index(), 20 * 1024);
        assert_eq!(buf.len(), 20 * 1024);
    }

    #[test]
    fn test_source_behind_gets_silence_gap() {
        let mut clock = HostClock::new(HZ, RATE);
        clock.set_base(0);
        let mut buf = AlignmentBuffer::new(TOLERANCE);

        buf.append(&[1.0; 480], Some(0), &mut clock);
        // Next frame claims to start 1000 samples later than expected.
        let out = buf.append(&[1.0; 480], Some(tick_for_sample(1480)), &mut clock);
        assert_eq!(out.gap_filled, 1000);
        assert_eq!(buf.expected_sample_index(), 480 + 1000 + 480);
        // The gap region is silent.
        let popped = buf.pop_block(buf.len());
        assert!(popped[480..1480].iter().all(|&s| s == 0.0));
        assert!(popped[1480..].iter().all(|&s| s == 1.0));
    }

    #[test]
    fn test_overlap_trims_stale_prefix() {
        let mut clock = HostClock::new(HZ, RATE);
        clock.set_base(0);
        let mut buf = AlignmentBuffer::new(TOLERANCE);

        buf.append(&[1.0; 4800], Some(0), &mut clock);
        // Host tick implies the frame starts 500 samples before the expected
        // index; the first 500 samples are stale.
        let out = buf.append(&[2.0; 1000], Some(tick_for_sample(4300)), &mut clock);
        assert_eq!(out.dropped, 500);
        assert_eq!(buf.expected_sample_index(), 4800 + 500);
        assert_eq!(buf.len(), 4800 + 500);
    }

    #[test]
    fn test_overlap_larger_than_block_drops_everything() {
        let mut clock = HostClock::new(HZ, RATE);
        clock.set_base(0);
        let mut buf = AlignmentBuffer::new(TOLERANCE);

        buf.append(&[1.0; 4800], Some(0), &mut clock);
        let out = buf.append(&[2.0; 300], Some(tick_for_sample(4300)), &mut clock);
        assert_eq!(out.dropped, 300);
        assert_eq!(buf.expected_sample_index(), 4800);
        assert_eq!(buf.len(), 4800);
    }

    #[test]
    fn test_pop_block_leaves_remainder() {
        let mut clock = HostClock::new(HZ, RATE);
        let mut buf = AlignmentBuffer::new(TOLERANCE);
        buf.append(&[0.25; 1000], None, &mut clock);

        let block = buf.pop_block(600);
        assert_eq!(block.len(), 600);
        assert_eq!(buf.len(), 400);
        // Popping never rewinds the expected index.
        assert_eq!(buf.expected_sample_index(), 1000);
    }

    #[test]
    fn test_empty_block_is_ignored() {
        let mut clock = HostClock::new(HZ, RATE);
        let mut buf = AlignmentBuffer::new(TOLERANCE);
        let out = buf.append(&[], Some(999), &mut clock);
        assert_eq!(out, AppendOutcome::default());
        assert_eq!(buf.expected_sample_index(), 0);
        // An empty block never claims the base tick.
        assert_eq!(clock.base(), None);
    }
}
