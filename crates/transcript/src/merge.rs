//! Merging the two per-channel final-segment streams into one diarized
//! markdown transcript.

use crate::{format_timestamp_ms, TranscriptSegment};

/// Intra-speaker gap that forces a fresh speaker header.
pub const DEFAULT_SPEAKER_GAP_MS: u64 = 1500;

#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub participants: Option<Vec<String>>,
    pub speaker_gap_ms: u64,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            participants: None,
            speaker_gap_ms: DEFAULT_SPEAKER_GAP_MS,
        }
    }
}

/// Merge both channels' finals into a single markdown transcript.
///
/// Segments are ordered by `(start_ms, speaker)`; a speaker header is
/// emitted at the first segment, on every speaker change, and whenever the
/// gap to the same speaker's previous segment reaches `speaker_gap_ms`.
pub fn merge_transcript(
    mic: &[TranscriptSegment],
    system: &[TranscriptSegment],
    options: &MergeOptions,
) -> String {
    let mut segments: Vec<&TranscriptSegment> = mic.iter().chain(system.iter()).collect();
    segments.sort_by_key(|s| (s.start_ms, s.speaker));

    let mut out = String::from("# Transcript\n\n");
    if let Some(participants) = &options.participants {
        if !participants.is_empty() {
            out.push_str("**Participants:** ");
            out.push_str(&participants.join(", "));
            out.push_str("\n\n");
        }
    }

    let mut current_speaker: Option<crate::Speaker> = None;
    let mut previous_end_ms: Option<u64> = None;

    for seg in segments {
        let gap_ms = previous_end_ms
            .map(|end| seg.start_ms.saturating_sub(end))
            .unwrap_or(0);

        if current_speaker != Some(seg.speaker) || gap_ms >= options.speaker_gap_ms {
            if current_speaker.is_some() {
                out.push('\n');
            }
            out.push_str("**");
            out.push_str(&seg.speaker.to_string());
            out.push_str(":**\n");
            current_speaker = Some(seg.speaker);
        }

        out.push('[');
        out.push_str(&format_timestamp_ms(seg.start_ms));
        out.push_str("] ");
        out.push_str(&seg.text);
        out.push('\n');

        previous_end_ms = Some(seg.end_ms);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Speaker;

    fn seg(start_ms: u64, end_ms: u64, speaker: Speaker, text: &str) -> TranscriptSegment {
        TranscriptSegment {
            start_ms,
            end_ms,
            speaker,
            text: text.into(),
            is_final: true,
        }
    }

    #[test]
    fn test_empty_merge_is_header_only() {
        let out = merge_transcript(&[], &[], &MergeOptions::default());
        assert_eq!(out, "# Transcript\n\n");
    }

    #[test]
    fn test_single_mic_segment() {
        let mic = vec![seg(500, 9500, Speaker::Me, "hello world")];
        let out = merge_transcript(&mic, &[], &MergeOptions::default());
        assert_eq!(out, "# Transcript\n\n**Me:**\n[00:00:00.500] hello world\n");
    }

    #[test]
    fn test_alternating_speakers_short_gap() {
        let mic = vec![seg(0, 1000, Speaker::Me, "hi")];
        let system = vec![seg(1100, 2500, Speaker::Them, "hello back")];
        let out = merge_transcript(&mic, &system, &MergeOptions::default());
        assert_eq!(
            out,
            "# Transcript\n\n\
             **Me:**\n[00:00:00.000] hi\n\n\
             **Them:**\n[00:00:01.100] hello back\n"
        );
    }

    #[test]
    fn test_same_speaker_long_gap_repeats_header() {
        let mic = vec![
            seg(0, 1000, Speaker::Me, "first"),
            seg(3000, 4000, Speaker::Me, "later"),
        ];
        let out = merge_transcript(&mic, &[], &MergeOptions::default());
        assert_eq!(
            out,
            "# Transcript\n\n\
             **Me:**\n[00:00:00.000] first\n\n\
             **Me:**\n[00:00:03.000] later\n"
        );
    }

    #[test]
    fn test_same_speaker_short_gap_keeps_block() {
        let mic = vec![
            seg(0, 1000, Speaker::Me, "first"),
            seg(1400, 2000, Speaker::Me, "second"),
        ];
        let out = merge_transcript(&mic, &[], &MergeOptions::default());
        assert_eq!(
            out,
            "# Transcript\n\n\
             **Me:**\n[00:00:00.000] first\n[00:00:01.400] second\n"
        );
    }

    #[test]
    fn test_gap_exactly_at_threshold_repeats_header() {
        let mic = vec![
            seg(0, 1000, Speaker::Me, "first"),
            seg(2500, 3000, Speaker::Me, "second"),
        ];
        let out = merge_transcript(&mic, &[], &MergeOptions::default());
        assert!(out.matches("**Me:**").count() == 2);
    }

    #[test]
    fn test_participants_block() {
        let options = MergeOptions {
            participants: Some(vec!["Alice".into(), "Bob".into()]),
            ..Default::default()
        };
        let out = merge_transcript(&[], &[], &options);
        assert_eq!(out, "# Transcript\n\n**Participants:** Alice, Bob\n\n");
    }

    #[test]
    fn test_merged_order_is_nondecreasing() {
        let mic = vec![
            seg(0, 900, Speaker::Me, "a"),
            seg(5000, 5900, Speaker::Me, "c"),
        ];
        let system = vec![
            seg(1000, 1900, Speaker::Them, "b"),
            seg(6000, 6900, Speaker::Them, "d"),
        ];
        let out = merge_transcript(&mic, &system, &MergeOptions::default());

        let mut last = 0u64;
        for line in out.lines().filter(|l| l.starts_with('[')) {
            let ts = &line[1..13];
            let parsed: Vec<&str> = ts.split([':', '.']).collect();
            let ms: u64 = parsed[0].parse::<u64>().unwrap() * 3_600_000
                + parsed[1].parse::<u64>().unwrap() * 60_000
                + parsed[2].parse::<u64>().unwrap() * 1000
                + parsed[3].parse::<u64>().unwrap();
            assert!(ms >= last, "timestamps must be non-decreasing");
            last = ms;
        }
    }

    #[test]
    fn test_tied_start_orders_me_before_them() {
        let mic = vec![seg(1000, 2000, Speaker::Me, "mine")];
        let system = vec![seg(1000, 2000, Speaker::Them, "theirs")];
        let out = merge_transcript(&mic, &system, &MergeOptions::default());
        let me_pos = out.find("mine").unwrap();
        let them_pos = out.find("theirs").unwrap();
        assert!(me_pos < them_pos);
    }
}
