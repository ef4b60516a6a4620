use serde::{Deserialize, Serialize};

/// Speaker label derived from the channel a segment came from: the
/// microphone is "Me", system output is "Them". This is a channel tag, not
/// an audio classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Speaker {
    Me,
    Them,
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Speaker::Me => write!(f, "Me"),
            Speaker::Them => write!(f, "Them"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start_ms: u64,
    pub end_ms: u64,
    pub speaker: Speaker,
    pub text: String,
    pub is_final: bool,
}

/// Format milliseconds as `HH:MM:SS.mmm`.
pub fn format_timestamp_ms(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms / 60_000) % 60;
    let seconds = (ms / 1000) % 60;
    let millis = ms % 1000;
    format!("{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
}

/// Render a per-channel fragment: one `[HH:MM:SS.mmm] text` line per segment.
pub fn render_fragment(segments: &[TranscriptSegment]) -> String {
    let mut out = String::new();
    for seg in segments {
        out.push('[');
        out.push_str(&format_timestamp_ms(seg.start_ms));
        out.push_str("] ");
        out.push_str(&seg.text);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_format() {
        assert_eq!(format_timestamp_ms(0), "00:00:00.000");
        assert_eq!(format_timestamp_ms(500), "00:00:00.500");
        assert_eq!(format_timestamp_ms(61_001), "00:01:01.001");
        assert_eq!(format_timestamp_ms(3_600_000 + 23 * 60_000 + 45_678), "01:23:45.678");
    }

    #[test]
    fn test_render_fragment() {
        let segments = vec![
            TranscriptSegment {
                start_ms: 500,
                end_ms: 1500,
                speaker: Speaker::Me,
                text: "hello".into(),
                is_final: true,
            },
            TranscriptSegment {
                start_ms: 2000,
                end_ms: 2500,
                speaker: Speaker::Me,
                text: "again".into(),
                is_final: true,
            },
        ];
        assert_eq!(
            render_fragment(&segments),
            "[00:00:00.500] hello\n[00:00:02.000] again\n"
        );
    }

    #[test]
    fn test_render_fragment_empty() {
        assert_eq!(render_fragment(&[]), "");
    }

    #[test]
    fn test_speaker_order_breaks_ties() {
        assert!(Speaker::Me < Speaker::Them);
    }
}
