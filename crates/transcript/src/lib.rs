mod merge;
mod segment;

pub use merge::{merge_transcript, MergeOptions, DEFAULT_SPEAKER_GAP_MS};
pub use segment::{format_timestamp_ms, render_fragment, Speaker, TranscriptSegment};
