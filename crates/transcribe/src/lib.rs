mod transcriber;
mod workers;

pub use transcriber::{SegmentObserver, StreamingTranscriber, TranscriberConfig};

#[derive(Debug, thiserror::Error)]
pub enum TranscribeError {
    #[error(transparent)]
    Stt(#[from] murmur_stt::SttError),
    #[error("audio error: {0}")]
    Audio(#[from] murmur_audio::AudioError),
}

pub type Result<T> = std::result::Result<T, TranscribeError>;
