mod capture;
mod config;
mod paths;
mod session;

pub use capture::{CaptureError, CaptureSource, FrameSink};
pub use config::SessionConfig;
pub use paths::SessionPaths;
pub use session::{Session, SessionCounters, StopOutcome};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Audio(#[from] murmur_audio::AudioError),
    #[error(transparent)]
    Encoder(#[from] murmur_encoder::EncoderError),
    #[error(transparent)]
    Transcribe(#[from] murmur_transcribe::TranscribeError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
