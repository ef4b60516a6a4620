mod runner;
mod sink;

pub use runner::run_encoder_thread;
pub use sink::{EncoderConfig, EncoderStats, OggOpusSink, OPUS_FRAME_SIZE};

#[derive(Debug, thiserror::Error)]
pub enum EncoderError {
    #[error("encoder init failed: {0}")]
    Init(String),
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EncoderError>;
