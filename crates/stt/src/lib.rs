mod engine;
pub mod scripted;

pub use engine::{
    match_locale, RecognizedRun, RecognizerEngine, RecognizerInput, RecognizerResult,
    RecognizerStream,
};

#[derive(Debug, thiserror::Error)]
pub enum SttError {
    #[error("recognition model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("locale not supported: {0}")]
    LocaleUnsupported(String),
    #[error("engine error: {0}")]
    EngineFailed(String),
}

pub type Result<T> = std::result::Result<T, SttError>;
