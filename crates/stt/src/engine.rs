//! The recognizer-engine boundary.
//!
//! The speech engine itself is an external component; this module pins down
//! the shape the pipeline talks to: a stream that accepts audio in the
//! engine's preferred format and yields timestamped results over a channel.
//! Volatile and final results may interleave; a final supersedes every
//! volatile result covering the same time range.

use std::sync::Arc;

use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};

/// One timed text run inside a recognizer result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizedRun {
    pub start_ms: u64,
    pub duration_ms: u64,
    pub text: String,
}

/// One hypothesis from the engine, volatile or final.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizerResult {
    pub text: String,
    pub runs: Vec<RecognizedRun>,
    pub is_final: bool,
}

/// Audio-input half of an open recognizer stream.
///
/// All methods must be cheap: `push` queues into the engine's bounded input
/// queue and drops on overflow rather than blocking.
pub trait RecognizerInput: Send {
    fn push(&mut self, samples: Arc<[f32]>);

    /// Ask the engine to emit remaining finals and close the result channel.
    fn finalize(&mut self);

    /// Abort immediately; the result channel closes without draining.
    fn cancel(&mut self);
}

/// An open recognizer session: input handle plus the result stream. The
/// result channel closing (for any reason, including an engine crash) is the
/// termination signal for consumers.
pub struct RecognizerStream {
    pub input: Box<dyn RecognizerInput>,
    pub results: Receiver<RecognizerResult>,
}

pub trait RecognizerEngine: Send {
    /// Sample rate the engine wants its input audio in.
    fn preferred_sample_rate(&self) -> u32;

    fn supported_locales(&self) -> Vec<String>;

    /// Open a streaming session for the given locale. May block on model
    /// availability checks; fails with [`crate::SttError::ModelUnavailable`]
    /// when the model is not installed.
    fn open(&mut self, locale: &str) -> crate::Result<RecognizerStream>;
}

/// Resolve a requested locale against the engine's supported set: exact
/// identifier match first, then case-insensitive language + region.
pub fn match_locale(requested: &str, supported: &[String]) -> crate::Result<String> {
    if let Some(exact) = supported.iter().find(|l| l.as_str() == requested) {
        return Ok(exact.clone());
    }

    let norm = normalize(requested);
    if let Some(close) = supported.iter().find(|l| normalize(l) == norm) {
        return Ok(close.clone());
    }

    Err(crate::SttError::LocaleUnsupported(requested.to_string()))
}

/// Lowercased `language-region` form: `en_US.UTF-8` -> `en-us`.
fn normalize(locale: &str) -> String {
    locale
        .split('.')
        .next()
        .unwrap_or(locale)
        .replace('_', "-")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supported() -> Vec<String> {
        vec!["en-US".into(), "en-GB".into(), "ca-ES".into()]
    }

    #[test]
    fn test_exact_identifier_wins() {
        assert_eq!(match_locale("en-GB", &supported()).unwrap(), "en-GB");
    }

    #[test]
    fn test_language_region_case_insensitive() {
        assert_eq!(match_locale("en_us", &supported()).unwrap(), "en-US");
        assert_eq!(match_locale("CA-es", &supported()).unwrap(), "ca-ES");
    }

    #[test]
    fn test_language_only_is_rejected() {
        assert!(matches!(
            match_locale("en", &supported()),
            Err(crate::SttError::LocaleUnsupported(_))
        ));
    }

    #[test]
    fn test_unknown_locale_fails() {
        assert!(matches!(
            match_locale("ja-JP", &supported()),
            Err(crate::SttError::LocaleUnsupported(_))
        ));
    }
}
