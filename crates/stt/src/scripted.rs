//! Deterministic recognizer for tests and offline development.
//!
//! The engine plays back a script: each entry becomes visible once the
//! stream has absorbed a given number of input samples. `finalize` releases
//! whatever finals remain; `cancel` closes the result channel immediately.
//! A crash threshold simulates an engine dying mid-stream.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Sender, TrySendError};

use crate::{match_locale, RecognizedRun, RecognizerEngine, RecognizerInput, RecognizerResult, RecognizerStream};

/// A scripted result released once `after_samples` input samples arrived.
#[derive(Debug, Clone)]
pub struct ScriptedResult {
    pub after_samples: u64,
    pub result: RecognizerResult,
}

/// Build a final result with a single timed run.
pub fn final_result(start_ms: u64, end_ms: u64, text: &str) -> RecognizerResult {
    RecognizerResult {
        text: text.to_string(),
        runs: vec![RecognizedRun {
            start_ms,
            duration_ms: end_ms.saturating_sub(start_ms),
            text: text.to_string(),
        }],
        is_final: true,
    }
}

/// Build a volatile (revisable) result without timing runs.
pub fn volatile_result(text: &str) -> RecognizerResult {
    RecognizerResult {
        text: text.to_string(),
        runs: Vec::new(),
        is_final: false,
    }
}

pub struct ScriptedEngine {
    preferred_rate: u32,
    locales: Vec<String>,
    script: Vec<ScriptedResult>,
    queue_capacity: usize,
    model_available: bool,
    crash_after_results: Option<usize>,
}

impl ScriptedEngine {
    pub fn new(preferred_rate: u32) -> Self {
        Self {
            preferred_rate,
            locales: vec!["en-US".to_string()],
            script: Vec::new(),
            queue_capacity: 128,
            model_available: true,
            crash_after_results: None,
        }
    }

    pub fn with_script(mut self, mut script: Vec<ScriptedResult>) -> Self {
        script.sort_by_key(|s| s.after_samples);
        self.script = script;
        self
    }

    pub fn with_locales(mut self, locales: Vec<String>) -> Self {
        self.locales = locales;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Simulate a missing model: `open` fails.
    pub fn unavailable(mut self) -> Self {
        self.model_available = false;
        self
    }

    /// Simulate an engine crash after emitting `n` results.
    pub fn crash_after(mut self, n: usize) -> Self {
        self.crash_after_results = Some(n);
        self
    }
}

enum Cmd {
    Push(Arc<[f32]>),
    Finalize,
    Cancel,
}

struct ScriptedInput {
    tx: Sender<Cmd>,
}

impl RecognizerInput for ScriptedInput {
    fn push(&mut self, samples: Arc<[f32]>) {
        match self.tx.try_send(Cmd::Push(samples)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::trace!("scripted engine input queue full, dropping");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn finalize(&mut self) {
        let _ = self.tx.send(Cmd::Finalize);
    }

    fn cancel(&mut self) {
        let _ = self.tx.send(Cmd::Cancel);
    }
}

impl RecognizerEngine for ScriptedEngine {
    fn preferred_sample_rate(&self) -> u32 {
        self.preferred_rate
    }

    fn supported_locales(&self) -> Vec<String> {
        self.locales.clone()
    }

    fn open(&mut self, locale: &str) -> crate::Result<RecognizerStream> {
        if !self.model_available {
            return Err(crate::SttError::ModelUnavailable(locale.to_string()));
        }
        let locale = match_locale(locale, &self.locales)?;
        tracing::debug!(%locale, rate = self.preferred_rate, "scripted engine opened");

        let (cmd_tx, cmd_rx) = bounded::<Cmd>(self.queue_capacity);
        let (result_tx, result_rx) = bounded::<RecognizerResult>(256);

        let mut script = std::mem::take(&mut self.script);
        let crash_after = self.crash_after_results;

        thread::spawn(move || {
            let mut total_samples = 0u64;
            let mut emitted = 0usize;

            while let Ok(cmd) = cmd_rx.recv() {
                match cmd {
                    Cmd::Push(samples) => {
                        total_samples += samples.len() as u64;
                        while script
                            .first()
                            .map(|s| s.after_samples <= total_samples)
                            .unwrap_or(false)
                        {
                            let due = script.remove(0);
                            if result_tx.send(due.result).is_err() {
                                return;
                            }
                            emitted += 1;
                            if crash_after.map(|n| emitted >= n).unwrap_or(false) {
                                // Engine dies; result channel closes abruptly.
                                return;
                            }
                        }
                    }
                    Cmd::Finalize => {
                        for due in script.drain(..) {
                            if due.result.is_final && result_tx.send(due.result).is_err() {
                                return;
                            }
                        }
                        return;
                    }
                    Cmd::Cancel => return,
                }
            }
        });

        Ok(RecognizerStream {
            input: Box::new(ScriptedInput { tx: cmd_tx }),
            results: result_rx,
        })
    }
}
