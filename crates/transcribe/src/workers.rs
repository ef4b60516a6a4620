//! The two worker threads behind a streaming transcriber: the feed worker
//! (format conversion + engine input) and the result worker (volatile/final
//! bookkeeping + fragment flushing).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use murmur_audio::SincResampler;
use murmur_bus::BusReceiver;
use murmur_stt::{RecognizerInput, RecognizerResult};
use murmur_transcript::{render_fragment, Speaker, TranscriptSegment};

use crate::transcriber::SegmentObserver;

/// Feed-worker shutdown states.
pub(crate) const RUN: u8 = 0;
pub(crate) const FINALIZE: u8 = 1;
pub(crate) const CANCEL: u8 = 2;

const RECV_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Default)]
pub(crate) struct SharedState {
    pub final_segments: Vec<TranscriptSegment>,
    pub latest_volatile: Option<TranscriptSegment>,
}

/// Pull 48 kHz blocks off the tap queue, convert to the engine's format,
/// and push them into the engine. Conversion happens here so the mixer
/// thread never pays for it.
pub(crate) fn run_feed_worker(
    feed: BusReceiver<Arc<[f32]>>,
    mut input: Box<dyn RecognizerInput>,
    mut converter: Option<SincResampler>,
    shutdown: Arc<AtomicU8>,
) {
    let push = |input: &mut Box<dyn RecognizerInput>,
                converter: &mut Option<SincResampler>,
                block: Arc<[f32]>| {
        let converted: Arc<[f32]> = match converter {
            Some(r) => r.process(&block).into(),
            None => block,
        };
        if !converted.is_empty() {
            input.push(converted);
        }
    };

    loop {
        match shutdown.load(Ordering::SeqCst) {
            CANCEL => {
                input.cancel();
                return;
            }
            FINALIZE => {
                // Drain what is already queued, then ask the engine to wrap up.
                while let Some(block) = feed.try_recv() {
                    push(&mut input, &mut converter, block);
                }
                input.finalize();
                return;
            }
            _ => {}
        }

        match feed.recv_timeout(RECV_TIMEOUT) {
            Ok(block) => push(&mut input, &mut converter, block),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                // All producers gone without an explicit shutdown: treat as
                // finalize so accumulated audio still drains.
                if shutdown.load(Ordering::SeqCst) == CANCEL {
                    input.cancel();
                } else {
                    input.finalize();
                }
                return;
            }
        }
    }
}

/// Consume engine results until the stream closes (finalize, cancel, or an
/// engine crash; all look the same from here).
pub(crate) fn run_result_worker(
    results: Receiver<RecognizerResult>,
    speaker: Speaker,
    state: Arc<Mutex<SharedState>>,
    observer: Option<SegmentObserver>,
    fragment_path: Option<PathBuf>,
    flush_interval: Duration,
) {
    let mut last_flush = Instant::now();

    while let Ok(result) = results.recv() {
        let Some(segment) = segment_from_result(result, speaker) else {
            continue;
        };
        let is_final = segment.is_final;
        {
            let mut st = state.lock().expect("transcriber state mutex poisoned");
            if is_final {
                st.final_segments.push(segment.clone());
                st.latest_volatile = None;
            } else {
                st.latest_volatile = Some(segment.clone());
            }
        }
        if let Some(observer) = &observer {
            observer(&segment);
        }

        if is_final {
            if let Some(path) = &fragment_path {
                if last_flush.elapsed() >= flush_interval {
                    flush_fragment(path, &state);
                    last_flush = Instant::now();
                }
            }
        }
    }

    // Stream closed; leave the fragment complete on disk.
    if let Some(path) = &fragment_path {
        flush_fragment(path, &state);
    }
    tracing::debug!(%speaker, "result worker exiting");
}

/// Trim, drop empties, and pull timestamps out of the timed runs.
fn segment_from_result(result: RecognizerResult, speaker: Speaker) -> Option<TranscriptSegment> {
    let text = result.text.trim();
    if text.is_empty() {
        return None;
    }
    let start_ms = result.runs.iter().map(|r| r.start_ms).min().unwrap_or(0);
    let end_ms = result
        .runs
        .iter()
        .map(|r| r.start_ms + r.duration_ms)
        .max()
        .unwrap_or(0);
    Some(TranscriptSegment {
        start_ms,
        end_ms,
        speaker,
        text: text.to_string(),
        is_final: result.is_final,
    })
}

/// Write the fragment atomically: temp sibling + rename, with a direct
/// write as the fallback. Readers never observe a partial file.
fn flush_fragment(path: &Path, state: &Arc<Mutex<SharedState>>) {
    let snapshot = {
        let st = state.lock().expect("transcriber state mutex poisoned");
        st.final_segments.clone()
    };
    let rendered = render_fragment(&snapshot);

    let tmp = path.with_extension("md.tmp");
    match std::fs::write(&tmp, &rendered).and_then(|()| std::fs::rename(&tmp, path)) {
        Ok(()) => {}
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "atomic flush failed, writing directly");
            if let Err(e) = std::fs::write(path, &rendered) {
                tracing::warn!(error = %e, "fragment write failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_stt::RecognizedRun;

    fn result(text: &str, runs: Vec<RecognizedRun>, is_final: bool) -> RecognizerResult {
        RecognizerResult {
            text: text.to_string(),
            runs,
            is_final,
        }
    }

    #[test]
    fn test_segment_timestamps_span_runs() {
        let r = result(
            "hello world",
            vec![
                RecognizedRun {
                    start_ms: 500,
                    duration_ms: 400,
                    text: "hello".into(),
                },
                RecognizedRun {
                    start_ms: 1000,
                    duration_ms: 600,
                    text: "world".into(),
                },
            ],
            true,
        );
        let seg = segment_from_result(r, Speaker::Me).unwrap();
        assert_eq!(seg.start_ms, 500);
        assert_eq!(seg.end_ms, 1600);
        assert!(seg.is_final);
    }

    #[test]
    fn test_segment_without_runs_gets_zero_times() {
        let seg = segment_from_result(result("hi", vec![], false), Speaker::Them).unwrap();
        assert_eq!(seg.start_ms, 0);
        assert_eq!(seg.end_ms, 0);
        assert_eq!(seg.speaker, Speaker::Them);
    }

    #[test]
    fn test_whitespace_text_is_dropped() {
        assert!(segment_from_result(result("   \n", vec![], true), Speaker::Me).is_none());
        assert!(segment_from_result(result("", vec![], true), Speaker::Me).is_none());
    }

    #[test]
    fn test_text_is_trimmed() {
        let seg = segment_from_result(result("  hello  ", vec![], true), Speaker::Me).unwrap();
        assert_eq!(seg.text, "hello");
    }
}
