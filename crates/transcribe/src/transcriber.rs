//! One streaming transcriber per channel.
//!
//! Audio arrives through a bounded tap queue (dropped, not blocked on, when
//! the engine cannot keep up), gets converted to the engine's preferred
//! format on the feed worker, and the result worker turns engine output
//! into speaker-tagged transcript segments. Finals accumulate under a short
//! mutex; the newest volatile hypothesis is kept for display only and never
//! persisted.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use murmur_audio::SincResampler;
use murmur_bus::{Bus, BusCounters, BusSender};
use murmur_stt::{match_locale, RecognizerEngine};
use murmur_transcript::{Speaker, TranscriptSegment};

use crate::workers::{run_feed_worker, run_result_worker, SharedState, CANCEL, FINALIZE, RUN};

/// Observer fired for every segment (volatile and final) as it arrives.
pub type SegmentObserver = Arc<dyn Fn(&TranscriptSegment) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct TranscriberConfig {
    pub speaker: Speaker,
    pub locale: String,
    /// Cadence of the per-channel fragment flush.
    pub flush_interval: Duration,
    /// Tap queue depth in mixer blocks (~2 s of audio at the default block
    /// size).
    pub tap_capacity: usize,
    /// Rate of the audio arriving on the tap.
    pub source_sample_rate: u32,
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            speaker: Speaker::Me,
            locale: "en-US".to_string(),
            flush_interval: Duration::from_secs(10),
            tap_capacity: 16,
            source_sample_rate: murmur_audio::TARGET_SAMPLE_RATE,
        }
    }
}

pub struct StreamingTranscriber {
    speaker: Speaker,
    feed: Option<BusSender<Arc<[f32]>>>,
    feed_counters: BusCounters,
    shutdown: Arc<AtomicU8>,
    state: Arc<Mutex<SharedState>>,
    feed_handle: Option<JoinHandle<()>>,
    result_handle: Option<JoinHandle<()>>,
    cancelled: bool,
}

impl StreamingTranscriber {
    /// Open an engine stream and start both workers.
    ///
    /// Fails with `ModelUnavailable` / `LocaleUnsupported` before any thread
    /// is spawned; those abort the session.
    pub fn start(
        engine: &mut dyn RecognizerEngine,
        config: TranscriberConfig,
        fragment_path: Option<PathBuf>,
        observer: Option<SegmentObserver>,
    ) -> crate::Result<Self> {
        let locale = match_locale(&config.locale, &engine.supported_locales())?;
        let engine_rate = engine.preferred_sample_rate();
        let converter = if engine_rate != config.source_sample_rate {
            Some(SincResampler::new(config.source_sample_rate, engine_rate)?)
        } else {
            None
        };

        let stream = engine.open(&locale)?;
        tracing::info!(
            speaker = %config.speaker,
            %locale,
            engine_rate,
            "transcriber started"
        );

        let (feed_tx, feed_rx) = Bus::drop_oldest("transcriber-feed", config.tap_capacity);
        let shutdown = Arc::new(AtomicU8::new(RUN));
        let state = Arc::new(Mutex::new(SharedState::default()));

        let feed_shutdown = Arc::clone(&shutdown);
        let feed_handle = std::thread::Builder::new()
            .name("murmur-transcribe-feed".into())
            .spawn(move || run_feed_worker(feed_rx, stream.input, converter, feed_shutdown))
            .expect("failed to spawn feed worker");

        let results = stream.results;
        let result_state = Arc::clone(&state);
        let speaker = config.speaker;
        let flush_interval = config.flush_interval;
        let result_handle = std::thread::Builder::new()
            .name("murmur-transcribe-results".into())
            .spawn(move || {
                run_result_worker(
                    results,
                    speaker,
                    result_state,
                    observer,
                    fragment_path,
                    flush_interval,
                )
            })
            .expect("failed to spawn result worker");

        Ok(Self {
            speaker: config.speaker,
            feed: Some(feed_tx),
            feed_counters: BusCounters::default(),
            shutdown,
            state,
            feed_handle: Some(feed_handle),
            result_handle: Some(result_handle),
            cancelled: false,
        })
    }

    pub fn speaker(&self) -> Speaker {
        self.speaker
    }

    /// Sender the mixer's pre-interleave tap writes into. The mixer holds
    /// only this channel handle, never the transcriber itself.
    pub fn tap_sender(&self) -> Option<BusSender<Arc<[f32]>>> {
        self.feed.clone()
    }

    /// Queue source-rate samples for recognition. Non-blocking; a no-op
    /// once the transcriber is shutting down, and lossy when the engine
    /// falls behind (a transcript gap, not an audio-path problem).
    pub fn feed_samples(&self, samples: &[f32]) {
        if let Some(feed) = &self.feed {
            feed.send(samples.to_vec().into());
        }
    }

    /// Tap-queue counters (blocks sent / dropped).
    pub fn feed_counters(&self) -> BusCounters {
        match &self.feed {
            Some(feed) => feed.counters(),
            None => self.feed_counters,
        }
    }

    /// Finals accumulated so far, in engine emission order.
    pub fn finals_snapshot(&self) -> Vec<TranscriptSegment> {
        self.state
            .lock()
            .expect("transcriber state mutex poisoned")
            .final_segments
            .clone()
    }

    /// Newest volatile hypothesis, if any.
    pub fn latest_volatile(&self) -> Option<TranscriptSegment> {
        self.state
            .lock()
            .expect("transcriber state mutex poisoned")
            .latest_volatile
            .clone()
    }

    /// Ask the engine for its remaining finals and wait for the pipeline to
    /// drain, bounded by `timeout`. Returns the accumulated finals (empty
    /// after `cancel`). Idempotent.
    pub fn finalize(&mut self, timeout: Duration) -> Vec<TranscriptSegment> {
        if !self.cancelled {
            self.shutdown.store(FINALIZE, Ordering::SeqCst);
        }
        self.close_feed();

        let deadline = Instant::now() + timeout;
        self.join_worker_until(deadline, WorkerKind::Feed);
        self.join_worker_until(deadline, WorkerKind::Result);

        if self.cancelled {
            return Vec::new();
        }
        let finals = self.finals_snapshot();
        tracing::info!(speaker = %self.speaker, finals = finals.len(), "transcriber finalized");
        finals
    }

    /// Abort the engine and both workers immediately, discarding results.
    pub fn cancel(&mut self) {
        self.cancelled = true;
        self.shutdown.store(CANCEL, Ordering::SeqCst);
        self.close_feed();

        let deadline = Instant::now() + Duration::from_secs(1);
        self.join_worker_until(deadline, WorkerKind::Feed);
        self.join_worker_until(deadline, WorkerKind::Result);

        let mut st = self.state.lock().expect("transcriber state mutex poisoned");
        st.final_segments.clear();
        st.latest_volatile = None;
        tracing::info!(speaker = %self.speaker, "transcriber cancelled");
    }

    fn close_feed(&mut self) {
        if let Some(feed) = self.feed.take() {
            self.feed_counters = feed.counters();
        }
    }

    fn join_worker_until(&mut self, deadline: Instant, kind: WorkerKind) {
        let slot = match kind {
            WorkerKind::Feed => &mut self.feed_handle,
            WorkerKind::Result => &mut self.result_handle,
        };
        let Some(handle) = slot.take() else { return };

        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        if handle.is_finished() {
            if let Err(e) = handle.join() {
                tracing::error!(speaker = %self.speaker, "transcriber worker panicked: {e:?}");
            }
        } else {
            tracing::warn!(
                speaker = %self.speaker,
                ?kind,
                "timed out waiting for transcriber worker; detaching"
            );
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum WorkerKind {
    Feed,
    Result,
}
