//! Session lifecycle: owns every pipeline component, starts them in
//! dependency order, and tears them down on stop.
//!
//! Start order: encoder sink, transcribers, mixer (with taps wired),
//! adapters, base host tick, then the external capture sources. Stop runs
//! the same chain in reverse: captures halt, the mixer flushes its
//! remainder, the encoder closes the container, both transcribers finalize
//! in parallel under a deadline, and the merged transcript is written.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use murmur_audio::{now_ticks, AudioError, MonoFrame, SourceAdapter, SourceKind};
use murmur_bus::{capacity_for_seconds, Bus, BusCounters, BusReceiver, BusSender};
use murmur_encoder::{run_encoder_thread, EncoderConfig, EncoderStats, OggOpusSink};
use murmur_mixer::{
    run_mixer_thread, LevelEvent, MixerConfig, MixerCore, MixerCounters, MixerOutputs,
};
use murmur_stt::RecognizerEngine;
use murmur_transcribe::{SegmentObserver, StreamingTranscriber, TranscriberConfig};
use murmur_transcript::{merge_transcript, MergeOptions, Speaker, TranscriptSegment};
use serde::Serialize;
use uuid::Uuid;

use crate::{CaptureSource, FrameSink, SessionConfig, SessionPaths};

/// Degradation counters collected at stop, for observability.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionCounters {
    pub mixer: MixerCounters,
    pub encoder_frames: u64,
    pub encoder_packets: u64,
    pub encoder_blocks_dropped: u64,
    pub input_frames: BusCounters,
    pub mic_frames_dropped: u64,
    pub system_frames_dropped: u64,
    pub mic_tap: BusCounters,
    pub system_tap: BusCounters,
    /// First fatal capture-format error observed mid-session, if any.
    pub fatal_error: Option<String>,
}

/// Everything `stop` produces.
#[derive(Debug, Clone)]
pub struct StopOutcome {
    pub audio_path: PathBuf,
    pub transcript_path: PathBuf,
    pub transcript_markdown: String,
    pub segments: Vec<TranscriptSegment>,
    pub counters: SessionCounters,
}

/// Exclusive owner of one recording's pipeline. A process holds at most one
/// live session; the caller enforces that, the session enforces single
/// start/stop.
pub struct Session {
    id: Uuid,
    config: SessionConfig,
    paths: SessionPaths,
    mic_source: Box<dyn CaptureSource>,
    system_source: Box<dyn CaptureSource>,
    mic_adapter: Arc<Mutex<SourceAdapter>>,
    system_adapter: Arc<Mutex<SourceAdapter>>,
    frame_tx: Option<BusSender<MonoFrame>>,
    stop_flag: Arc<AtomicBool>,
    mixer_handle: Option<JoinHandle<MixerCounters>>,
    encoder_handle: Option<JoinHandle<murmur_encoder::Result<EncoderStats>>>,
    mic_transcriber: Option<StreamingTranscriber>,
    system_transcriber: Option<StreamingTranscriber>,
    levels: Option<BusReceiver<LevelEvent>>,
    fatal: Arc<Mutex<Option<AudioError>>>,
    outcome: Option<StopOutcome>,
}

impl Session {
    /// Bring up the whole pipeline and start capturing.
    ///
    /// Suspension points are the encoder open and the recognizer bring-up
    /// (model availability checks); both run off the async executor. Any
    /// unrecoverable error tears down whatever already started.
    pub async fn start(
        config: SessionConfig,
        mic_engine: Box<dyn RecognizerEngine>,
        system_engine: Box<dyn RecognizerEngine>,
        mic_source: Box<dyn CaptureSource>,
        system_source: Box<dyn CaptureSource>,
        paths: SessionPaths,
        observer: Option<SegmentObserver>,
    ) -> crate::Result<Session> {
        config.validate()?;
        let id = Uuid::new_v4();
        tracing::info!(session = %id, audio = %paths.audio.display(), "session starting");

        if let Some(parent) = paths.audio.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // 1. Stereo encoder sink and its thread.
        let encoder_config = EncoderConfig {
            sample_rate: config.target_sample_rate,
            ..EncoderConfig::default()
        };
        let audio_path = paths.audio.clone();
        let sink = tokio::task::spawn_blocking(move || {
            OggOpusSink::create(&audio_path, &encoder_config)
        })
        .await
        .expect("encoder open task panicked")?;

        let (encoder_tx, encoder_rx) = Bus::drop_oldest(
            "encoder",
            capacity_for_seconds(config.encoder_queue_seconds, config.block_ms()),
        );
        let encoder_handle = run_encoder_thread(sink, encoder_rx);

        // 2. Both transcribers, brought up concurrently.
        let tap_capacity = capacity_for_seconds(config.tap_queue_seconds, config.block_ms());
        let mic_task = spawn_transcriber(
            mic_engine,
            transcriber_config(&config, Speaker::Me, tap_capacity),
            paths.mic_fragment.clone(),
            observer.clone(),
        );
        let system_task = spawn_transcriber(
            system_engine,
            transcriber_config(&config, Speaker::Them, tap_capacity),
            paths.system_fragment.clone(),
            observer,
        );
        let (mic_result, system_result) = tokio::join!(mic_task, system_task);
        let mic_result = mic_result.expect("transcriber task panicked");
        let system_result = system_result.expect("transcriber task panicked");
        let (mic_transcriber, system_transcriber) = match (mic_result, system_result) {
            (Ok(m), Ok(s)) => (m, s),
            (mic, system) => {
                // One side failed: cancel the survivor, close the encoder,
                // surface the original error.
                let mut first_err = None;
                for result in [mic, system] {
                    match result {
                        Ok(mut t) => {
                            tokio::task::spawn_blocking(move || t.cancel())
                                .await
                                .expect("cancel task panicked");
                        }
                        Err(e) => {
                            first_err.get_or_insert(e);
                        }
                    }
                }
                drop(encoder_tx);
                let _ = tokio::task::spawn_blocking(move || encoder_handle.join()).await;
                return Err(first_err.expect("one transcriber must have failed").into());
            }
        };

        // 3. Mixer core with output, level, and tap wiring.
        let (level_tx, level_rx) = Bus::lossy("levels", 4);
        let mixer_config = MixerConfig {
            sample_rate: config.target_sample_rate,
            block_size: config.block_size,
            startup_threshold: config.startup_threshold,
            crossfade_len: config.crossfade_len,
            jitter_tolerance: config.jitter_tolerance,
            host_clock_hz: config.host_clock_hz,
            level_period_ms: config.level_period_ms,
            limiter: config.limiter_params(),
        };
        let mut core = MixerCore::new(
            mixer_config,
            MixerOutputs {
                encoder: encoder_tx,
                levels: level_tx,
                mic_tap: mic_transcriber.tap_sender(),
                system_tap: system_transcriber.tap_sender(),
            },
        );

        // 4. Adapters and the shared capture-frame queue. Capacity assumes
        // ~20 ms producer frames, doubled because both sources feed it.
        let (frame_tx, frame_rx) = Bus::drop_oldest(
            "capture-frames",
            capacity_for_seconds(config.frame_queue_seconds, 20) * 2,
        );
        let fatal = Arc::new(Mutex::new(None));
        let mic_adapter = Arc::new(Mutex::new(SourceAdapter::new(
            SourceKind::Mic,
            config.mic_gain,
        )));
        let system_adapter = Arc::new(Mutex::new(SourceAdapter::new(
            SourceKind::System,
            config.system_gain,
        )));

        // 5. The session's reference point on the host clock.
        core.set_base_host_tick(now_ticks());

        let stop_flag = Arc::new(AtomicBool::new(false));
        let mixer_handle = run_mixer_thread(core, frame_rx, Arc::clone(&stop_flag));

        let mut session = Session {
            id,
            config,
            paths,
            mic_source,
            system_source,
            mic_adapter: Arc::clone(&mic_adapter),
            system_adapter: Arc::clone(&system_adapter),
            frame_tx: Some(frame_tx.clone()),
            stop_flag,
            mixer_handle: Some(mixer_handle),
            encoder_handle: Some(encoder_handle),
            mic_transcriber: Some(mic_transcriber),
            system_transcriber: Some(system_transcriber),
            levels: Some(level_rx),
            fatal: Arc::clone(&fatal),
            outcome: None,
        };

        // 6. External capture sources, last.
        let mic_sink = FrameSink::new(mic_adapter, frame_tx.clone(), Arc::clone(&fatal));
        if let Err(e) = session.mic_source.start(mic_sink) {
            session.abort().await;
            return Err(e.into());
        }
        let system_sink = FrameSink::new(system_adapter, frame_tx, fatal);
        if let Err(e) = session.system_source.start(system_sink) {
            session.abort().await;
            return Err(e.into());
        }

        tracing::info!(session = %session.id, "session started");
        Ok(session)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The lossy level-event stream; can be taken once.
    pub fn take_level_events(&mut self) -> Option<BusReceiver<LevelEvent>> {
        self.levels.take()
    }

    /// First fatal capture-format error observed so far, if any. The audio
    /// written before the failure is preserved either way.
    pub fn fatal_error(&self) -> Option<String> {
        self.fatal
            .lock()
            .expect("fatal slot mutex poisoned")
            .as_ref()
            .map(|e| e.to_string())
    }

    /// Stop capturing, drain the pipeline, and produce the artifacts.
    /// Idempotent: a second call returns the first call's outcome.
    pub async fn stop(&mut self, participants: Option<Vec<String>>) -> crate::Result<StopOutcome> {
        if let Some(outcome) = &self.outcome {
            tracing::info!(session = %self.id, "stop called twice, returning cached outcome");
            return Ok(outcome.clone());
        }
        tracing::info!(session = %self.id, "session stopping");

        // 1. Halt the producers, then let the mixer drain and flush.
        self.mic_source.stop();
        self.system_source.stop();
        let input_frames = self
            .frame_tx
            .take()
            .map(|tx| tx.counters())
            .unwrap_or_default();
        self.stop_flag.store(true, Ordering::SeqCst);

        let mixer = match self.mixer_handle.take() {
            Some(handle) => tokio::task::spawn_blocking(move || handle.join())
                .await
                .expect("mixer join task panicked")
                .unwrap_or_else(|e| {
                    tracing::error!("mixer thread panicked: {e:?}");
                    MixerCounters::default()
                }),
            None => MixerCounters::default(),
        };

        // 2. The mixer thread dropped its encoder sender; the encoder now
        // finishes the container.
        let encoder_stats = match self.encoder_handle.take() {
            Some(handle) => tokio::task::spawn_blocking(move || handle.join())
                .await
                .expect("encoder join task panicked")
                .unwrap_or_else(|e| {
                    tracing::error!("encoder thread panicked: {e:?}");
                    Ok(EncoderStats::default())
                })
                .unwrap_or_else(|e| {
                    tracing::error!(error = %e, "encoder finish failed");
                    EncoderStats::default()
                }),
            None => EncoderStats::default(),
        };

        // 3. Finalize both transcribers in parallel under the deadline.
        let timeout = Duration::from_secs(self.config.finalize_timeout_s);
        let mic_task = finalize_transcriber(self.mic_transcriber.take(), timeout);
        let system_task = finalize_transcriber(self.system_transcriber.take(), timeout);
        let (mic_result, system_result) = tokio::join!(mic_task, system_task);
        let (mic_tap, mic_finals) = mic_result.expect("finalize task panicked");
        let (system_tap, system_finals) = system_result.expect("finalize task panicked");

        // 4. Merge and write the transcript.
        let options = MergeOptions {
            participants,
            speaker_gap_ms: self.config.speaker_gap_ms,
        };
        let markdown = merge_transcript(&mic_finals, &system_finals, &options);
        std::fs::write(&self.paths.transcript, &markdown)?;

        let mut segments: Vec<TranscriptSegment> = mic_finals;
        segments.extend(system_finals);
        segments.sort_by_key(|s| (s.start_ms, s.speaker));

        let counters = SessionCounters {
            mixer,
            encoder_frames: encoder_stats.input_frames,
            encoder_packets: encoder_stats.packets_written,
            encoder_blocks_dropped: encoder_stats.blocks_dropped,
            input_frames,
            mic_frames_dropped: adapter_drops(&self.mic_adapter),
            system_frames_dropped: adapter_drops(&self.system_adapter),
            mic_tap,
            system_tap,
            fatal_error: self.fatal_error(),
        };
        tracing::info!(
            session = %self.id,
            frames = counters.encoder_frames,
            finals = segments.len(),
            "session stopped"
        );

        let outcome = StopOutcome {
            audio_path: self.paths.audio.clone(),
            transcript_path: self.paths.transcript.clone(),
            transcript_markdown: markdown,
            segments,
            counters,
        };
        self.outcome = Some(outcome.clone());
        Ok(outcome)
    }

    /// Teardown for a start that failed partway: cancel instead of finalize,
    /// keep whatever audio was written, produce no transcript.
    async fn abort(&mut self) {
        tracing::warn!(session = %self.id, "aborting partially-started session");
        self.mic_source.stop();
        self.system_source.stop();
        self.frame_tx.take();
        self.stop_flag.store(true, Ordering::SeqCst);

        if let Some(handle) = self.mixer_handle.take() {
            let _ = tokio::task::spawn_blocking(move || handle.join()).await;
        }
        if let Some(handle) = self.encoder_handle.take() {
            let _ = tokio::task::spawn_blocking(move || handle.join()).await;
        }
        for transcriber in [
            self.mic_transcriber.take(),
            self.system_transcriber.take(),
        ]
        .into_iter()
        .flatten()
        {
            let mut t = transcriber;
            let _ = tokio::task::spawn_blocking(move || t.cancel()).await;
        }
        self.outcome = Some(StopOutcome {
            audio_path: self.paths.audio.clone(),
            transcript_path: self.paths.transcript.clone(),
            transcript_markdown: String::new(),
            segments: Vec::new(),
            counters: SessionCounters::default(),
        });
    }
}

fn transcriber_config(
    config: &SessionConfig,
    speaker: Speaker,
    tap_capacity: usize,
) -> TranscriberConfig {
    TranscriberConfig {
        speaker,
        locale: config.locale.clone(),
        flush_interval: Duration::from_secs(config.flush_interval_s),
        tap_capacity,
        source_sample_rate: config.target_sample_rate,
    }
}

fn spawn_transcriber(
    mut engine: Box<dyn RecognizerEngine>,
    config: TranscriberConfig,
    fragment: Option<PathBuf>,
    observer: Option<SegmentObserver>,
) -> tokio::task::JoinHandle<murmur_transcribe::Result<StreamingTranscriber>> {
    tokio::task::spawn_blocking(move || {
        StreamingTranscriber::start(engine.as_mut(), config, fragment, observer)
    })
}

fn finalize_transcriber(
    transcriber: Option<StreamingTranscriber>,
    timeout: Duration,
) -> tokio::task::JoinHandle<(BusCounters, Vec<TranscriptSegment>)> {
    tokio::task::spawn_blocking(move || match transcriber {
        Some(mut t) => {
            let finals = t.finalize(timeout);
            (t.feed_counters(), finals)
        }
        None => (BusCounters::default(), Vec::new()),
    })
}

fn adapter_drops(adapter: &Arc<Mutex<SourceAdapter>>) -> u64 {
    adapter
        .lock()
        .expect("source adapter mutex poisoned")
        .frames_dropped()
}
