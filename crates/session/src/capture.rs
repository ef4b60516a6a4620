//! The boundary to the external capture sources.
//!
//! OS audio acquisition lives outside this crate; a capture source only has
//! to call `FrameSink::deliver` with raw frames, from whatever thread its
//! callbacks run on. The sink normalizes and forwards into the mixer queue
//! and returns immediately.

use std::sync::{Arc, Mutex};

use murmur_audio::{AudioError, MonoFrame, SampleFrame, SourceAdapter};
use murmur_bus::BusSender;

#[derive(Debug, thiserror::Error)]
#[error("capture source failed: {0}")]
pub struct CaptureError(pub String);

/// One external capture source (microphone or system output).
///
/// `start` wires the source to its sink and begins delivery; `stop` halts
/// delivery. Both are called exactly once per session, `start` before any
/// frame is delivered.
pub trait CaptureSource: Send {
    fn start(&mut self, sink: FrameSink) -> Result<(), CaptureError>;
    fn stop(&mut self);
}

/// Where a capture source posts its frames. Cheap to call from a real-time
/// callback: format normalization plus a bounded non-blocking enqueue.
#[derive(Clone)]
pub struct FrameSink {
    adapter: Arc<Mutex<SourceAdapter>>,
    frames: BusSender<MonoFrame>,
    fatal: Arc<Mutex<Option<AudioError>>>,
}

impl FrameSink {
    pub(crate) fn new(
        adapter: Arc<Mutex<SourceAdapter>>,
        frames: BusSender<MonoFrame>,
        fatal: Arc<Mutex<Option<AudioError>>>,
    ) -> Self {
        Self {
            adapter,
            frames,
            fatal,
        }
    }

    pub fn deliver(&self, frame: SampleFrame) {
        let normalized = {
            let mut adapter = self.adapter.lock().expect("source adapter mutex poisoned");
            adapter.on_frame(frame)
        };
        match normalized {
            Ok(Some(frame)) => {
                if !frame.samples.is_empty() {
                    self.frames.send(frame);
                }
            }
            Ok(None) => {}
            Err(e) => {
                let mut slot = self.fatal.lock().expect("fatal slot mutex poisoned");
                if slot.is_none() {
                    tracing::error!(error = %e, "fatal capture format error");
                    *slot = Some(e);
                }
            }
        }
    }
}
