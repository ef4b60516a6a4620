//! The dedicated mixer thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use murmur_audio::MonoFrame;
use murmur_bus::BusReceiver;

use crate::{MixerCore, MixerCounters};

/// How long a recv blocks before the stop flag is re-checked.
const RECV_TIMEOUT: Duration = Duration::from_millis(50);

/// Spawn the mixer thread. It drains the frame queue, pumps the core, and on
/// stop (flag set or all producers gone) flushes the remainder and returns
/// the counters.
///
/// The thread never touches external I/O; the encoder runs on its own thread
/// behind the core's output bus, so a slow disk cannot stall mixing.
pub fn run_mixer_thread(
    mut core: MixerCore,
    frames: BusReceiver<MonoFrame>,
    stop: Arc<AtomicBool>,
) -> JoinHandle<MixerCounters> {
    std::thread::Builder::new()
        .name("murmur-mixer".into())
        .spawn(move || {
            tracing::info!("mixer thread started");
            loop {
                match frames.recv_timeout(RECV_TIMEOUT) {
                    Ok(frame) => {
                        core.append(frame);
                        while let Some(extra) = frames.try_recv() {
                            core.append(extra);
                        }
                        // One pump per wake; yielding between wakes keeps
                        // level-event delivery from starving.
                        core.pump();
                        std::thread::yield_now();
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
                if stop.load(Ordering::SeqCst) {
                    break;
                }
            }

            // Drain stragglers, then emit the final partial block.
            while let Some(frame) = frames.try_recv() {
                core.append(frame);
            }
            core.pump();
            core.flush();

            let counters = core.counters();
            tracing::info!(
                blocks = counters.blocks_emitted,
                frames = counters.output_frames,
                gap_filled = counters.gap_filled_samples,
                dropped = counters.overlap_dropped_samples,
                "mixer thread exiting"
            );
            counters
        })
        .expect("failed to spawn mixer thread")
}
