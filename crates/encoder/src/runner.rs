//! The dedicated encoder thread.

use std::thread::JoinHandle;

use murmur_bus::BusReceiver;
use murmur_mixer::StereoBlock;

use crate::{EncoderStats, OggOpusSink};

/// Spawn the encoder thread. It drains stereo blocks until every producer
/// is gone, then finishes the container and returns the stats.
pub fn run_encoder_thread(
    mut sink: OggOpusSink,
    blocks: BusReceiver<StereoBlock>,
) -> JoinHandle<crate::Result<EncoderStats>> {
    std::thread::Builder::new()
        .name("murmur-encoder".into())
        .spawn(move || {
            tracing::info!("encoder thread started");
            while let Ok(block) = blocks.recv() {
                sink.append(&block.samples, block.output_sample_index);
            }
            let stats = sink.finish()?;
            tracing::info!(frames = stats.input_frames, "encoder thread exiting");
            Ok(stats)
        })
        .expect("failed to spawn encoder thread")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EncoderConfig;
    use murmur_bus::Bus;
    use std::sync::Arc;

    #[test]
    fn test_thread_finishes_when_producers_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio.ogg");
        let sink = OggOpusSink::create(&path, &EncoderConfig::default()).unwrap();

        let (tx, rx) = Bus::drop_oldest::<StereoBlock>("encoder", 64);
        let handle = run_encoder_thread(sink, rx);

        let samples: Arc<[f32]> = vec![0.0f32; 9600 * 2].into();
        tx.send(StereoBlock {
            samples,
            output_sample_index: 0,
        });
        drop(tx);

        let stats = handle.join().unwrap().unwrap();
        assert_eq!(stats.input_frames, 9600);
        assert!(path.exists());
    }
}
