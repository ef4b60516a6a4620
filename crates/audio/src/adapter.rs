//! Source-format normalization in front of the alignment buffers.
//!
//! Capture sources hand over whatever the OS produces: any rate, any channel
//! count, f32 or i16. The adapter converts each frame to 48 kHz mono f32,
//! applies the per-source gain, and tags it for the alignment stage. The
//! caller routes the returned frame into the mixer's input queue; `on_frame`
//! itself never blocks.

use dasp::sample::Sample;

use crate::{FrameSamples, MonoFrame, SampleFrame, SincResampler, SourceKind, TARGET_SAMPLE_RATE};

/// Format signature of a source; a change invalidates the cached resampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FormatSignature {
    rate: u32,
    channels: u16,
    encoding: Encoding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    F32,
    I16,
}

impl FormatSignature {
    fn of(frame: &SampleFrame) -> Self {
        Self {
            rate: frame.rate,
            channels: frame.channels,
            encoding: match frame.samples {
                FrameSamples::F32(_) => Encoding::F32,
                FrameSamples::I16(_) => Encoding::I16,
            },
        }
    }
}

pub struct SourceAdapter {
    source: SourceKind,
    gain: f32,
    /// Cached converter for the source's current format signature.
    converter: Option<(FormatSignature, Option<SincResampler>)>,
    /// Signature whose resampler failed to build; frames matching it are
    /// dropped until the source changes format again.
    failed_signature: Option<FormatSignature>,
    frames_dropped: u64,
}

impl SourceAdapter {
    pub fn new(source: SourceKind, gain: f32) -> Self {
        Self {
            source,
            gain,
            converter: None,
            failed_signature: None,
            frames_dropped: 0,
        }
    }

    pub fn source(&self) -> SourceKind {
        self.source
    }

    /// Frames discarded because they were empty, undescribable, or arrived
    /// while the source's format could not be converted.
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    /// Normalize one capture frame to 48 kHz mono f32.
    ///
    /// Returns `Ok(None)` for frames that are silently dropped (empty
    /// payload, zero channels, or a format already known to be broken).
    /// Returns an error only on the first resampler-construction failure for
    /// a signature; the session treats that as fatal.
    pub fn on_frame(&mut self, frame: SampleFrame) -> crate::Result<Option<MonoFrame>> {
        if frame.samples.is_empty() || frame.channels == 0 {
            self.frames_dropped += 1;
            return Ok(None);
        }

        let signature = FormatSignature::of(&frame);
        if self.failed_signature == Some(signature) {
            self.frames_dropped += 1;
            return Ok(None);
        }

        if self
            .converter
            .as_ref()
            .map(|(sig, _)| *sig != signature)
            .unwrap_or(true)
        {
            tracing::info!(
                source = %self.source,
                rate = signature.rate,
                channels = signature.channels,
                "building converter for source format"
            );
            let resampler = if signature.rate == TARGET_SAMPLE_RATE {
                None
            } else {
                match SincResampler::new(signature.rate, TARGET_SAMPLE_RATE) {
                    Ok(r) => Some(r),
                    Err(e) => {
                        tracing::error!(source = %self.source, error = %e, "resampler construction failed");
                        self.failed_signature = Some(signature);
                        self.frames_dropped += 1;
                        return Err(e);
                    }
                }
            };
            self.converter = Some((signature, resampler));
            self.failed_signature = None;
        }

        let mono = downmix(&frame.samples, frame.channels as usize);
        let (_, resampler) = self.converter.as_mut().expect("converter cached above");
        let mut samples = match resampler {
            Some(r) => r.process(&mono),
            None => mono,
        };

        if (self.gain - 1.0).abs() > f32::EPSILON {
            for s in &mut samples {
                *s *= self.gain;
            }
        }

        Ok(Some(MonoFrame {
            source: self.source,
            samples,
            host_tick: frame.host_tick,
        }))
    }
}

/// Average interleaved channels down to mono, converting i16 on the way.
fn downmix(samples: &FrameSamples, channels: usize) -> Vec<f32> {
    match samples {
        FrameSamples::F32(data) => downmix_f32(data, channels),
        FrameSamples::I16(data) => {
            if channels == 1 {
                data.iter().map(|&s| s.to_sample::<f32>()).collect()
            } else {
                let float: Vec<f32> = data.iter().map(|&s| s.to_sample::<f32>()).collect();
                downmix_f32(&float, channels)
            }
        }
    }
}

fn downmix_f32(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return samples.to_vec();
    }
    let inv_channels = 1.0 / channels as f32;
    samples
        .chunks_exact(channels)
        .map(|chunk| chunk.iter().sum::<f32>() * inv_channels)
        .collect()
}
