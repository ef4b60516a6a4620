use rubato::{FftFixedIn, Resampler};

/// Fixed input chunk size for the FFT resampler; small enough to keep
/// per-frame latency low, large enough to amortize the transform.
const CHUNK_SIZE: usize = 256;

/// Buffering wrapper around rubato's FFT resampler.
///
/// Rubato wants fixed-size input chunks; capture sources deliver whatever
/// buffer size the OS hands them. Incoming samples accumulate until a full
/// chunk is available, and anything left over waits for the next call.
pub struct SincResampler {
    resampler: FftFixedIn<f32>,
    input_buffer: Vec<f32>,
    from_rate: u32,
    to_rate: u32,
}

impl SincResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> crate::Result<Self> {
        let resampler = FftFixedIn::<f32>::new(
            from_rate as usize,
            to_rate as usize,
            CHUNK_SIZE,
            2, // sub-chunks
            1, // mono
        )
        .map_err(|e| {
            crate::AudioError::FormatUnsupported(format!(
                "cannot resample {from_rate} Hz -> {to_rate} Hz: {e}"
            ))
        })?;

        Ok(Self {
            resampler,
            input_buffer: Vec::with_capacity(CHUNK_SIZE * 2),
            from_rate,
            to_rate,
        })
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    /// Feed input samples, returning whatever full chunks produced.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        self.input_buffer.extend_from_slice(samples);

        let mut output = Vec::new();
        while self.input_buffer.len() >= CHUNK_SIZE {
            let chunk: Vec<f32> = self.input_buffer.drain(..CHUNK_SIZE).collect();
            match self.resampler.process(&[chunk], None) {
                Ok(resampled) => {
                    if let Some(channel) = resampled.first() {
                        output.extend_from_slice(channel);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "resampler chunk failed, dropping");
                }
            }
        }
        output
    }

    /// Samples buffered while waiting for a full chunk.
    pub fn pending(&self) -> usize {
        self.input_buffer.len()
    }
}
