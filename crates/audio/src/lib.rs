mod adapter;
mod align;
mod frame;
mod host_ticks;
mod resample;

pub use adapter::SourceAdapter;
pub use align::{AlignmentBuffer, AppendOutcome, HostClock};
pub use frame::{FrameSamples, MonoFrame, SampleFrame, SourceKind};
pub use host_ticks::{now_ticks, HOST_CLOCK_HZ};
pub use resample::SincResampler;

/// Internal sample rate for the whole pipeline; also the rate of the output file.
pub const TARGET_SAMPLE_RATE: u32 = 48_000;

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("unsupported audio format: {0}")]
    FormatUnsupported(String),
    #[error("stream error: {0}")]
    StreamError(String),
}

pub type Result<T> = std::result::Result<T, AudioError>;
