use serde::{Deserialize, Serialize};

/// Which capture source a frame came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Mic,
    System,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Mic => write!(f, "mic"),
            SourceKind::System => write!(f, "system"),
        }
    }
}

/// Raw payload of a capture frame, in whichever encoding the source produced.
#[derive(Debug, Clone)]
pub enum FrameSamples {
    F32(Vec<f32>),
    I16(Vec<i16>),
}

impl FrameSamples {
    pub fn len(&self) -> usize {
        match self {
            FrameSamples::F32(s) => s.len(),
            FrameSamples::I16(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One buffer handed over by an external capture source.
///
/// `host_tick` is the host clock at the first sample. `None` means the frame
/// is back-to-back with the previous frame from the same source.
#[derive(Debug, Clone)]
pub struct SampleFrame {
    pub samples: FrameSamples,
    pub rate: u32,
    pub channels: u16,
    pub host_tick: Option<u64>,
}

/// A normalized 48 kHz mono frame on its way to the alignment buffer.
#[derive(Debug, Clone)]
pub struct MonoFrame {
    pub source: SourceKind,
    pub samples: Vec<f32>,
    pub host_tick: Option<u64>,
}
