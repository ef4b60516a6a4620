use std::path::{Path, PathBuf};

/// Filesystem layout of one session's artifacts.
#[derive(Debug, Clone)]
pub struct SessionPaths {
    /// Stereo audio container (left = mic, right = system).
    pub audio: PathBuf,
    /// Merged diarized markdown, written on stop.
    pub transcript: PathBuf,
    /// Per-channel fragments, flushed atomically during recording.
    pub mic_fragment: Option<PathBuf>,
    pub system_fragment: Option<PathBuf>,
}

impl SessionPaths {
    /// The standard artifact triple inside one directory.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            audio: dir.join("audio.ogg"),
            transcript: dir.join("transcript.md"),
            mic_fragment: Some(dir.join("transcript.mic.md")),
            system_fragment: Some(dir.join("transcript.system.md")),
        }
    }

    /// A fresh timestamped recording directory under `root`.
    pub fn timestamped(root: impl AsRef<Path>) -> Self {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        Self::in_dir(root.as_ref().join(format!("recording_{stamp}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_dir_layout() {
        let paths = SessionPaths::in_dir("/tmp/session");
        assert_eq!(paths.audio, PathBuf::from("/tmp/session/audio.ogg"));
        assert_eq!(paths.transcript, PathBuf::from("/tmp/session/transcript.md"));
        assert!(paths.mic_fragment.unwrap().ends_with("transcript.mic.md"));
    }

    #[test]
    fn test_timestamped_nests_under_root() {
        let paths = SessionPaths::timestamped("/tmp/recordings");
        assert!(paths.audio.starts_with("/tmp/recordings"));
        assert!(paths
            .audio
            .parent()
            .unwrap()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("recording_"));
    }
}
