// Playback error taxonomy
use std::path::PathBuf;
use thiserror::Error;

use super::output::SessionId;

#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("Failed to open audio source '{}': {source}", path.display())]
    ResourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to decode audio source '{}': {reason}", path.display())]
    DecodeError { path: PathBuf, reason: String },
    #[error("Failed to initialize audio output: {0}")]
    OutputInitError(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Audio output is in use by session {owner}")]
    OutputBusy { owner: SessionId },
    #[error("Playback stream failed: {0}")]
    StreamFailed(String),
}

impl PlaybackError {
    pub(crate) fn decode(path: &std::path::Path, reason: impl std::fmt::Display) -> Self {
        PlaybackError::DecodeError {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

// Callers at the command-line boundary report errors as plain strings.
impl From<PlaybackError> for String {
    fn from(err: PlaybackError) -> String {
        err.to_string()
    }
}
