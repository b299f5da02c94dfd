//! Error types for the solfa-audio crate.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the audio layer.
///
/// Sample-loading errors surface to the caller (and are retried there);
/// trigger-time errors are caught inside [`crate::Instrument`] and dropped,
/// since a single missed note must never abort playback.
#[derive(Error, Debug)]
pub enum AudioError {
    /// I/O error while reading a sample file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WAV decode error.
    #[error("WAV decode error: {0}")]
    Decode(#[from] hound::Error),

    /// A sample file referenced by an instrument class is missing.
    #[error("missing sample file: {0}")]
    MissingSample(PathBuf),

    /// The host could not produce or drive a voice at trigger time.
    #[error("voice unavailable: {0}")]
    VoiceUnavailable(String),

    /// The audio host has not reported ready yet.
    #[error("audio host not ready")]
    HostNotReady,
}

/// Result type alias using AudioError.
pub type Result<T> = std::result::Result<T, AudioError>;
