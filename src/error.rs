//! Error types for the `recast` crate.
//!
//! This module defines [`RecastError`], the unified error type returned by
//! every fallible operation in the crate, and [`EngineError`], the narrower
//! error an [`Engine`](crate::Engine) binding reports. The session
//! classifies engine errors into the open / transcode / cleanup variants of
//! [`RecastError`] so callers can tell where a conversion broke.

use std::{io::Error as IoError, path::PathBuf};

use thiserror::Error;

use crate::session::SessionState;

/// The unified error type for all `recast` operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RecastError {
    /// The source could not be opened or has no decodable stream.
    #[error("Failed to open source {path}: {reason}")]
    OpenSource {
        /// Path of the source media file.
        path: PathBuf,
        /// Underlying reason the open failed.
        reason: String,
    },

    /// The destination could not be created, or the container/codec
    /// combination is not supported for this source.
    #[error("Failed to open destination {path}: {reason}")]
    OpenDestination {
        /// Path of the destination file.
        path: PathBuf,
        /// Underlying reason the open failed.
        reason: String,
    },

    /// Decoding or encoding failed mid-stream.
    #[error("Transcode failed at {:.1}% after {frames} frames: {reason}", .ratio * 100.0)]
    Transcode {
        /// What went wrong.
        reason: String,
        /// Last completion ratio reached before the failure, in `[0, 1]`.
        ratio: f64,
        /// Frames handed to the encoder before the failure.
        frames: u64,
    },

    /// Releasing an engine resource failed.
    #[error("Failed to release {resource}: {reason}")]
    Cleanup {
        /// Which resource failed to release (`"sink"` or `"source"`).
        resource: &'static str,
        /// Underlying reason.
        reason: String,
    },

    /// Quality must lie in `[0, 1]`.
    #[error("Quality must be between 0.0 and 1.0, got {0}")]
    InvalidQuality(f32),

    /// The conversion request is malformed.
    #[error("Invalid conversion request: {0}")]
    InvalidRequest(String),

    /// The requested target format is not one of the supported formats.
    #[error("Unsupported target format: {0}")]
    UnsupportedFormat(String),

    /// `run` was called on a session that already ran.
    #[error("Session already ran (state: {0:?})")]
    SessionReused(SessionState),

    /// The worker thread running a conversion panicked.
    #[error("Conversion worker panicked: {0}")]
    WorkerPanicked(String),

    /// An I/O error occurred outside the engine.
    #[error("I/O error: {0}")]
    IoError(#[from] IoError),
}

impl RecastError {
    /// Returns `true` for errors raised before any frame was processed.
    pub fn is_open_error(&self) -> bool {
        matches!(
            self,
            RecastError::OpenSource { .. } | RecastError::OpenDestination { .. }
        )
    }
}

/// Error reported by an [`Engine`](crate::Engine) binding.
///
/// Engines describe *what* failed; the session decides *where* in the
/// conversion it failed and wraps the message accordingly.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// An error originating from the FFmpeg libraries.
    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] ffmpeg_next::Error),

    /// The source has no stream the engine can decode.
    #[error("no decodable audio or video stream")]
    NoStreams,

    /// A codec, container, or parameter combination is not available.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// An I/O error raised by the engine.
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Any other engine failure.
    #[error("{0}")]
    Other(String),
}

impl EngineError {
    /// Build an [`EngineError::Other`] from anything printable.
    pub fn other(message: impl Into<String>) -> Self {
        EngineError::Other(message.into())
    }
}
