//! The FFmpeg-backed engine and FFmpeg log configuration.
//!
//! [`FfmpegEngine`] implements [`Engine`] with
//! [`FfmpegSource`](crate::decode::FfmpegSource) and
//! [`FfmpegSink`](crate::encode::FfmpegSink).
//!
//! FFmpeg also has its own logging, separate from the [`log`] facade. It
//! prints warnings and errors to stderr by default, which is noisy next to
//! a progress bar. [`set_ffmpeg_log_level`] tunes it.
//!
//! # Example
//!
//! ```no_run
//! use recast::{FfmpegEngine, FfmpegLogLevel};
//!
//! recast::set_ffmpeg_log_level(FfmpegLogLevel::Error);
//! let metadata = recast::probe(&mut FfmpegEngine::new(), "clip.mov")?;
//! println!("{:?}", metadata.duration);
//! # Ok::<(), recast::RecastError>(())
//! ```

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::Path;
use std::str::FromStr;

use ffmpeg_next::util::log::Level;

use crate::decode::{FfmpegSource, MediaFrame};
use crate::encode::FfmpegSink;
use crate::engine::Engine;
use crate::error::{EngineError, RecastError};
use crate::parameters::EncodingParameters;

/// FFmpeg internal log verbosity level.
///
/// Maps directly to FFmpeg's `AV_LOG_*` constants. Messages below the
/// chosen severity are suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FfmpegLogLevel {
    /// Print nothing.
    Quiet,
    /// Unrecoverable errors that abort the process.
    Panic,
    /// Unrecoverable errors.
    Fatal,
    /// Recoverable errors.
    Error,
    /// Warnings (FFmpeg's default).
    Warning,
    /// Informational messages.
    Info,
    /// Verbose informational messages.
    Verbose,
    /// Debugging messages.
    Debug,
    /// Extremely verbose tracing output.
    Trace,
}

impl FfmpegLogLevel {
    fn to_ffmpeg_level(self) -> Level {
        match self {
            FfmpegLogLevel::Quiet => Level::Quiet,
            FfmpegLogLevel::Panic => Level::Panic,
            FfmpegLogLevel::Fatal => Level::Fatal,
            FfmpegLogLevel::Error => Level::Error,
            FfmpegLogLevel::Warning => Level::Warning,
            FfmpegLogLevel::Info => Level::Info,
            FfmpegLogLevel::Verbose => Level::Verbose,
            FfmpegLogLevel::Debug => Level::Debug,
            FfmpegLogLevel::Trace => Level::Trace,
        }
    }

    fn name(self) -> &'static str {
        match self {
            FfmpegLogLevel::Quiet => "quiet",
            FfmpegLogLevel::Panic => "panic",
            FfmpegLogLevel::Fatal => "fatal",
            FfmpegLogLevel::Error => "error",
            FfmpegLogLevel::Warning => "warning",
            FfmpegLogLevel::Info => "info",
            FfmpegLogLevel::Verbose => "verbose",
            FfmpegLogLevel::Debug => "debug",
            FfmpegLogLevel::Trace => "trace",
        }
    }
}

impl Display for FfmpegLogLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.name())
    }
}

impl FromStr for FfmpegLogLevel {
    type Err = RecastError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "quiet" => Ok(FfmpegLogLevel::Quiet),
            "panic" => Ok(FfmpegLogLevel::Panic),
            "fatal" => Ok(FfmpegLogLevel::Fatal),
            "error" => Ok(FfmpegLogLevel::Error),
            "warning" | "warn" => Ok(FfmpegLogLevel::Warning),
            "info" => Ok(FfmpegLogLevel::Info),
            "verbose" => Ok(FfmpegLogLevel::Verbose),
            "debug" => Ok(FfmpegLogLevel::Debug),
            "trace" => Ok(FfmpegLogLevel::Trace),
            other => Err(RecastError::InvalidRequest(format!(
                "unknown FFmpeg log level '{other}'"
            ))),
        }
    }
}

/// Set FFmpeg's own stderr verbosity. Does not affect `log` output.
pub fn set_ffmpeg_log_level(level: FfmpegLogLevel) {
    ffmpeg_next::util::log::set_level(level.to_ffmpeg_level());
}

/// The production engine, decoding and encoding through FFmpeg.
///
/// Video is encoded as H.264 in 4:2:0, audio as AAC, MP3, or 16-bit PCM
/// depending on the target format. The engine itself holds no state, so one
/// value can open any number of sources and sinks.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegEngine {
    _private: (),
}

impl FfmpegEngine {
    /// Create the engine.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Initialise FFmpeg. Safe to call repeatedly.
pub(crate) fn initialise() -> Result<(), EngineError> {
    ffmpeg_next::init()
        .map_err(|error| EngineError::Other(format!("FFmpeg initialisation failed: {error}")))
}

impl Engine for FfmpegEngine {
    type Frame = MediaFrame;
    type Source = FfmpegSource;
    type Sink = FfmpegSink;

    fn open_source(&mut self, path: &Path) -> Result<FfmpegSource, EngineError> {
        initialise()?;
        FfmpegSource::open(path)
    }

    fn open_sink(
        &mut self,
        path: &Path,
        parameters: &EncodingParameters,
    ) -> Result<FfmpegSink, EngineError> {
        initialise()?;
        FfmpegSink::create(path, parameters)
    }
}
