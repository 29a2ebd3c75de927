//! # recast
//!
//! Convert audio and video files between container formats, with
//! throttled progress reporting and cooperative cancellation.
//!
//! A conversion is a [`TranscodeSession`]: it opens a source through an
//! [`Engine`], derives encoder settings from the source metadata and a
//! [`Quality`] value, pumps every decoded frame into the encoder, and
//! releases both ends on every exit path. The production engine is
//! [`FfmpegEngine`], powered by FFmpeg via the
//! [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next) crate.
//!
//! ## Quick Start
//!
//! ### Convert a File
//!
//! ```no_run
//! # #[cfg(feature = "ffmpeg")]
//! # {
//! use recast::{ConversionRequest, ConvertOptions, FfmpegEngine, Quality, TargetFormat};
//!
//! let request = ConversionRequest::into_directory(
//!     "clip.mov",
//!     "out",
//!     TargetFormat::Mp4,
//!     Quality::new(0.8)?,
//! )?;
//! let outcome = recast::transcode(FfmpegEngine::new(), request, ConvertOptions::new())?;
//! println!("{outcome:?}");
//! # }
//! # Ok::<(), recast::RecastError>(())
//! ```
//!
//! ### Convert in the Background
//!
//! ```no_run
//! # #[cfg(feature = "ffmpeg")]
//! # {
//! use recast::{ConversionEvent, ConvertOptions, FfmpegEngine, TargetFormat};
//!
//! let handle = recast::start_conversion(
//!     FfmpegEngine::new(),
//!     "clip.mov",
//!     "out",
//!     TargetFormat::Mp3,
//!     0.5,
//!     ConvertOptions::new(),
//! )?;
//! while let Some(event) = handle.recv() {
//!     if let ConversionEvent::Progress(sample) = event {
//!         println!("{}%", sample.percentage());
//!     }
//! }
//! # }
//! # Ok::<(), recast::RecastError>(())
//! ```
//!
//! ## Features
//!
//! - **Six targets**: MP4, AVI, MKV, and MOV (H.264 video with AAC audio),
//!   MP3, and WAV
//! - **Quality mapping**: one `[0, 1]` value drives both video and audio
//!   bitrates
//! - **Progress**: estimated every N frames, monotonic, always ending at
//!   100% on success
//! - **Cancellation**: a cloneable `CancellationToken` checked between
//!   frames
//! - **Background runs**: a worker thread per conversion, observed through a
//!   channel, or a Tokio stream with the `async` feature
//! - **Pluggable engine**: the session drives any `Engine`; tests use fakes
//!
//! ### Optional Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `ffmpeg` | The FFmpeg engine (default) |
//! | `async` | `ConversionStream` on Tokio's blocking pool |
//! | `full` | Enables all of the above |
//!
//! ## Requirements
//!
//! The `ffmpeg` feature needs the FFmpeg development libraries installed on
//! your system.

pub mod config;
#[cfg(feature = "ffmpeg")]
mod conversion;
#[cfg(feature = "ffmpeg")]
pub mod decode;
#[cfg(feature = "ffmpeg")]
pub mod encode;
pub mod engine;
pub mod error;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod format;
pub mod handle;
pub mod metadata;
pub mod parameters;
pub mod probe;
pub mod progress;
pub mod request;
pub mod session;
#[cfg(feature = "async")]
pub mod stream;

pub use config::{ConvertOptions, DEFAULT_BATCH_SIZE, PartialOutput};
#[cfg(feature = "ffmpeg")]
pub use decode::{FfmpegSource, MediaFrame};
#[cfg(feature = "ffmpeg")]
pub use encode::FfmpegSink;
pub use engine::{Engine, Frame, Sink, Source};
pub use error::{EngineError, RecastError};
#[cfg(feature = "ffmpeg")]
pub use ffmpeg::{FfmpegEngine, FfmpegLogLevel, set_ffmpeg_log_level};
pub use format::{AudioCodec, Quality, TargetFormat, VideoCodec};
pub use handle::{
    ConversionEvent, ConversionHandle, ConversionOutcome, spawn_conversion, start_conversion,
};
pub use metadata::{AudioMetadata, StreamMetadata, VideoMetadata};
pub use parameters::{
    AudioParameters, BitrateMapping, EncodingParameters, REFERENCE_AUDIO_BIT_RATE,
    REFERENCE_VIDEO_BIT_RATE, VideoParameters,
};
pub use probe::{probe, probe_many};
pub use progress::{
    CancellationToken, ProgressCallback, ProgressSample, UNKNOWN_DURATION_SECONDS, estimate,
    estimate_duration,
};
pub use request::{ConversionRequest, OUTPUT_SUFFIX, output_file_name};
pub use session::{SessionOutcome, SessionState, TranscodeSession, transcode};
#[cfg(feature = "async")]
pub use stream::{ConversionStream, spawn_conversion_stream, start_conversion_stream};
