//! The decode/encode engine contract.
//!
//! The session never decodes or encodes anything itself. It drives an
//! [`Engine`], which opens a [`Source`] (pull decoded frames) and a
//! [`Sink`] (push frames to encode). [`FfmpegEngine`](crate::FfmpegEngine)
//! is the production binding; tests drive the session with fakes.
//!
//! Both handles are released through an explicit `release` call so release
//! failures can be reported. The session calls `release` exactly once per
//! handle on every exit path.

use std::path::Path;
use std::time::Duration;

use crate::error::EngineError;
use crate::metadata::StreamMetadata;
use crate::parameters::EncodingParameters;

/// A decoded unit of media (an image or a block of audio samples).
pub trait Frame {
    /// Stream position of this frame, relative to the start of the source.
    fn timestamp(&self) -> Duration;
}

/// An opened source, decoding frames in stream order.
pub trait Source {
    /// Decoded frame type.
    type Frame: Frame;

    /// Metadata read when the source was opened.
    fn metadata(&self) -> &StreamMetadata;

    /// Limit decoding to the stream kinds that will be encoded.
    ///
    /// Called once, before the first [`next_frame`](Source::next_frame).
    /// The default decodes everything.
    fn select_streams(&mut self, _video: bool, _audio: bool) {}

    /// Decode the next frame. `Ok(None)` marks the end of the stream.
    ///
    /// # Errors
    ///
    /// Any decode failure; the session does not retry.
    fn next_frame(&mut self) -> Result<Option<Self::Frame>, EngineError>;

    /// Release decoder resources.
    ///
    /// # Errors
    ///
    /// Any failure while closing; the session records it and carries on.
    fn release(&mut self) -> Result<(), EngineError>;
}

/// An opened destination, encoding frames and writing the container.
pub trait Sink {
    /// Frame type accepted for encoding.
    type Frame: Frame;

    /// Encode one frame. Ownership moves into the sink.
    ///
    /// # Errors
    ///
    /// Any encode or write failure; the session does not retry.
    fn push(&mut self, frame: Self::Frame) -> Result<(), EngineError>;

    /// Flush the encoders, finish the container, and release resources.
    ///
    /// # Errors
    ///
    /// Any failure while flushing or closing.
    fn release(&mut self) -> Result<(), EngineError>;
}

/// A decode/encode engine.
pub trait Engine {
    /// Frame type passed from source to sink.
    type Frame: Frame;
    /// Source handle type.
    type Source: Source<Frame = Self::Frame>;
    /// Sink handle type.
    type Sink: Sink<Frame = Self::Frame>;

    /// Open `path` for decoding and read its metadata.
    ///
    /// # Errors
    ///
    /// The file is unreadable or has no decodable stream.
    fn open_source(&mut self, path: &Path) -> Result<Self::Source, EngineError>;

    /// Create `path` for encoding with `parameters`.
    ///
    /// # Errors
    ///
    /// The destination cannot be created or the container/codec combination
    /// is not available.
    fn open_sink(
        &mut self,
        path: &Path,
        parameters: &EncodingParameters,
    ) -> Result<Self::Sink, EngineError>;
}
