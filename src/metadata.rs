//! Source stream metadata.
//!
//! [`StreamMetadata`] is read once, right after the source is opened, and is
//! owned by the session for the rest of the conversion. It is never mutated.

use std::time::Duration;

/// Metadata of an opened source.
///
/// # Example
///
/// ```no_run
/// # #[cfg(feature = "ffmpeg")]
/// # {
/// use recast::FfmpegEngine;
///
/// let metadata = recast::probe(&mut FfmpegEngine::new(), "input.mp4")?;
/// println!("Duration: {:?}", metadata.duration);
/// # }
/// # Ok::<(), recast::RecastError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
#[must_use]
pub struct StreamMetadata {
    /// Total duration. [`Duration::ZERO`] when the container does not
    /// report one (live captures, some raw streams).
    pub duration: Duration,
    /// Container format name (e.g. `"mov,mp4,m4a,3gp,3g2,mj2"`, `"matroska,webm"`).
    pub format: String,
    /// Video stream metadata, if a video stream is present.
    pub video: Option<VideoMetadata>,
    /// Audio stream metadata, if an audio stream is present.
    pub audio: Option<AudioMetadata>,
}

impl StreamMetadata {
    /// `true` when the source has neither a video nor an audio stream.
    pub fn is_empty(&self) -> bool {
        self.video.is_none() && self.audio.is_none()
    }

    /// `true` when the container reported a positive duration.
    pub fn has_known_duration(&self) -> bool {
        !self.duration.is_zero()
    }
}

/// Metadata for the source's video stream.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub struct VideoMetadata {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Frames per second (approximate for variable-frame-rate content,
    /// `0.0` if the container does not say).
    pub frames_per_second: f64,
    /// Codec name (e.g. `"h264"`, `"vp9"`).
    pub codec: String,
}

/// Metadata for the source's audio stream.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub struct AudioMetadata {
    /// Sample rate in hertz.
    pub sample_rate: u32,
    /// Number of audio channels.
    pub channels: u16,
    /// Codec name (e.g. `"aac"`, `"mp3"`).
    pub codec: String,
}
