//! Target formats, codecs, and the quality knob.
//!
//! [`TargetFormat`] enumerates the containers a conversion can produce and
//! fixes the codec pair each one carries. [`Quality`] is the normalised
//! `0.0..=1.0` setting that [`BitrateMapping`](crate::BitrateMapping)
//! turns into encoder bitrates.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use crate::error::RecastError;

/// Output container/format.
///
/// The four video containers carry H.264 video and AAC audio; `Mp3` and
/// `Wav` are audio-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetFormat {
    /// MPEG-4 Part 14.
    Mp4,
    /// Audio Video Interleave.
    Avi,
    /// Matroska.
    Mkv,
    /// QuickTime.
    Mov,
    /// MPEG Audio Layer III. Requires libmp3lame.
    Mp3,
    /// WAV (PCM signed 16-bit little-endian).
    Wav,
}

/// Video codecs the crate can request from an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    /// H.264 / AVC.
    H264,
}

/// Audio codecs the crate can request from an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioCodec {
    /// Advanced Audio Coding.
    Aac,
    /// MPEG Audio Layer III.
    Mp3,
    /// Uncompressed PCM, signed 16-bit little-endian.
    PcmS16le,
}

impl AudioCodec {
    /// Largest channel count the encoder accepts.
    pub fn max_channels(self) -> u16 {
        match self {
            AudioCodec::Mp3 => 2,
            AudioCodec::Aac | AudioCodec::PcmS16le => 8,
        }
    }

    /// `true` for codecs whose bitrate follows from sample format and rate.
    pub fn is_lossless(self) -> bool {
        matches!(self, AudioCodec::PcmS16le)
    }
}

impl TargetFormat {
    /// Every supported target, in display order.
    pub const ALL: [TargetFormat; 6] = [
        TargetFormat::Mp4,
        TargetFormat::Avi,
        TargetFormat::Mkv,
        TargetFormat::Mov,
        TargetFormat::Mp3,
        TargetFormat::Wav,
    ];

    /// File extension, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            TargetFormat::Mp4 => "mp4",
            TargetFormat::Avi => "avi",
            TargetFormat::Mkv => "mkv",
            TargetFormat::Mov => "mov",
            TargetFormat::Mp3 => "mp3",
            TargetFormat::Wav => "wav",
        }
    }

    /// FFmpeg muxer name for this format.
    pub fn muxer_name(self) -> &'static str {
        match self {
            TargetFormat::Mkv => "matroska",
            other => other.extension(),
        }
    }

    /// Video codec written by this format, if it carries video.
    pub fn video_codec(self) -> Option<VideoCodec> {
        match self {
            TargetFormat::Mp4 | TargetFormat::Avi | TargetFormat::Mkv | TargetFormat::Mov => {
                Some(VideoCodec::H264)
            }
            TargetFormat::Mp3 | TargetFormat::Wav => None,
        }
    }

    /// Audio codec written by this format.
    pub fn audio_codec(self) -> AudioCodec {
        match self {
            TargetFormat::Mp3 => AudioCodec::Mp3,
            TargetFormat::Wav => AudioCodec::PcmS16le,
            _ => AudioCodec::Aac,
        }
    }

    /// `true` when the output carries no video stream.
    pub fn is_audio_only(self) -> bool {
        self.video_codec().is_none()
    }
}

impl Display for TargetFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.extension().to_ascii_uppercase())
    }
}

impl FromStr for TargetFormat {
    type Err = RecastError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "mp4" => Ok(TargetFormat::Mp4),
            "avi" => Ok(TargetFormat::Avi),
            "mkv" | "matroska" => Ok(TargetFormat::Mkv),
            "mov" => Ok(TargetFormat::Mov),
            "mp3" => Ok(TargetFormat::Mp3),
            "wav" => Ok(TargetFormat::Wav),
            _ => Err(RecastError::UnsupportedFormat(value.to_string())),
        }
    }
}

/// Normalised output quality in `[0, 1]`.
///
/// Higher is better. Constructed through [`Quality::new`], which rejects
/// anything outside the range (including NaN).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Quality(f32);

impl Quality {
    /// Lowest quality.
    pub const MIN: Quality = Quality(0.0);
    /// Highest quality.
    pub const MAX: Quality = Quality(1.0);

    /// Validate and wrap a quality value.
    ///
    /// # Errors
    ///
    /// Returns [`RecastError::InvalidQuality`] if `value` is outside `[0, 1]`.
    pub fn new(value: f32) -> Result<Self, RecastError> {
        if (0.0..=1.0).contains(&value) {
            Ok(Quality(value))
        } else {
            Err(RecastError::InvalidQuality(value))
        }
    }

    /// The wrapped value.
    pub fn value(self) -> f32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Quality(0.8)
    }
}

impl TryFrom<f32> for Quality {
    type Error = RecastError;

    fn try_from(value: f32) -> Result<Self, Self::Error> {
        Quality::new(value)
    }
}
