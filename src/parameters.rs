//! Encoder parameters derived from a request and the source metadata.
//!
//! The derivation is pure so the quality → bitrate mapping and the
//! stream-selection rules can be tested without an engine.

use crate::error::EngineError;
use crate::format::{AudioCodec, Quality, TargetFormat, VideoCodec};
use crate::metadata::StreamMetadata;
use crate::request::ConversionRequest;

/// Video bitrate used by the reference behaviour, in bits per second.
pub const REFERENCE_VIDEO_BIT_RATE: usize = 2_000_000;
/// Audio bitrate used by the reference behaviour, in bits per second.
pub const REFERENCE_AUDIO_BIT_RATE: usize = 192_000;

const VIDEO_BIT_RATE_FLOOR: usize = 500_000;
const VIDEO_BIT_RATE_SPAN: usize = 3_000_000;
const AUDIO_BIT_RATE_FLOOR: usize = 96_000;
const AUDIO_BIT_RATE_SPAN: usize = 192_000;

/// Frame rate assumed when the source does not report one.
pub(crate) const FALLBACK_FRAMES_PER_SECOND: f64 = 25.0;

/// How [`Quality`] turns into encoder bitrates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitrateMapping {
    /// Linear in quality: video `0.5..=3.5` Mb/s, audio `96..=288` kb/s.
    /// Quality `0.5` lands exactly on the reference bitrates.
    #[default]
    Scaled,
    /// The reference constants (2 Mb/s video, 192 kb/s audio) whatever the
    /// quality.
    Fixed,
}

impl BitrateMapping {
    /// Video bitrate for `quality`, in bits per second.
    pub fn video_bit_rate(self, quality: Quality) -> usize {
        match self {
            BitrateMapping::Scaled => {
                VIDEO_BIT_RATE_FLOOR + scale(VIDEO_BIT_RATE_SPAN, quality)
            }
            BitrateMapping::Fixed => REFERENCE_VIDEO_BIT_RATE,
        }
    }

    /// Audio bitrate for `quality`, in bits per second.
    pub fn audio_bit_rate(self, quality: Quality) -> usize {
        match self {
            BitrateMapping::Scaled => {
                AUDIO_BIT_RATE_FLOOR + scale(AUDIO_BIT_RATE_SPAN, quality)
            }
            BitrateMapping::Fixed => REFERENCE_AUDIO_BIT_RATE,
        }
    }
}

fn scale(span: usize, quality: Quality) -> usize {
    (span as f64 * f64::from(quality.value())).round() as usize
}

/// Everything an engine needs to open a sink.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodingParameters {
    /// Target format (decides the muxer).
    pub format: TargetFormat,
    /// Video encoder settings; `None` for audio-only output or a source
    /// without video.
    pub video: Option<VideoParameters>,
    /// Audio encoder settings; `None` when the source has no audio.
    pub audio: Option<AudioParameters>,
}

/// Video encoder settings.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoParameters {
    /// Codec to encode with.
    pub codec: VideoCodec,
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Output frame rate.
    pub frames_per_second: f64,
    /// Target bitrate in bits per second.
    pub bit_rate: usize,
}

/// Audio encoder settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioParameters {
    /// Codec to encode with.
    pub codec: AudioCodec,
    /// Sample rate in hertz (the engine may adjust to a rate the codec
    /// supports).
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u16,
    /// Target bitrate in bits per second; `None` for lossless PCM.
    pub bit_rate: Option<usize>,
}

impl EncodingParameters {
    /// Derive encoder settings for `request` from the source `metadata`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Unsupported`] when the target format has no
    /// stream the source can feed (e.g. `mp3` from a silent video).
    pub fn derive(
        request: &ConversionRequest,
        metadata: &StreamMetadata,
        mapping: BitrateMapping,
    ) -> Result<Self, EngineError> {
        let format = request.target_format();
        let quality = request.quality();

        let video = match (format.video_codec(), &metadata.video) {
            (Some(codec), Some(source)) => Some(VideoParameters {
                codec,
                width: even(source.width),
                height: even(source.height),
                frames_per_second: if source.frames_per_second > 0.0 {
                    source.frames_per_second
                } else {
                    FALLBACK_FRAMES_PER_SECOND
                },
                bit_rate: mapping.video_bit_rate(quality),
            }),
            _ => None,
        };

        let audio = metadata.audio.as_ref().map(|source| {
            let codec = format.audio_codec();
            AudioParameters {
                codec,
                sample_rate: source.sample_rate,
                channels: source.channels.clamp(1, codec.max_channels()),
                bit_rate: (!codec.is_lossless()).then(|| mapping.audio_bit_rate(quality)),
            }
        });

        if video.is_none() && audio.is_none() {
            return Err(EngineError::Unsupported(format!(
                "source has no stream that {format} can carry"
            )));
        }

        log::debug!(
            "Derived encoding parameters for {format}: video={video:?} audio={audio:?}"
        );

        Ok(Self {
            format,
            video,
            audio,
        })
    }
}

/// H.264 with 4:2:0 chroma needs even dimensions.
fn even(value: u32) -> u32 {
    (value & !1).max(2)
}
