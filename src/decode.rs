//! FFmpeg demuxing and decoding.
//!
//! [`FfmpegSource`] opens a container, picks the best video and audio
//! streams, and yields decoded [`MediaFrame`]s in packet order. Decoding is
//! pull-based: each [`next_frame`](Source::next_frame) call drains what the
//! decoders already hold, then reads packets until one of them produces a
//! frame.

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};
use std::time::Duration;

use ffmpeg_next::codec::context::Context as CodecContext;
use ffmpeg_next::decoder::{Audio as AudioDecoder, Video as VideoDecoder};
use ffmpeg_next::error::EAGAIN;
use ffmpeg_next::format::context::Input;
use ffmpeg_next::format::stream::{Disposition, Stream};
use ffmpeg_next::frame::{Audio as AudioFrame, Video as VideoFrame};
use ffmpeg_next::media::Type;
use ffmpeg_next::{Error as FfmpegError, Packet, Rational};

use crate::conversion::{container_duration, pts_to_position, pts_to_seconds};
use crate::engine::{Frame, Source};
use crate::error::EngineError;
use crate::metadata::{AudioMetadata, StreamMetadata, VideoMetadata};
use crate::parameters::FALLBACK_FRAMES_PER_SECOND;

/// `AV_NOPTS_VALUE`.
const NO_PTS: i64 = i64::MIN;

/// A decoded FFmpeg frame together with its stream position.
pub enum MediaFrame {
    /// A decoded picture.
    Video {
        /// The raw frame, in the decoder's pixel format.
        frame: VideoFrame,
        /// Position relative to the stream start.
        timestamp: Duration,
    },
    /// A block of decoded audio samples.
    Audio {
        /// The raw frame, in the decoder's sample format.
        frame: AudioFrame,
        /// Position relative to the stream start.
        timestamp: Duration,
    },
}

impl Frame for MediaFrame {
    fn timestamp(&self) -> Duration {
        match self {
            MediaFrame::Video { timestamp, .. } | MediaFrame::Audio { timestamp, .. } => *timestamp,
        }
    }
}

impl Debug for MediaFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            MediaFrame::Video { frame, timestamp } => f
                .debug_struct("Video")
                .field("width", &frame.width())
                .field("height", &frame.height())
                .field("timestamp", timestamp)
                .finish(),
            MediaFrame::Audio { frame, timestamp } => f
                .debug_struct("Audio")
                .field("samples", &frame.samples())
                .field("rate", &frame.rate())
                .field("timestamp", timestamp)
                .finish(),
        }
    }
}

struct VideoTrack {
    index: usize,
    decoder: VideoDecoder,
    time_base: Rational,
    start: Option<i64>,
    frames_per_second: f64,
    frames: u64,
}

impl VideoTrack {
    fn open(stream: &Stream) -> Result<Self, EngineError> {
        let decoder = CodecContext::from_parameters(stream.parameters())?
            .decoder()
            .video()?;

        let frame_rate = stream.avg_frame_rate();
        let frames_per_second = if frame_rate.denominator() != 0 && frame_rate.numerator() > 0 {
            frame_rate.numerator() as f64 / frame_rate.denominator() as f64
        } else {
            let rate = stream.rate();
            if rate.denominator() != 0 && rate.numerator() > 0 {
                rate.numerator() as f64 / rate.denominator() as f64
            } else {
                0.0
            }
        };

        Ok(Self {
            index: stream.index(),
            decoder,
            time_base: stream.time_base(),
            start: start_time(stream),
            frames_per_second,
            frames: 0,
        })
    }

    fn metadata(&self) -> VideoMetadata {
        VideoMetadata {
            width: self.decoder.width(),
            height: self.decoder.height(),
            frames_per_second: self.frames_per_second,
            codec: codec_name(&self.decoder),
        }
    }

    fn receive(&mut self) -> Result<Option<MediaFrame>, EngineError> {
        let mut frame = VideoFrame::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => {
                let timestamp = match frame.timestamp().or(frame.pts()) {
                    Some(pts) => pts_to_position(pts, self.start, self.time_base),
                    None => {
                        let rate = if self.frames_per_second > 0.0 {
                            self.frames_per_second
                        } else {
                            FALLBACK_FRAMES_PER_SECOND
                        };
                        Duration::from_secs_f64(self.frames as f64 / rate)
                    }
                };
                self.frames += 1;
                Ok(Some(MediaFrame::Video { frame, timestamp }))
            }
            Err(error) if is_drained(&error) => Ok(None),
            Err(error) => Err(error.into()),
        }
    }
}

struct AudioTrack {
    index: usize,
    decoder: AudioDecoder,
    time_base: Rational,
    start: Option<i64>,
    samples: u64,
}

impl AudioTrack {
    fn open(stream: &Stream) -> Result<Self, EngineError> {
        let decoder = CodecContext::from_parameters(stream.parameters())?
            .decoder()
            .audio()?;

        Ok(Self {
            index: stream.index(),
            decoder,
            time_base: stream.time_base(),
            start: start_time(stream),
            samples: 0,
        })
    }

    fn metadata(&self) -> AudioMetadata {
        AudioMetadata {
            sample_rate: self.decoder.rate(),
            channels: self.decoder.channels(),
            codec: codec_name(&self.decoder),
        }
    }

    fn receive(&mut self) -> Result<Option<MediaFrame>, EngineError> {
        let mut frame = AudioFrame::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => {
                let timestamp = match frame.timestamp().or(frame.pts()) {
                    Some(pts) => pts_to_position(pts, self.start, self.time_base),
                    None if frame.rate() > 0 => {
                        Duration::from_secs_f64(self.samples as f64 / frame.rate() as f64)
                    }
                    None => Duration::ZERO,
                };
                self.samples += frame.samples() as u64;
                Ok(Some(MediaFrame::Audio { frame, timestamp }))
            }
            Err(error) if is_drained(&error) => Ok(None),
            Err(error) => Err(error.into()),
        }
    }
}

/// An FFmpeg demuxer with one decoder per selected stream.
pub struct FfmpegSource {
    path: PathBuf,
    input: Option<Input>,
    metadata: StreamMetadata,
    video: Option<VideoTrack>,
    audio: Option<AudioTrack>,
    eof_sent: bool,
}

impl Debug for FfmpegSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("FfmpegSource")
            .field("path", &self.path)
            .field("metadata", &self.metadata)
            .field("open", &self.input.is_some())
            .field("eof_sent", &self.eof_sent)
            .finish_non_exhaustive()
    }
}

impl FfmpegSource {
    /// Open `path` and prepare decoders for its best video and audio
    /// streams. Attached pictures (cover art) do not count as video.
    pub(crate) fn open(path: &Path) -> Result<Self, EngineError> {
        log::debug!("Opening source {}", path.display());
        let input = ffmpeg_next::format::input(&path)?;

        let video = match input
            .streams()
            .best(Type::Video)
            .filter(|stream| !stream.disposition().contains(Disposition::ATTACHED_PIC))
        {
            Some(stream) => Some(VideoTrack::open(&stream)?),
            None => None,
        };
        let audio = match input.streams().best(Type::Audio) {
            Some(stream) => Some(AudioTrack::open(&stream)?),
            None => None,
        };

        let mut duration = container_duration(input.duration());
        if duration.is_zero() {
            duration = longest_stream_duration(&input);
        }

        let metadata = StreamMetadata {
            duration,
            format: input.format().name().to_string(),
            video: video.as_ref().map(VideoTrack::metadata),
            audio: audio.as_ref().map(AudioTrack::metadata),
        };
        log::debug!("Opened {}: {metadata:?}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            input: Some(input),
            metadata,
            video,
            audio,
            eof_sent: false,
        })
    }
}

impl Source for FfmpegSource {
    type Frame = MediaFrame;

    fn metadata(&self) -> &StreamMetadata {
        &self.metadata
    }

    fn select_streams(&mut self, video: bool, audio: bool) {
        if !video && self.video.take().is_some() {
            log::debug!("Skipping video stream of {}", self.path.display());
        }
        if !audio && self.audio.take().is_some() {
            log::debug!("Skipping audio stream of {}", self.path.display());
        }
    }

    fn next_frame(&mut self) -> Result<Option<MediaFrame>, EngineError> {
        let Self {
            input,
            video,
            audio,
            eof_sent,
            ..
        } = self;
        let Some(input) = input.as_mut() else {
            return Ok(None);
        };

        loop {
            if let Some(track) = video.as_mut()
                && let Some(frame) = track.receive()?
            {
                return Ok(Some(frame));
            }
            if let Some(track) = audio.as_mut()
                && let Some(frame) = track.receive()?
            {
                return Ok(Some(frame));
            }

            if *eof_sent {
                return Ok(None);
            }

            let mut packet = Packet::empty();
            match packet.read(input) {
                Ok(()) => {
                    let stream = packet.stream();
                    if let Some(track) = video.as_mut()
                        && track.index == stream
                    {
                        track.decoder.send_packet(&packet)?;
                    } else if let Some(track) = audio.as_mut()
                        && track.index == stream
                    {
                        track.decoder.send_packet(&packet)?;
                    }
                }
                Err(FfmpegError::Eof) => {
                    if let Some(track) = video.as_mut() {
                        track.decoder.send_eof()?;
                    }
                    if let Some(track) = audio.as_mut() {
                        track.decoder.send_eof()?;
                    }
                    *eof_sent = true;
                }
                Err(error) if is_drained(&error) => {}
                Err(error) => return Err(error.into()),
            }
        }
    }

    fn release(&mut self) -> Result<(), EngineError> {
        self.video = None;
        self.audio = None;
        if self.input.take().is_some() {
            log::debug!("Closed source {}", self.path.display());
        }
        Ok(())
    }
}

fn start_time(stream: &Stream) -> Option<i64> {
    let start = stream.start_time();
    (start != NO_PTS).then_some(start)
}

fn longest_stream_duration(input: &Input) -> Duration {
    input
        .streams()
        .filter(|stream| stream.duration() > 0)
        .map(|stream| pts_to_seconds(stream.duration(), stream.time_base()))
        .filter(|seconds| seconds.is_finite() && *seconds > 0.0)
        .map(Duration::from_secs_f64)
        .max()
        .unwrap_or(Duration::ZERO)
}

fn codec_name(decoder: &CodecContext) -> String {
    decoder
        .codec()
        .map(|codec| codec.name().to_string())
        .unwrap_or_else(|| decoder.id().name().to_string())
}

/// `true` for the errors that only mean "nothing more right now".
fn is_drained(error: &FfmpegError) -> bool {
    match error {
        FfmpegError::Eof => true,
        FfmpegError::Other { errno } => *errno == EAGAIN,
        _ => false,
    }
}
