//! FFmpeg encoding and muxing.
//!
//! [`FfmpegSink`] creates the destination container and one encoder per
//! stream described by the [`EncodingParameters`]. Video frames are scaled
//! to YUV 4:2:0 and encoded as H.264. Audio frames are resampled to the
//! encoder's preferred sample format and buffered until a full encoder
//! frame is available, since AAC and MP3 only accept fixed-size frames.

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ffmpeg_next::codec::context::Context as CodecContext;
use ffmpeg_next::codec::{Capabilities, Id};
use ffmpeg_next::encoder::{Audio as AudioEncoder, Video as VideoEncoder};
use ffmpeg_next::format::context::Output;
use ffmpeg_next::format::{Flags as FormatFlags, Pixel, Sample, sample::Type as SampleType};
use ffmpeg_next::frame::{Audio as AudioFrame, Video as VideoFrame};
use ffmpeg_next::software::resampling::Context as ResamplingContext;
use ffmpeg_next::software::scaling::{Context as ScalingContext, Flags as ScalingFlags};
use ffmpeg_next::{ChannelLayout, Packet, Rational};

use crate::conversion::seconds_to_pts;
use crate::decode::MediaFrame;
use crate::engine::Sink;
use crate::error::EngineError;
use crate::format::{AudioCodec, VideoCodec};
use crate::parameters::{AudioParameters, EncodingParameters, VideoParameters};

/// Chunk size for encoders that accept any number of samples per frame.
const VARIABLE_CHUNK_SAMPLES: usize = 1024;

fn video_codec_id(codec: VideoCodec) -> Id {
    match codec {
        VideoCodec::H264 => Id::H264,
    }
}

fn audio_codec_id(codec: AudioCodec) -> Id {
    match codec {
        AudioCodec::Aac => Id::AAC,
        AudioCodec::Mp3 => Id::MP3,
        AudioCodec::PcmS16le => Id::PCM_S16LE,
    }
}

/// Set `AV_CODEC_FLAG_GLOBAL_HEADER` on an encoder that is not open yet.
fn set_global_header(context: &mut CodecContext) {
    unsafe {
        (*context.as_mut_ptr()).flags |= ffmpeg_sys_next::AV_CODEC_FLAG_GLOBAL_HEADER as i32;
    }
}

struct VideoStage {
    stream_index: usize,
    encoder: VideoEncoder,
    time_base: Rational,
    stream_time_base: Rational,
    width: u32,
    height: u32,
    scaler: Option<ScalingContext>,
    last_pts: Option<i64>,
}

impl VideoStage {
    fn add(
        output: &mut Output,
        parameters: &VideoParameters,
        global_header: bool,
    ) -> Result<Self, EngineError> {
        let id = video_codec_id(parameters.codec);
        let codec = ffmpeg_next::encoder::find(id)
            .ok_or_else(|| EngineError::Unsupported(format!("no encoder for {id:?}")))?;

        let mut stream = output.add_stream(codec)?;
        let stream_index = stream.index();

        let frame_rate = Rational::from(parameters.frames_per_second);
        let time_base = frame_rate.invert();

        let mut context = CodecContext::new_with_codec(codec);
        if global_header {
            set_global_header(&mut context);
        }
        let mut encoder = context.encoder().video()?;
        encoder.set_width(parameters.width);
        encoder.set_height(parameters.height);
        encoder.set_format(Pixel::YUV420P);
        encoder.set_time_base(time_base);
        encoder.set_frame_rate(Some(frame_rate));
        encoder.set_bit_rate(parameters.bit_rate);

        let encoder = encoder
            .open_as(codec)
            .map_err(|error| EngineError::other(format!("cannot open video encoder: {error}")))?;
        stream.set_parameters(&encoder);
        stream.set_time_base(time_base);

        log::debug!(
            "Video stream {stream_index}: {id:?} {}x{} @ {frame_rate}, {} b/s",
            parameters.width,
            parameters.height,
            parameters.bit_rate,
        );

        Ok(Self {
            stream_index,
            encoder,
            time_base,
            stream_time_base: time_base,
            width: parameters.width,
            height: parameters.height,
            scaler: None,
            last_pts: None,
        })
    }

    /// The scaler for `frame`, rebuilt if the decoder's output geometry
    /// changed.
    fn scaler_for(&mut self, frame: &VideoFrame) -> Result<&mut ScalingContext, EngineError> {
        let stale = self.scaler.as_ref().is_none_or(|scaler| {
            let input = scaler.input();
            input.format != frame.format()
                || input.width != frame.width()
                || input.height != frame.height()
        });
        if stale {
            let scaler = ScalingContext::get(
                frame.format(),
                frame.width(),
                frame.height(),
                Pixel::YUV420P,
                self.width,
                self.height,
                ScalingFlags::BILINEAR,
            )
            .map_err(|error| EngineError::other(format!("cannot create scaler: {error}")))?;
            self.scaler = Some(scaler);
        }
        self.scaler
            .as_mut()
            .ok_or_else(|| EngineError::other("scaler missing"))
    }

    fn encode(
        &mut self,
        frame: &VideoFrame,
        timestamp: Duration,
        output: &mut Output,
    ) -> Result<(), EngineError> {
        let mut scaled = VideoFrame::empty();
        self.scaler_for(frame)?.run(frame, &mut scaled)?;

        // Muxers reject non-increasing timestamps.
        let mut pts = seconds_to_pts(timestamp.as_secs_f64(), self.time_base);
        if let Some(last) = self.last_pts
            && pts <= last
        {
            pts = last + 1;
        }
        self.last_pts = Some(pts);
        scaled.set_pts(Some(pts));

        self.encoder.send_frame(&scaled)?;
        self.write_packets(output)
    }

    fn write_packets(&mut self, output: &mut Output) -> Result<(), EngineError> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.time_base, self.stream_time_base);
            packet.write_interleaved(output)?;
        }
        Ok(())
    }

    fn finish(&mut self, output: &mut Output) -> Result<(), EngineError> {
        self.encoder.send_eof()?;
        self.write_packets(output)
    }
}

/// Planar-aware byte queue of encoder-format samples.
struct SampleFifo {
    planes: Vec<Vec<u8>>,
    bytes_per_sample: usize,
}

impl SampleFifo {
    fn new(format: Sample, channels: usize) -> Self {
        let (planes, bytes_per_sample) = if format.is_planar() {
            (channels, format.bytes())
        } else {
            (1, format.bytes() * channels)
        };
        Self {
            planes: vec![Vec::new(); planes.max(1)],
            bytes_per_sample,
        }
    }

    /// Samples buffered per channel.
    fn len(&self) -> usize {
        self.planes
            .first()
            .map_or(0, |plane| plane.len() / self.bytes_per_sample)
    }

    fn push(&mut self, frame: &AudioFrame) {
        let bytes = frame.samples() * self.bytes_per_sample;
        if bytes == 0 {
            return;
        }
        for (index, plane) in self.planes.iter_mut().enumerate() {
            plane.extend_from_slice(&frame.data(index)[..bytes]);
        }
    }

    /// Move `count` samples into a new frame of `padded` samples. The tail
    /// past `count` is silence.
    fn pop(
        &mut self,
        count: usize,
        padded: usize,
        format: Sample,
        layout: ChannelLayout,
    ) -> AudioFrame {
        let mut frame = AudioFrame::new(format, padded, layout);
        let taken = count * self.bytes_per_sample;
        let total = padded * self.bytes_per_sample;
        for (index, plane) in self.planes.iter_mut().enumerate() {
            let destination = frame.data_mut(index);
            destination[..taken].copy_from_slice(&plane[..taken]);
            destination[taken..total].fill(0);
            plane.drain(..taken);
        }
        frame
    }
}

struct AudioStage {
    stream_index: usize,
    encoder: AudioEncoder,
    time_base: Rational,
    stream_time_base: Rational,
    format: Sample,
    layout: ChannelLayout,
    rate: u32,
    frame_size: usize,
    pad_last_frame: bool,
    resampler: Option<ResamplingContext>,
    fifo: SampleFifo,
    samples_written: i64,
}

impl AudioStage {
    fn add(
        output: &mut Output,
        parameters: &AudioParameters,
        global_header: bool,
    ) -> Result<Self, EngineError> {
        let id = audio_codec_id(parameters.codec);
        let codec = ffmpeg_next::encoder::find(id)
            .ok_or_else(|| EngineError::Unsupported(format!("no encoder for {id:?}")))?;
        let audio_codec = codec.audio()?;

        let format = audio_codec
            .formats()
            .and_then(|mut formats| formats.next())
            .unwrap_or(Sample::I16(SampleType::Packed));
        let rate = supported_rate(audio_codec.rates(), parameters.sample_rate);
        let layout = ChannelLayout::default(i32::from(parameters.channels));
        let time_base = Rational::new(1, rate as i32);

        let mut stream = output.add_stream(codec)?;
        let stream_index = stream.index();

        let mut context = CodecContext::new_with_codec(codec);
        if global_header {
            set_global_header(&mut context);
        }
        let mut encoder = context.encoder().audio()?;
        encoder.set_rate(rate as i32);
        encoder.set_channel_layout(layout);
        encoder.set_format(format);
        encoder.set_time_base(time_base);
        if let Some(bit_rate) = parameters.bit_rate {
            encoder.set_bit_rate(bit_rate);
        }

        let encoder = encoder
            .open_as(codec)
            .map_err(|error| EngineError::other(format!("cannot open audio encoder: {error}")))?;
        stream.set_parameters(&encoder);
        stream.set_time_base(time_base);

        let frame_size = encoder.frame_size() as usize;
        let pad_last_frame = frame_size > 0
            && !codec
                .capabilities()
                .intersects(Capabilities::SMALL_LAST_FRAME | Capabilities::VARIABLE_FRAME_SIZE);

        log::debug!(
            "Audio stream {stream_index}: {id:?} {rate} Hz, {} channels, {format:?}, frame size {frame_size}",
            parameters.channels,
        );

        Ok(Self {
            stream_index,
            encoder,
            time_base,
            stream_time_base: time_base,
            format,
            layout,
            rate,
            frame_size,
            pad_last_frame,
            resampler: None,
            fifo: SampleFifo::new(format, usize::from(parameters.channels)),
            samples_written: 0,
        })
    }

    fn resampler_for(&mut self, frame: &AudioFrame) -> Result<&mut ResamplingContext, EngineError> {
        let stale = self.resampler.as_ref().is_none_or(|resampler| {
            let input = resampler.input();
            input.format != frame.format()
                || input.channel_layout != frame.channel_layout()
                || input.rate != frame.rate()
        });
        if stale {
            let resampler = ResamplingContext::get(
                frame.format(),
                frame.channel_layout(),
                frame.rate(),
                self.format,
                self.layout,
                self.rate,
            )
            .map_err(|error| EngineError::other(format!("cannot create resampler: {error}")))?;
            self.resampler = Some(resampler);
        }
        self.resampler
            .as_mut()
            .ok_or_else(|| EngineError::other("resampler missing"))
    }

    fn encode(&mut self, mut frame: AudioFrame, output: &mut Output) -> Result<(), EngineError> {
        if frame.channel_layout().is_empty() {
            frame.set_channel_layout(ChannelLayout::default(i32::from(frame.channels())));
        }

        let mut resampled = AudioFrame::empty();
        self.resampler_for(&frame)?.run(&frame, &mut resampled)?;
        self.fifo.push(&resampled);
        self.drain(output, false)
    }

    fn chunk_size(&self) -> usize {
        if self.frame_size > 0 {
            self.frame_size
        } else {
            VARIABLE_CHUNK_SAMPLES
        }
    }

    /// Encode buffered samples. Only whole chunks are sent unless `flush`.
    fn drain(&mut self, output: &mut Output, flush: bool) -> Result<(), EngineError> {
        let chunk = self.chunk_size();
        while self.fifo.len() >= chunk || (flush && self.fifo.len() > 0) {
            let count = self.fifo.len().min(chunk);
            let padded = if self.pad_last_frame { chunk } else { count };

            let mut frame = self.fifo.pop(count, padded, self.format, self.layout);
            frame.set_rate(self.rate);
            frame.set_pts(Some(self.samples_written));
            self.samples_written += padded as i64;

            self.encoder.send_frame(&frame)?;
            self.write_packets(output)?;
        }
        Ok(())
    }

    fn write_packets(&mut self, output: &mut Output) -> Result<(), EngineError> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.time_base, self.stream_time_base);
            packet.write_interleaved(output)?;
        }
        Ok(())
    }

    fn finish(&mut self, output: &mut Output) -> Result<(), EngineError> {
        if let Some(resampler) = self.resampler.as_mut() {
            let mut tail = AudioFrame::empty();
            if resampler.flush(&mut tail).is_ok() && tail.samples() > 0 {
                self.fifo.push(&tail);
            }
        }
        self.drain(output, true)?;
        self.encoder.send_eof()?;
        self.write_packets(output)
    }
}

/// `requested` if the encoder supports it, otherwise its closest rate.
fn supported_rate<I: Iterator<Item = i32>>(rates: Option<I>, requested: u32) -> u32 {
    let Some(rates) = rates else {
        return requested;
    };
    rates
        .filter(|rate| *rate > 0)
        .map(|rate| rate as u32)
        .min_by_key(|rate| rate.abs_diff(requested))
        .unwrap_or(requested)
}

/// An FFmpeg muxer with one encoder per output stream.
pub struct FfmpegSink {
    path: PathBuf,
    output: Option<Output>,
    video: Option<VideoStage>,
    audio: Option<AudioStage>,
}

impl Debug for FfmpegSink {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("FfmpegSink")
            .field("path", &self.path)
            .field("open", &self.output.is_some())
            .field("video", &self.video.is_some())
            .field("audio", &self.audio.is_some())
            .finish_non_exhaustive()
    }
}

impl FfmpegSink {
    /// Create `path` and write the container header.
    ///
    /// If anything fails after the file was created, the empty file is
    /// removed again.
    pub(crate) fn create(path: &Path, parameters: &EncodingParameters) -> Result<Self, EngineError> {
        log::debug!(
            "Creating sink {} ({})",
            path.display(),
            parameters.format.muxer_name()
        );
        let mut output = ffmpeg_next::format::output_as(&path, parameters.format.muxer_name())?;

        match configure(&mut output, parameters) {
            Ok((video, audio)) => Ok(Self {
                path: path.to_path_buf(),
                output: Some(output),
                video,
                audio,
            }),
            Err(error) => {
                drop(output);
                if let Err(remove) = fs::remove_file(path) {
                    log::debug!("Could not remove {}: {remove}", path.display());
                }
                Err(error)
            }
        }
    }
}

fn configure(
    output: &mut Output,
    parameters: &EncodingParameters,
) -> Result<(Option<VideoStage>, Option<AudioStage>), EngineError> {
    let global_header = output.format().flags().contains(FormatFlags::GLOBAL_HEADER);

    let mut video = parameters
        .video
        .as_ref()
        .map(|video| VideoStage::add(output, video, global_header))
        .transpose()?;
    let mut audio = parameters
        .audio
        .as_ref()
        .map(|audio| AudioStage::add(output, audio, global_header))
        .transpose()?;

    output
        .write_header()
        .map_err(|error| EngineError::other(format!("cannot write header: {error}")))?;

    // The muxer may pick its own stream time bases while writing the header.
    if let Some(stage) = video.as_mut()
        && let Some(stream) = output.stream(stage.stream_index)
    {
        stage.stream_time_base = stream.time_base();
    }
    if let Some(stage) = audio.as_mut()
        && let Some(stream) = output.stream(stage.stream_index)
    {
        stage.stream_time_base = stream.time_base();
    }

    Ok((video, audio))
}

impl Sink for FfmpegSink {
    type Frame = MediaFrame;

    fn push(&mut self, frame: MediaFrame) -> Result<(), EngineError> {
        let output = self
            .output
            .as_mut()
            .ok_or_else(|| EngineError::other("sink already released"))?;

        match frame {
            MediaFrame::Video { frame, timestamp } => match self.video.as_mut() {
                Some(stage) => stage.encode(&frame, timestamp, output),
                None => Ok(()),
            },
            MediaFrame::Audio { frame, .. } => match self.audio.as_mut() {
                Some(stage) => stage.encode(frame, output),
                None => Ok(()),
            },
        }
    }

    fn release(&mut self) -> Result<(), EngineError> {
        let Some(mut output) = self.output.take() else {
            return Ok(());
        };
        let mut first = None;

        if let Some(mut stage) = self.video.take()
            && let Err(error) = stage.finish(&mut output)
        {
            log::warn!("Flushing video encoder failed: {error}");
            first.get_or_insert(error);
        }
        if let Some(mut stage) = self.audio.take()
            && let Err(error) = stage.finish(&mut output)
        {
            log::warn!("Flushing audio encoder failed: {error}");
            first.get_or_insert(error);
        }
        if let Err(error) = output.write_trailer() {
            log::warn!("Writing trailer failed: {error}");
            first.get_or_insert(EngineError::other(format!("cannot write trailer: {error}")));
        }

        log::debug!("Closed sink {}", self.path.display());
        first.map_or(Ok(()), Err)
    }
}
