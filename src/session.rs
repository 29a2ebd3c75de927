//! The transcode session: one conversion, start to finish.
//!
//! A [`TranscodeSession`] opens the engine's source and sink, pumps frames
//! from one to the other in stream order, reports throttled progress,
//! polls the cancellation token between frames, and releases both handles
//! (sink first, then source) on every exit path.
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "ffmpeg")]
//! # {
//! use recast::{
//!     ConversionRequest, ConvertOptions, FfmpegEngine, Quality, SessionOutcome, TargetFormat,
//!     TranscodeSession,
//! };
//!
//! let request = ConversionRequest::into_directory(
//!     "clip.mov", "out", TargetFormat::Mp4, Quality::new(0.8)?,
//! )?;
//! let mut session = TranscodeSession::new(FfmpegEngine::new(), request, ConvertOptions::new());
//! match session.run()? {
//!     SessionOutcome::Completed { frames } => println!("done, {frames} frames"),
//!     SessionOutcome::Cancelled { .. } => println!("cancelled"),
//! }
//! # }
//! # Ok::<(), recast::RecastError>(())
//! ```

use std::fs;
use std::io::ErrorKind;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use crate::config::{ConvertOptions, PartialOutput};
use crate::engine::{Engine, Frame, Sink, Source};
use crate::error::{EngineError, RecastError};
use crate::parameters::EncodingParameters;
use crate::progress::ProgressTracker;
use crate::request::ConversionRequest;

/// Lifecycle of a session. Transitions only move forward:
/// `Idle → Running → {Completed | Failed | Cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, not yet run.
    Idle,
    /// The frame loop is in progress.
    Running,
    /// Every frame was converted and the output finalised.
    Completed,
    /// Opening, converting, or releasing failed.
    Failed,
    /// Stopped early by the cancellation token.
    Cancelled,
}

impl SessionState {
    /// `true` for the three terminal states.
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::Cancelled
        )
    }
}

/// How a session that did not fail ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    /// The whole source was converted.
    Completed {
        /// Frames encoded.
        frames: u64,
    },
    /// The cancellation token stopped the conversion.
    Cancelled {
        /// Frames encoded before the loop stopped.
        frames: u64,
        /// Completion ratio reached.
        ratio: f64,
    },
}

enum LoopEnd {
    Exhausted,
    Cancelled,
}

/// One conversion of one [`ConversionRequest`].
///
/// A session runs once. Calling [`run`](TranscodeSession::run) again returns
/// [`RecastError::SessionReused`]; start a new session for a new request.
pub struct TranscodeSession<E: Engine> {
    engine: E,
    request: ConversionRequest,
    options: ConvertOptions,
    state: SessionState,
}

impl<E: Engine> TranscodeSession<E> {
    /// Create an idle session.
    pub fn new(engine: E, request: ConversionRequest, options: ConvertOptions) -> Self {
        Self {
            engine,
            request,
            options,
            state: SessionState::Idle,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The request this session converts.
    pub fn request(&self) -> &ConversionRequest {
        &self.request
    }

    /// Give the engine back.
    pub fn into_engine(self) -> E {
        self.engine
    }

    /// Run the conversion to its end.
    ///
    /// Progress goes to the callback configured in [`ConvertOptions`]; on
    /// success the last sample always has ratio `1.0`.
    ///
    /// # Errors
    ///
    /// - [`RecastError::SessionReused`] if this session already ran.
    /// - [`RecastError::OpenSource`] / [`RecastError::OpenDestination`] if
    ///   the engine cannot open either end. No frame is processed.
    /// - [`RecastError::Transcode`] if a frame fails to decode or encode.
    /// - [`RecastError::Cleanup`] if the loop ended cleanly but releasing a
    ///   handle failed.
    ///
    /// # Panics
    ///
    /// A panic from the progress callback or the engine is propagated after
    /// both handles are released and the session is marked
    /// [`SessionState::Failed`].
    pub fn run(&mut self) -> Result<SessionOutcome, RecastError> {
        if self.state != SessionState::Idle {
            return Err(RecastError::SessionReused(self.state));
        }
        self.state = SessionState::Running;
        log::info!(
            "Converting {:?} to {:?} ({}, quality {:.2})",
            self.request.input_path(),
            self.request.output_path(),
            self.request.target_format(),
            self.request.quality().value(),
        );

        let result = match panic::catch_unwind(AssertUnwindSafe(|| self.convert())) {
            Ok(result) => result,
            Err(payload) => {
                self.state = SessionState::Failed;
                log::error!("Conversion panicked; engine handles were released");
                panic::resume_unwind(payload);
            }
        };

        self.state = match &result {
            Ok(SessionOutcome::Completed { .. }) => SessionState::Completed,
            Ok(SessionOutcome::Cancelled { .. }) => SessionState::Cancelled,
            Err(_) => SessionState::Failed,
        };
        match &result {
            Ok(outcome) => log::info!("Conversion finished: {outcome:?}"),
            Err(error) => log::error!("Conversion failed: {error}"),
        }
        result
    }

    fn convert(&mut self) -> Result<SessionOutcome, RecastError> {
        let Self {
            engine,
            request,
            options,
            ..
        } = self;

        let input = request.input_path();
        let output = request.output_path();

        let mut source = engine
            .open_source(input)
            .map_err(|error| open_source_error(input, error))?;
        let metadata = source.metadata().clone();
        log::debug!("Source metadata: {metadata:?}");
        if metadata.is_empty() {
            release_after_failed_open(&mut source);
            return Err(open_source_error(input, EngineError::NoStreams));
        }

        let parameters = match EncodingParameters::derive(request, &metadata, options.bitrate_mapping)
        {
            Ok(parameters) => parameters,
            Err(error) => {
                release_after_failed_open(&mut source);
                return Err(open_destination_error(output, error));
            }
        };
        source.select_streams(parameters.video.is_some(), parameters.audio.is_some());

        let sink = match engine.open_sink(output, &parameters) {
            Ok(sink) => sink,
            Err(error) => {
                // Nothing was written, so there is no partial output to discard.
                release_after_failed_open(&mut source);
                return Err(open_destination_error(output, error));
            }
        };

        if !metadata.has_known_duration() {
            log::warn!("{} reports no duration; progress will be approximate", input.display());
        }

        let mut tracker = ProgressTracker::new(
            options.progress.clone(),
            metadata.duration,
            options.batch_size,
        );
        let mut written = 0_u64;
        let mut handles = OpenHandles {
            source,
            sink,
            output,
            partial_output: options.partial_output,
            released: false,
        };
        let pumped = pump(
            &mut handles.source,
            &mut handles.sink,
            &mut tracker,
            &mut written,
            options,
        );
        let cleanup = handles.release();

        match (pumped, cleanup) {
            (Err(error), cleanup) => {
                if let Some(cleanup) = cleanup {
                    log::warn!("{cleanup} (after earlier failure)");
                }
                discard_partial_output(output, options.partial_output);
                Err(error)
            }
            (Ok(_), Some(cleanup)) => {
                discard_partial_output(output, options.partial_output);
                Err(cleanup)
            }
            (Ok(LoopEnd::Exhausted), None) => {
                log::debug!("Pulled {} frames, encoded {written}", tracker.frames());
                tracker.finish();
                Ok(SessionOutcome::Completed { frames: written })
            }
            (Ok(LoopEnd::Cancelled), None) => {
                discard_partial_output(output, options.partial_output);
                Ok(SessionOutcome::Cancelled {
                    frames: written,
                    ratio: tracker.current_ratio(),
                })
            }
        }
    }
}

/// Convert `request` in a fresh session.
///
/// # Errors
///
/// Same as [`TranscodeSession::run`].
pub fn transcode<E: Engine>(
    engine: E,
    request: ConversionRequest,
    options: ConvertOptions,
) -> Result<SessionOutcome, RecastError> {
    TranscodeSession::new(engine, request, options).run()
}

fn pump<S, K>(
    source: &mut S,
    sink: &mut K,
    tracker: &mut ProgressTracker,
    written: &mut u64,
    options: &ConvertOptions,
) -> Result<LoopEnd, RecastError>
where
    S: Source,
    K: Sink<Frame = S::Frame>,
{
    if options.is_cancelled() {
        return Ok(LoopEnd::Cancelled);
    }

    loop {
        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(LoopEnd::Exhausted),
            Err(error) => return Err(transcode_error("decode", error, tracker, *written)),
        };

        tracker.advance(frame.timestamp());

        sink.push(frame)
            .map_err(|error| transcode_error("encode", error, tracker, *written))?;
        *written += 1;

        if options.is_cancelled() {
            log::info!("Conversion cancelled after {written} frames");
            return Ok(LoopEnd::Cancelled);
        }
    }
}

/// Source and sink of a conversion past the open phase.
///
/// Dropping it without calling [`release`](OpenHandles::release), which only
/// happens while unwinding, still releases both ends and applies the
/// partial output policy.
struct OpenHandles<'a, S: Source, K: Sink> {
    source: S,
    sink: K,
    output: &'a Path,
    partial_output: PartialOutput,
    released: bool,
}

impl<S: Source, K: Sink> OpenHandles<'_, S, K> {
    fn release(&mut self) -> Option<RecastError> {
        self.released = true;
        release(&mut self.sink, &mut self.source)
    }
}

impl<S: Source, K: Sink> Drop for OpenHandles<'_, S, K> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        log::warn!("Releasing engine handles while unwinding");
        if let Some(error) = self.release() {
            log::warn!("{error} (while unwinding)");
        }
        discard_partial_output(self.output, self.partial_output);
    }
}

/// Release the sink, then the source. Both are attempted; the first
/// failure is returned.
fn release<S: Source, K: Sink>(sink: &mut K, source: &mut S) -> Option<RecastError> {
    let mut first = None;

    if let Err(error) = sink.release() {
        log::warn!("Failed to release sink: {error}");
        first = Some(cleanup_error("sink", error));
    }
    if let Err(error) = source.release() {
        log::warn!("Failed to release source: {error}");
        if first.is_none() {
            first = Some(cleanup_error("source", error));
        }
    }

    first
}

fn release_after_failed_open<S: Source>(source: &mut S) {
    if let Err(error) = source.release() {
        log::warn!("Failed to release source after failed open: {error}");
    }
}

fn discard_partial_output(path: &Path, policy: PartialOutput) {
    if policy == PartialOutput::Keep {
        return;
    }
    match fs::remove_file(path) {
        Ok(()) => log::info!("Removed partial output {}", path.display()),
        Err(error) if error.kind() == ErrorKind::NotFound => {}
        Err(error) => log::warn!("Could not remove partial output {}: {error}", path.display()),
    }
}

fn open_source_error(path: &Path, error: EngineError) -> RecastError {
    RecastError::OpenSource {
        path: path.to_path_buf(),
        reason: error.to_string(),
    }
}

fn open_destination_error(path: &Path, error: EngineError) -> RecastError {
    RecastError::OpenDestination {
        path: path.to_path_buf(),
        reason: error.to_string(),
    }
}

fn transcode_error(
    stage: &str,
    error: EngineError,
    tracker: &ProgressTracker,
    written: u64,
) -> RecastError {
    RecastError::Transcode {
        reason: format!("{stage} failed: {error}"),
        ratio: tracker.current_ratio(),
        frames: written,
    }
}

fn cleanup_error(resource: &'static str, error: EngineError) -> RecastError {
    RecastError::Cleanup {
        resource,
        reason: error.to_string(),
    }
}
