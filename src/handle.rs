//! Background conversions with a progress channel.
//!
//! [`start_conversion`] runs a [`TranscodeSession`](crate::TranscodeSession)
//! on a dedicated worker thread and hands back a [`ConversionHandle`]. The
//! session only ever sees a callback that forwards into a channel; the
//! caller drains [`ConversionEvent`]s on whatever thread renders them.
//!
//! # Example
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
//!     TargetFormat::Mp4,
//!     0.8,
//!     ConvertOptions::new(),
//! )?;
//!
//! for event in handle.iter() {
//!     match event {
//!         ConversionEvent::Progress(sample) => println!("{}%", sample.percentage()),
//!         ConversionEvent::Finished(outcome) => println!("{outcome:?}"),
//!     }
//! }
//! # }
//! # Ok::<(), recast::RecastError>(())
//! ```

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::ConvertOptions;
use crate::engine::Engine;
use crate::error::RecastError;
use crate::format::{Quality, TargetFormat};
use crate::progress::{CancellationToken, ProgressCallback, ProgressSample};
use crate::request::ConversionRequest;
use crate::session::{SessionOutcome, transcode};

static NEXT_CONVERSION_ID: AtomicU64 = AtomicU64::new(1);

/// Something that happened to a background conversion.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversionEvent {
    /// A new progress sample.
    Progress(ProgressSample),
    /// The conversion ended. Always the last event.
    Finished(ConversionOutcome),
}

/// Terminal outcome of a background conversion, in a form a UI can show.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversionOutcome {
    /// Every frame was converted.
    Completed {
        /// Frames encoded.
        frames: u64,
    },
    /// The conversion was cancelled.
    Cancelled {
        /// Frames encoded before stopping.
        frames: u64,
        /// Completion ratio reached.
        ratio: f64,
    },
    /// The conversion failed.
    Failed {
        /// Human-readable reason.
        reason: String,
    },
}

impl From<&Result<SessionOutcome, RecastError>> for ConversionOutcome {
    fn from(result: &Result<SessionOutcome, RecastError>) -> Self {
        match result {
            Ok(SessionOutcome::Completed { frames }) => ConversionOutcome::Completed { frames: *frames },
            Ok(SessionOutcome::Cancelled { frames, ratio }) => ConversionOutcome::Cancelled {
                frames: *frames,
                ratio: *ratio,
            },
            Err(error) => ConversionOutcome::Failed {
                reason: error.to_string(),
            },
        }
    }
}

/// Forwards samples into the event channel, then to the caller's own
/// callback.
struct ChannelProgress {
    sender: Sender<ConversionEvent>,
    inner: Arc<dyn ProgressCallback>,
}

impl ProgressCallback for ChannelProgress {
    fn on_progress(&self, sample: &ProgressSample) {
        // The receiver may be gone; the conversion carries on regardless.
        let _ = self.sender.send(ConversionEvent::Progress(sample.clone()));
        self.inner.on_progress(sample);
    }
}

/// A conversion running on its own worker thread.
///
/// Dropping the handle without calling [`wait`](ConversionHandle::wait)
/// cancels the conversion; the worker still releases its resources.
pub struct ConversionHandle {
    id: u64,
    output_path: PathBuf,
    token: CancellationToken,
    events: Receiver<ConversionEvent>,
    worker: Option<JoinHandle<Result<SessionOutcome, RecastError>>>,
}

impl ConversionHandle {
    /// Process-unique identifier of this conversion.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Where the output is being written.
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Request cancellation. Takes effect between frames.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// A clone of the cancellation token, for cancelling from elsewhere.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// `true` once the worker thread has returned.
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().is_none_or(|worker| worker.is_finished())
    }

    /// Block until the next event. `None` once every event was received.
    pub fn recv(&self) -> Option<ConversionEvent> {
        self.events.recv().ok()
    }

    /// Return the next event if one is ready.
    pub fn try_recv(&self) -> Option<ConversionEvent> {
        match self.events.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Wait up to `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ConversionEvent> {
        match self.events.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Iterate over events until the conversion finishes.
    pub fn iter(&self) -> impl Iterator<Item = ConversionEvent> + '_ {
        self.events.iter()
    }

    /// Wait for the worker and return the session's full result.
    ///
    /// # Errors
    ///
    /// The session's error, or [`RecastError::WorkerPanicked`].
    pub fn wait(mut self) -> Result<SessionOutcome, RecastError> {
        let Some(worker) = self.worker.take() else {
            return Err(RecastError::WorkerPanicked(
                "worker already joined".to_string(),
            ));
        };
        worker
            .join()
            .map_err(|payload| RecastError::WorkerPanicked(panic_message(payload)))?
    }
}

impl Drop for ConversionHandle {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.token.cancel();
        }
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Start converting `input` into `output_directory` on a worker thread.
///
/// The output is named `<input-stem>_converted.<extension>`.
///
/// # Errors
///
/// - [`RecastError::InvalidQuality`] if `quality` is outside `[0, 1]`.
/// - [`RecastError::InvalidRequest`] if the input has no file name.
/// - [`RecastError::IoError`] if the worker thread cannot be spawned.
///
/// Conversion failures arrive as [`ConversionOutcome::Failed`] and from
/// [`ConversionHandle::wait`].
pub fn start_conversion<E, P1, P2>(
    engine: E,
    input: P1,
    output_directory: P2,
    target_format: TargetFormat,
    quality: f32,
    options: ConvertOptions,
) -> Result<ConversionHandle, RecastError>
where
    E: Engine + Send + 'static,
    P1: AsRef<Path>,
    P2: AsRef<Path>,
{
    let quality = Quality::new(quality)?;
    let request =
        ConversionRequest::into_directory(input, output_directory, target_format, quality)?;
    spawn_conversion(engine, request, options)
}

/// Run an already-built request on a worker thread.
///
/// # Errors
///
/// [`RecastError::IoError`] if the worker thread cannot be spawned.
pub fn spawn_conversion<E>(
    engine: E,
    request: ConversionRequest,
    options: ConvertOptions,
) -> Result<ConversionHandle, RecastError>
where
    E: Engine + Send + 'static,
{
    let id = NEXT_CONVERSION_ID.fetch_add(1, Ordering::Relaxed);
    let token = options.cancellation.clone().unwrap_or_default();
    let output_path = request.output_path().to_path_buf();
    let (sender, events) = mpsc::channel();

    let forward = ChannelProgress {
        sender: sender.clone(),
        inner: options.progress.clone(),
    };
    let options = options
        .with_cancellation(token.clone())
        .with_progress(Arc::new(forward));

    log::debug!("Spawning conversion {id} for {}", output_path.display());
    let worker = thread::Builder::new()
        .name(format!("recast-{id}"))
        .spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                transcode(engine, request, options)
            }))
            .unwrap_or_else(|payload| Err(RecastError::WorkerPanicked(panic_message(payload))));
            let _ = sender.send(ConversionEvent::Finished(ConversionOutcome::from(&result)));
            result
        })?;

    Ok(ConversionHandle {
        id,
        output_path,
        token,
        events,
        worker: Some(worker),
    })
}
