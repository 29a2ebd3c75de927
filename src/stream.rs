//! Async conversions.
//!
//! [`ConversionStream`] runs a session on Tokio's blocking pool via
//! `tokio::task::spawn_blocking` and yields [`ConversionEvent`]s as a
//! [`tokio_stream::Stream`]. FFmpeg work never runs on the async workers.
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "ffmpeg")]
//! # mod example {
//! use tokio_stream::StreamExt;
//!
//! use recast::{ConversionEvent, ConvertOptions, FfmpegEngine, RecastError, TargetFormat};
//!
//! # async fn example() -> Result<(), RecastError> {
//! let mut stream = recast::start_conversion_stream(
//!     FfmpegEngine::new(),
//!     "clip.mov",
//!     "out",
//!     TargetFormat::Mkv,
//!     0.8,
//!     ConvertOptions::new(),
//! )?;
//!
//! while let Some(event) = stream.next().await {
//!     if let ConversionEvent::Progress(sample) = event {
//!         println!("{}%", sample.percentage());
//!     }
//! }
//! let outcome = stream.outcome().await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! # }
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_stream::Stream;

use crate::config::ConvertOptions;
use crate::engine::Engine;
use crate::error::RecastError;
use crate::format::{Quality, TargetFormat};
use crate::handle::{ConversionEvent, ConversionOutcome, panic_message};
use crate::progress::{CancellationToken, ProgressCallback, ProgressSample};
use crate::request::ConversionRequest;
use crate::session::{SessionOutcome, transcode};

struct StreamProgress {
    sender: UnboundedSender<ConversionEvent>,
    inner: Arc<dyn ProgressCallback>,
}

impl ProgressCallback for StreamProgress {
    fn on_progress(&self, sample: &ProgressSample) {
        let _ = self.sender.send(ConversionEvent::Progress(sample.clone()));
        self.inner.on_progress(sample);
    }
}

/// A conversion running on the blocking pool, observed as a stream of
/// events.
///
/// The stream ends after [`ConversionEvent::Finished`]. Dropping it before
/// then cancels the conversion.
pub struct ConversionStream {
    output_path: PathBuf,
    token: CancellationToken,
    receiver: UnboundedReceiver<ConversionEvent>,
    handle: Option<JoinHandle<Result<SessionOutcome, RecastError>>>,
}

impl ConversionStream {
    /// Where the output is being written.
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Request cancellation. Takes effect between frames.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for the session and return its full result.
    ///
    /// # Errors
    ///
    /// The session's error, or [`RecastError::WorkerPanicked`] if the
    /// blocking task panicked.
    pub async fn outcome(mut self) -> Result<SessionOutcome, RecastError> {
        let Some(handle) = self.handle.take() else {
            return Err(RecastError::WorkerPanicked(
                "conversion task already joined".to_string(),
            ));
        };
        handle
            .await
            .map_err(|error| RecastError::WorkerPanicked(error.to_string()))?
    }
}

impl Stream for ConversionStream {
    type Item = ConversionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for ConversionStream {
    fn drop(&mut self) {
        if self.handle.as_ref().is_some_and(|handle| !handle.is_finished()) {
            self.token.cancel();
        }
    }
}

/// Start converting `input` into `output_directory` on Tokio's blocking
/// pool. Must be called from within a Tokio runtime.
///
/// # Errors
///
/// - [`RecastError::InvalidQuality`] if `quality` is outside `[0, 1]`.
/// - [`RecastError::InvalidRequest`] if the input has no file name.
pub fn start_conversion_stream<E, P1, P2>(
    engine: E,
    input: P1,
    output_directory: P2,
    target_format: TargetFormat,
    quality: f32,
    options: ConvertOptions,
) -> Result<ConversionStream, RecastError>
where
    E: Engine + Send + 'static,
    P1: AsRef<Path>,
    P2: AsRef<Path>,
{
    let quality = Quality::new(quality)?;
    let request =
        ConversionRequest::into_directory(input, output_directory, target_format, quality)?;
    Ok(spawn_conversion_stream(engine, request, options))
}

/// Run an already-built request on Tokio's blocking pool.
pub fn spawn_conversion_stream<E>(
    engine: E,
    request: ConversionRequest,
    options: ConvertOptions,
) -> ConversionStream
where
    E: Engine + Send + 'static,
{
    let token = options.cancellation.clone().unwrap_or_default();
    let output_path = request.output_path().to_path_buf();
    let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();

    let forward = StreamProgress {
        sender: sender.clone(),
        inner: options.progress.clone(),
    };
    let options = options
        .with_cancellation(token.clone())
        .with_progress(Arc::new(forward));

    let handle = tokio::task::spawn_blocking(move || {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            transcode(engine, request, options)
        }))
        .unwrap_or_else(|payload| Err(RecastError::WorkerPanicked(panic_message(payload))));
        let _ = sender.send(ConversionEvent::Finished(ConversionOutcome::from(&result)));
        result
    });

    ConversionStream {
        output_path,
        token,
        receiver,
        handle: Some(handle),
    }
}
