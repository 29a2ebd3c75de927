//! Progress reporting and cancellation support.
//!
//! This module provides [`estimate`] (the pure position → ratio mapping),
//! [`ProgressCallback`] for observing a conversion, [`ProgressSample`] for
//! the values it receives, and [`CancellationToken`] for cooperative
//! cancellation.
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "ffmpeg")]
//! # {
//! use std::sync::Arc;
//!
//! use recast::{
//!     CancellationToken, ConversionRequest, ConvertOptions, FfmpegEngine, ProgressSample,
//!     Quality, TargetFormat,
//! };
//!
//! let token = CancellationToken::new();
//! let options = ConvertOptions::new()
//!     .with_progress(Arc::new(|sample: &ProgressSample| {
//!         println!("{}% done", sample.percentage());
//!     }))
//!     .with_cancellation(token.clone());
//!
//! let request = ConversionRequest::into_directory(
//!     "clip.mov", "out", TargetFormat::Mp4, Quality::default(),
//! )?;
//! recast::transcode(FfmpegEngine::new(), request, options)?;
//! # }
//! # Ok::<(), recast::RecastError>(())
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};

/// Total assumed, in seconds, when the source reports no duration.
pub const UNKNOWN_DURATION_SECONDS: f64 = 1.0;

/// Map a stream position onto a completion ratio in `[0, 1]`.
///
/// `elapsed` is clamped to `[0, total]` before dividing. A `total` that is
/// not a positive finite number is treated as [`UNKNOWN_DURATION_SECONDS`].
///
/// ```
/// assert_eq!(recast::estimate(2.5, 10.0), 0.25);
/// assert_eq!(recast::estimate(12.0, 10.0), 1.0);
/// assert_eq!(recast::estimate(0.5, 0.0), 0.5);
/// ```
pub fn estimate(elapsed: f64, total: f64) -> f64 {
    let total = if total.is_finite() && total > 0.0 {
        total
    } else {
        UNKNOWN_DURATION_SECONDS
    };
    let elapsed = if elapsed.is_nan() {
        0.0
    } else {
        elapsed.clamp(0.0, total)
    };
    elapsed / total
}

/// [`estimate`] for [`Duration`] values.
pub fn estimate_duration(elapsed: Duration, total: Duration) -> f64 {
    estimate(elapsed.as_secs_f64(), total.as_secs_f64())
}

/// A snapshot of conversion progress.
///
/// Delivered to [`ProgressCallback::on_progress`] at most once per new
/// integer percentage, and once more with `ratio == 1.0` when the
/// conversion completes.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSample {
    /// Completion ratio in `[0, 1]`.
    pub ratio: f64,
    /// Stream position of the frame that produced this sample.
    pub position: Duration,
    /// Frames pulled from the source so far.
    pub frames_processed: u64,
    /// Wall-clock time since the frame loop started.
    pub elapsed: Duration,
    /// Estimated wall-clock time remaining, from throughput so far.
    pub estimated_remaining: Option<Duration>,
}

impl ProgressSample {
    /// Completion as a floored integer percentage (`0..=100`).
    pub fn percentage(&self) -> u32 {
        percentage(self.ratio)
    }
}

fn percentage(ratio: f64) -> u32 {
    (ratio * 100.0).floor().clamp(0.0, 100.0) as u32
}

/// Trait for receiving progress updates during a conversion.
///
/// Implementations must be [`Send`] and [`Sync`]: the session runs on a
/// worker thread and makes no promise about which thread calls back.
/// Callbacks observe but cannot halt a conversion; use
/// [`CancellationToken`] for that.
///
/// Any `Fn(&ProgressSample) + Send + Sync` closure is a callback.
pub trait ProgressCallback: Send + Sync {
    /// Called with each new progress sample.
    fn on_progress(&self, sample: &ProgressSample);
}

impl<F> ProgressCallback for F
where
    F: Fn(&ProgressSample) + Send + Sync,
{
    fn on_progress(&self, sample: &ProgressSample) {
        self(sample)
    }
}

/// Discards all progress notifications. The default callback.
pub(crate) struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _sample: &ProgressSample) {}
}

/// Cooperative cancellation token backed by an [`AtomicBool`].
///
/// Clone this token and share it between threads; call
/// [`cancel`](CancellationToken::cancel) from any thread to request
/// cancellation. The session checks the token between frames, so an
/// in-flight decode or encode call always finishes first. Cancelling twice
/// is the same as cancelling once.
///
/// # Example
///
/// ```
/// use recast::CancellationToken;
///
/// let token = CancellationToken::new();
/// assert!(!token.is_cancelled());
///
/// token.clone().cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, non-cancelled token.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation. All clones observe it.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            log::debug!("Cancellation requested");
        }
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Turns per-frame positions into throttled [`ProgressSample`]s.
///
/// Only every `batch_size`-th frame (counting from the first) is estimated,
/// and a sample is emitted only when its floored percentage beats the last
/// one reported, so emitted ratios strictly increase until
/// [`finish`](ProgressTracker::finish). Only `finish` reports 100%, even
/// when frames run past the reported duration.
pub(crate) struct ProgressTracker {
    callback: Arc<dyn ProgressCallback>,
    total: Duration,
    batch_size: u64,
    frames: u64,
    last_percentage: u32,
    last_ratio: f64,
    last_position: Duration,
    start_time: Instant,
}

impl ProgressTracker {
    pub(crate) fn new(callback: Arc<dyn ProgressCallback>, total: Duration, batch_size: u64) -> Self {
        Self {
            callback,
            total,
            batch_size: batch_size.max(1),
            frames: 0,
            last_percentage: 0,
            last_ratio: 0.0,
            last_position: Duration::ZERO,
            start_time: Instant::now(),
        }
    }

    /// Record one frame at stream position `position`.
    pub(crate) fn advance(&mut self, position: Duration) {
        let index = self.frames;
        self.frames += 1;
        self.last_position = position;

        if index % self.batch_size != 0 {
            return;
        }

        let ratio = estimate_duration(position, self.total);
        let current = percentage(ratio);
        if current > self.last_percentage && current < 100 {
            self.last_percentage = current;
            self.last_ratio = ratio;
            self.report(ratio, position);
        }
    }

    /// Unconditionally report completion.
    pub(crate) fn finish(&mut self) {
        self.last_percentage = 100;
        self.last_ratio = 1.0;
        self.report(1.0, self.last_position);
    }

    /// Frames recorded so far.
    pub(crate) fn frames(&self) -> u64 {
        self.frames
    }

    /// Ratio at the most recent frame position, whether or not it was
    /// reported. Never below the last reported ratio.
    pub(crate) fn current_ratio(&self) -> f64 {
        estimate_duration(self.last_position, self.total).max(self.last_ratio)
    }

    fn report(&self, ratio: f64, position: Duration) {
        let elapsed = self.start_time.elapsed();
        let estimated_remaining = (ratio > 0.0 && ratio < 1.0).then(|| {
            elapsed.mul_f64((1.0 - ratio) / ratio)
        });

        let sample = ProgressSample {
            ratio,
            position,
            frames_processed: self.frames,
            elapsed,
            estimated_remaining,
        };
        log::trace!("Progress {}% at {:?}", sample.percentage(), position);
        self.callback.on_progress(&sample);
    }
}
