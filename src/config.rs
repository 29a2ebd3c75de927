//! Conversion configuration.
//!
//! [`ConvertOptions`] is a builder that threads the progress callback, the
//! cancellation token, and the tuning knobs through a conversion without
//! growing every function signature.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use recast::{BitrateMapping, CancellationToken, ConvertOptions, PartialOutput, ProgressSample};
//!
//! let token = CancellationToken::new();
//! let options = ConvertOptions::new()
//!     .with_progress(Arc::new(|sample: &ProgressSample| println!("{}%", sample.percentage())))
//!     .with_cancellation(token.clone())
//!     .with_batch_size(5)
//!     .with_bitrate_mapping(BitrateMapping::Fixed)
//!     .with_partial_output(PartialOutput::Keep);
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use crate::parameters::BitrateMapping;
use crate::progress::{CancellationToken, NoOpProgress, ProgressCallback};

/// Frames between two progress estimates unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: u64 = 10;

/// What happens to the destination file when a conversion does not
/// complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartialOutput {
    /// Delete whatever was written. This is the default.
    #[default]
    Remove,
    /// Leave the partially written file in place.
    Keep,
}

/// Configuration for a conversion.
///
/// All fields have defaults: no progress callback, no cancellation,
/// progress estimated every 10 frames, quality-scaled bitrates, partial
/// output removed.
#[derive(Clone)]
pub struct ConvertOptions {
    pub(crate) progress: Arc<dyn ProgressCallback>,
    pub(crate) cancellation: Option<CancellationToken>,
    pub(crate) batch_size: u64,
    pub(crate) bitrate_mapping: BitrateMapping,
    pub(crate) partial_output: PartialOutput,
}

impl Debug for ConvertOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ConvertOptions")
            .field("has_cancellation", &self.cancellation.is_some())
            .field("batch_size", &self.batch_size)
            .field("bitrate_mapping", &self.bitrate_mapping)
            .field("partial_output", &self.partial_output)
            .finish_non_exhaustive()
    }
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ConvertOptions {
    /// Create options with default settings.
    pub fn new() -> Self {
        Self {
            progress: Arc::new(NoOpProgress),
            cancellation: None,
            batch_size: DEFAULT_BATCH_SIZE,
            bitrate_mapping: BitrateMapping::default(),
            partial_output: PartialOutput::default(),
        }
    }

    /// Attach a progress callback.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Attach a cancellation token.
    ///
    /// When the token is cancelled the frame loop stops at the next poll
    /// point and the session reports
    /// [`SessionOutcome::Cancelled`](crate::SessionOutcome::Cancelled).
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Estimate progress every `size` frames. Clamped to a minimum of 1.
    #[must_use]
    pub fn with_batch_size(mut self, size: u64) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Choose how quality maps to bitrates.
    #[must_use]
    pub fn with_bitrate_mapping(mut self, mapping: BitrateMapping) -> Self {
        self.bitrate_mapping = mapping;
        self
    }

    /// Choose what happens to the destination when a run does not complete.
    #[must_use]
    pub fn with_partial_output(mut self, policy: PartialOutput) -> Self {
        self.partial_output = policy;
        self
    }

    /// The cancellation token, if any.
    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    /// Returns `true` if cancellation has been requested.
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|token| token.is_cancelled())
    }
}
