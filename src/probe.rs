//! Lightweight metadata probing.
//!
//! [`probe`] opens a source, reads its [`StreamMetadata`], and releases it
//! again without decoding a single frame. Handy for showing what a file
//! contains before the user picks a target format.

use std::path::Path;

use crate::engine::{Engine, Source};
use crate::error::{EngineError, RecastError};
use crate::metadata::StreamMetadata;

/// Read the metadata of `path` through `engine`.
///
/// # Errors
///
/// - [`RecastError::OpenSource`] if the engine cannot open the file or it
///   has neither a video nor an audio stream.
/// - [`RecastError::Cleanup`] if releasing the source fails.
pub fn probe<E: Engine, P: AsRef<Path>>(
    engine: &mut E,
    path: P,
) -> Result<StreamMetadata, RecastError> {
    let path = path.as_ref();
    log::debug!("Probing {}", path.display());

    let mut source = engine
        .open_source(path)
        .map_err(|error| RecastError::OpenSource {
            path: path.to_path_buf(),
            reason: error.to_string(),
        })?;
    let metadata = source.metadata().clone();

    let released = source.release();
    if metadata.is_empty() {
        if let Err(error) = released {
            log::warn!("Failed to release source after failed open: {error}");
        }
        return Err(RecastError::OpenSource {
            path: path.to_path_buf(),
            reason: EngineError::NoStreams.to_string(),
        });
    }
    released.map_err(|error| RecastError::Cleanup {
        resource: "source",
        reason: error.to_string(),
    })?;

    Ok(metadata)
}

/// Probe several files, returning one result per path.
pub fn probe_many<E: Engine, P: AsRef<Path>>(
    engine: &mut E,
    paths: &[P],
) -> Vec<Result<StreamMetadata, RecastError>> {
    paths.iter().map(|path| probe(engine, path)).collect()
}
