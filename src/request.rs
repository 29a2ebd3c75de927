//! The immutable description of one conversion.

use std::path::{Path, PathBuf};

use crate::error::RecastError;
use crate::format::{Quality, TargetFormat};

/// Suffix appended to the input file stem when deriving an output name.
pub const OUTPUT_SUFFIX: &str = "_converted";

/// What to convert, where to, into which format, at what quality.
///
/// Created by the caller when a conversion starts and read-only for the
/// lifetime of the [`TranscodeSession`](crate::TranscodeSession) it feeds.
///
/// # Example
///
/// ```
/// use recast::{ConversionRequest, Quality, TargetFormat};
///
/// let request = ConversionRequest::into_directory(
///     "videos/clip.mov",
///     "out",
///     TargetFormat::Mp4,
///     Quality::new(0.8)?,
/// )?;
/// assert!(request.output_path().ends_with("clip_converted.mp4"));
/// # Ok::<(), recast::RecastError>(())
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionRequest {
    input_path: PathBuf,
    output_path: PathBuf,
    target_format: TargetFormat,
    quality: Quality,
}

impl ConversionRequest {
    /// Build a request with an explicit output path.
    ///
    /// # Errors
    ///
    /// Returns [`RecastError::InvalidRequest`] if the input has no file name
    /// or the output path is the input path.
    pub fn new<P1: AsRef<Path>, P2: AsRef<Path>>(
        input: P1,
        output: P2,
        target_format: TargetFormat,
        quality: Quality,
    ) -> Result<Self, RecastError> {
        let input_path = input.as_ref().to_path_buf();
        let output_path = output.as_ref().to_path_buf();

        if input_path.file_name().is_none() {
            return Err(RecastError::InvalidRequest(format!(
                "input {} has no file name",
                input_path.display()
            )));
        }
        if output_path.file_name().is_none() {
            return Err(RecastError::InvalidRequest(format!(
                "output {} has no file name",
                output_path.display()
            )));
        }
        if input_path == output_path {
            return Err(RecastError::InvalidRequest(format!(
                "output would overwrite the input {}",
                input_path.display()
            )));
        }

        Ok(Self {
            input_path,
            output_path,
            target_format,
            quality,
        })
    }

    /// Build a request whose output lands in `output_directory` as
    /// `<input-stem>_converted.<extension>`.
    ///
    /// # Errors
    ///
    /// Same as [`new`](ConversionRequest::new).
    pub fn into_directory<P1: AsRef<Path>, P2: AsRef<Path>>(
        input: P1,
        output_directory: P2,
        target_format: TargetFormat,
        quality: Quality,
    ) -> Result<Self, RecastError> {
        let input = input.as_ref();
        let file_name = output_file_name(input, target_format)?;
        Self::new(
            input,
            output_directory.as_ref().join(file_name),
            target_format,
            quality,
        )
    }

    /// Path of the source media file.
    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    /// Path the converted file is written to.
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Target container/format.
    pub fn target_format(&self) -> TargetFormat {
        self.target_format
    }

    /// Requested quality.
    pub fn quality(&self) -> Quality {
        self.quality
    }
}

/// Derive `<stem>_converted.<extension>` from an input path.
///
/// # Errors
///
/// Returns [`RecastError::InvalidRequest`] if the input has no file stem.
pub fn output_file_name(input: &Path, target_format: TargetFormat) -> Result<String, RecastError> {
    let stem = input
        .file_stem()
        .ok_or_else(|| {
            RecastError::InvalidRequest(format!("input {} has no file name", input.display()))
        })?
        .to_string_lossy();
    Ok(format!(
        "{stem}{OUTPUT_SUFFIX}.{}",
        target_format.extension()
    ))
}
