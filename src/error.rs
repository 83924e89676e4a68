//! Fatal error taxonomy for a pipeline run.
//!
//! Non-fatal conditions (per-entry injection skips, payload version
//! mismatch, name truncation, release failures during cleanup) are
//! warnings, not errors; they never appear here.

use crate::detect::ArtifactRole;
use crate::pipeline::Phase;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SlipstreamError {
    /// A mandatory artifact role could not be resolved; the pipeline does
    /// not start.
    #[error("no usable {role} artifact could be resolved")]
    Validation { role: ArtifactRole },

    /// Claiming the working directory failed (locked by another run, or
    /// not creatable).
    #[error("claiming the working directory failed: {cause}")]
    Workspace { cause: anyhow::Error },

    /// A container or nested-image mount/unmount operation failed.
    #[error("{phase} failed: {cause}")]
    Mount { phase: Phase, cause: anyhow::Error },

    /// Bulk extraction of the primary image contents failed.
    #[error("ExtractPrimaryContents failed: {cause}")]
    Copy { cause: anyhow::Error },

    /// Extraction completed without copying a single file, which signals a
    /// copy that silently no-op'd rather than erroring.
    #[error("ExtractPrimaryContents copied zero files from '{}'", .source_root.display())]
    EmptyExtraction { source_root: PathBuf },

    /// A required boot-sector asset is missing from the extracted tree;
    /// the output would not boot on one of the two firmware modes.
    #[error("VerifyBootAssets failed: missing boot asset '{}'", .asset.display())]
    MissingBootAsset { asset: PathBuf },

    /// The external image-mastering tool exited non-zero. Its captured
    /// output is included verbatim.
    #[error("BuildOutputArtifact failed: mastering tool exited with {status}:\n{output}")]
    Build { status: String, output: String },

    /// Any other fatal phase failure.
    #[error("{phase} failed: {cause}")]
    Failed { phase: Phase, cause: anyhow::Error },
}

impl SlipstreamError {
    /// The phase this error aborted, if the pipeline had started.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            SlipstreamError::Validation { .. } | SlipstreamError::Workspace { .. } => None,
            SlipstreamError::Mount { phase, .. } | SlipstreamError::Failed { phase, .. } => {
                Some(*phase)
            }
            SlipstreamError::Copy { .. } | SlipstreamError::EmptyExtraction { .. } => {
                Some(Phase::ExtractPrimaryContents)
            }
            SlipstreamError::MissingBootAsset { .. } => Some(Phase::VerifyBootAssets),
            SlipstreamError::Build { .. } => Some(Phase::BuildOutputArtifact),
        }
    }
}
