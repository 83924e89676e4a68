//! Artifact classification and per-role selection.
//!
//! Candidates are classified by attaching them read-only and probing the
//! mounted root against signature rules, evaluated in a fixed priority
//! order. Every classification attempt goes through the resource ledger,
//! so a failed probe can never leak a mount.

use crate::error::SlipstreamError;
use crate::imaging::ImagingService;
use crate::resource::{ReleaseAction, ResourceLedger};
use crate::version::DriverVersion;
use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};

/// The three input roles of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactRole {
    PrimaryImage,
    DriverImage,
    PayloadExecutable,
}

impl fmt::Display for ArtifactRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactRole::PrimaryImage => write!(f, "primary installer image"),
            ArtifactRole::DriverImage => write!(f, "driver distribution image"),
            ArtifactRole::PayloadExecutable => write!(f, "payload executable"),
        }
    }
}

/// What a mounted candidate looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedType {
    /// Driver distribution media: known driver subtrees at the root.
    DriverMedia,
    /// Guest-tools media: a guest-tools installer at the root but no
    /// driver subtrees.
    GuestToolsMedia,
    /// Raw installer media: a nested install image under `sources/`.
    InstallMedia,
    Unknown,
}

/// A resolved input artifact. Immutable once selection completes.
#[derive(Debug, Clone)]
pub struct SourceArtifact {
    pub path: PathBuf,
    pub role: ArtifactRole,
    pub detected: DetectedType,
    pub version: DriverVersion,
}

/// Explicitly requested artifact paths. An override bypasses
/// classification for its role; the caller is trusted.
#[derive(Debug, Clone, Default)]
pub struct ArtifactOverrides {
    pub primary: Option<PathBuf>,
    pub driver: Option<PathBuf>,
    pub payload: Option<PathBuf>,
}

/// The resolved inputs of one pipeline run.
#[derive(Debug, Clone)]
pub struct SelectedArtifacts {
    pub primary: SourceArtifact,
    pub driver: SourceArtifact,
    /// Absent when no payload was found or its version did not match the
    /// selected driver; the embed phase is skipped in that case.
    pub payload: Option<SourceArtifact>,
}

/// Signature markers, strongest first. Driver media commonly also carries
/// a guest-tools installer at its root, so the driver signature must win.
const DRIVER_MEDIA_MARKERS: &[&str] = &["vioscsi", "viostor", "NetKVM"];
const GUEST_TOOLS_MARKER: &str = "virtio-win-guest-tools.exe";
const INSTALL_MEDIA_MARKER: &str = "sources/install.wim";

/// Classify an already-mounted root. Pure over the directory tree.
pub fn classify_root(root: &Path) -> DetectedType {
    if DRIVER_MEDIA_MARKERS.iter().any(|m| root.join(m).is_dir()) {
        return DetectedType::DriverMedia;
    }
    if root.join(GUEST_TOOLS_MARKER).is_file() {
        return DetectedType::GuestToolsMedia;
    }
    if root.join(INSTALL_MEDIA_MARKER).is_file() {
        return DetectedType::InstallMedia;
    }
    DetectedType::Unknown
}

/// Attach a candidate, probe its root, and release the mount regardless of
/// outcome. Reports `Unknown` when the attach itself fails.
pub fn classify_artifact(
    imaging: &dyn ImagingService,
    ledger: &mut ResourceLedger,
    path: &Path,
) -> DetectedType {
    let root = match imaging.attach_container(path) {
        Ok(root) => root,
        Err(err) => {
            eprintln!(
                "warning: could not attach '{}' for classification: {:#}",
                path.display(),
                err
            );
            return DetectedType::Unknown;
        }
    };
    let handle = ledger.track(
        format!("classification mount of '{}'", path.display()),
        ReleaseAction::DetachContainer {
            image: path.to_path_buf(),
        },
    );
    let detected = classify_root(&root);
    if let Err(err) = ledger.release(imaging, handle) {
        eprintln!(
            "warning: releasing classification mount of '{}': {:#}",
            path.display(),
            err
        );
    }
    detected
}

/// Resolve the three roles from a candidate directory plus any explicit
/// overrides.
///
/// Driver selection takes the highest version; equal versions break ties
/// by lexicographic path order, so selection does not depend on directory
/// enumeration order. The payload must match the selected driver at
/// major.minor granularity or it is excluded with a warning.
pub fn select_artifacts(
    imaging: &dyn ImagingService,
    ledger: &mut ResourceLedger,
    candidate_dir: &Path,
    overrides: &ArtifactOverrides,
) -> Result<SelectedArtifacts, SlipstreamError> {
    let candidates = list_candidates(candidate_dir).unwrap_or_else(|err| {
        eprintln!(
            "warning: reading candidate directory '{}': {:#}",
            candidate_dir.display(),
            err
        );
        Vec::new()
    });

    let mut classified: Vec<(PathBuf, DetectedType)> = Vec::new();
    let need_primary = overrides.primary.is_none();
    let need_driver = overrides.driver.is_none();
    if need_primary || need_driver {
        for path in candidates.iter().filter(|p| has_extension(p, "iso")) {
            let detected = classify_artifact(imaging, ledger, path);
            classified.push((path.clone(), detected));
        }
    }

    let primary = match &overrides.primary {
        Some(path) => SourceArtifact {
            path: path.clone(),
            role: ArtifactRole::PrimaryImage,
            detected: DetectedType::InstallMedia,
            version: version_of(path),
        },
        None => classified
            .iter()
            .find(|(_, detected)| *detected == DetectedType::InstallMedia)
            .map(|(path, detected)| SourceArtifact {
                path: path.clone(),
                role: ArtifactRole::PrimaryImage,
                detected: *detected,
                version: version_of(path),
            })
            .ok_or(SlipstreamError::Validation {
                role: ArtifactRole::PrimaryImage,
            })?,
    };

    let driver = match &overrides.driver {
        Some(path) => SourceArtifact {
            path: path.clone(),
            role: ArtifactRole::DriverImage,
            detected: DetectedType::DriverMedia,
            version: version_of(path),
        },
        None => {
            let mut drivers: Vec<&PathBuf> = classified
                .iter()
                .filter(|(_, detected)| *detected == DetectedType::DriverMedia)
                .map(|(path, _)| path)
                .collect();
            drivers.sort_by(|a, b| {
                version_of(b)
                    .cmp(&version_of(a))
                    .then_with(|| a.cmp(b))
            });
            drivers
                .first()
                .map(|path| SourceArtifact {
                    path: (*path).clone(),
                    role: ArtifactRole::DriverImage,
                    detected: DetectedType::DriverMedia,
                    version: version_of(path),
                })
                .ok_or(SlipstreamError::Validation {
                    role: ArtifactRole::DriverImage,
                })?
        }
    };

    let payload_candidate = overrides.payload.clone().or_else(|| {
        candidates
            .iter()
            .find(|p| has_extension(p, "exe"))
            .cloned()
    });
    let payload = payload_candidate.and_then(|path| {
        match resolve_payload(imaging, &path, &driver.version) {
            Ok(artifact) => artifact,
            Err(err) => {
                eprintln!(
                    "warning: could not read payload version from '{}': {:#}",
                    path.display(),
                    err
                );
                None
            }
        }
    });

    Ok(SelectedArtifacts {
        primary,
        driver,
        payload,
    })
}

/// Version-gate a payload candidate against the selected driver.
fn resolve_payload(
    imaging: &dyn ImagingService,
    path: &Path,
    driver_version: &DriverVersion,
) -> Result<Option<SourceArtifact>> {
    let version = imaging
        .executable_version(path)
        .with_context(|| format!("querying version metadata of '{}'", path.display()))?;
    let version = match version {
        Some(version) => version,
        None => {
            eprintln!(
                "warning: '{}' carries no version metadata; excluding payload from this run",
                path.display()
            );
            return Ok(None);
        }
    };
    if !version.same_release(driver_version) {
        eprintln!(
            "warning: payload '{}' is version {} but the selected driver media is {}; \
             excluding payload from this run",
            path.display(),
            version,
            driver_version
        );
        return Ok(None);
    }
    Ok(Some(SourceArtifact {
        path: path.to_path_buf(),
        role: ArtifactRole::PayloadExecutable,
        detected: DetectedType::Unknown,
        version,
    }))
}

/// Candidate files in deterministic lexicographic path order.
fn list_candidates(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("reading candidate directory '{}'", dir.display()))?
    {
        let entry =
            entry.with_context(|| format!("iterating candidate directory '{}'", dir.display()))?;
        if entry
            .file_type()
            .with_context(|| format!("reading file type of '{}'", entry.path().display()))?
            .is_file()
        {
            paths.push(entry.path());
        }
    }
    paths.sort();
    Ok(paths)
}

fn has_extension(path: &Path, wanted: &str) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(wanted))
        .unwrap_or(false)
}

fn version_of(path: &Path) -> DriverVersion {
    path.file_name()
        .map(|name| DriverVersion::from_filename(&name.to_string_lossy()))
        .unwrap_or_else(DriverVersion::zero)
}
