//! Per-run manifest written into the working directory.
//!
//! On success the whole working directory is deleted, manifest included.
//! On fatal failure the manifest survives alongside the retained tree and
//! records which phase failed.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub const RUN_MANIFEST_FILENAME: &str = "run-manifest.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub status: String,
    pub created_at_utc: String,
    pub finished_at_utc: Option<String>,
    pub failed_phase: Option<String>,
}

impl RunManifest {
    pub fn started() -> Self {
        Self {
            status: "running".to_string(),
            created_at_utc: now_utc(),
            finished_at_utc: None,
            failed_phase: None,
        }
    }

    pub fn mark_success(&mut self) {
        self.status = "success".to_string();
        self.finished_at_utc = Some(now_utc());
    }

    pub fn mark_failed(&mut self, failed_phase: Option<String>) {
        self.status = "failed".to_string();
        self.finished_at_utc = Some(now_utc());
        self.failed_phase = failed_phase;
    }

    pub fn path(work_dir: &Path) -> PathBuf {
        work_dir.join(RUN_MANIFEST_FILENAME)
    }

    pub fn write(&self, work_dir: &Path) -> Result<()> {
        let path = Self::path(work_dir);
        let json = serde_json::to_string_pretty(self).context("serializing run manifest")?;
        fs::write(&path, json)
            .with_context(|| format!("writing run manifest '{}'", path.display()))?;
        Ok(())
    }

    pub fn load(work_dir: &Path) -> Result<Self> {
        let path = Self::path(work_dir);
        let bytes =
            fs::read(&path).with_context(|| format!("reading run manifest '{}'", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing run manifest '{}'", path.display()))
    }
}

fn now_utc() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_manifest_roundtrip() {
        let temp = TempDir::new().unwrap();
        let mut manifest = RunManifest::started();
        manifest.mark_failed(Some("VerifyBootAssets".to_string()));
        manifest.write(temp.path()).unwrap();

        let loaded = RunManifest::load(temp.path()).unwrap();
        assert_eq!(loaded.status, "failed");
        assert_eq!(loaded.failed_phase.as_deref(), Some("VerifyBootAssets"));
        assert!(loaded.finished_at_utc.is_some());
    }

    #[test]
    fn test_success_clears_nothing_but_status() {
        let mut manifest = RunManifest::started();
        assert_eq!(manifest.status, "running");
        manifest.mark_success();
        assert_eq!(manifest.status, "success");
        assert!(manifest.failed_phase.is_none());
    }
}
