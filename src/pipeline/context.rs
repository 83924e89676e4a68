//! Working-directory claim and teardown for one pipeline run.

use crate::manifest::RunManifest;
use crate::pipeline::Phase;
use anyhow::{bail, Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Lock file claiming the working directory for a single run.
pub const LOCK_FILENAME: &str = ".slipstream-lock";

/// Process-scoped state of one invocation. The working directory is
/// claimed exclusively at creation and wiped, so no two runs can share
/// mount points or staging trees.
pub struct PipelineContext {
    pub work_dir: PathBuf,
    /// Extraction staging area for the primary image contents.
    pub extract_dir: PathBuf,
    /// Parent of the per-image nested mount points.
    pub mounts_dir: PathBuf,
    /// Set on fatal failure; read only by finalize. When set, the file
    /// contents of the working directory are preserved for inspection.
    pub retain_work_dir: bool,
    pub current_phase: Phase,
    manifest: RunManifest,
    lock: File,
}

impl PipelineContext {
    /// Claim `work_dir`: create it, take the exclusive lock, wipe stale
    /// contents from previous runs, and lay out the staging directories.
    pub fn claim(work_dir: &Path) -> Result<Self> {
        fs::create_dir_all(work_dir)
            .with_context(|| format!("creating working directory '{}'", work_dir.display()))?;

        let lock_path = work_dir.join(LOCK_FILENAME);
        let lock = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("opening lock file '{}'", lock_path.display()))?;
        if lock.try_lock_exclusive().is_err() {
            bail!(
                "working directory '{}' is claimed by another run",
                work_dir.display()
            );
        }

        wipe_except_lock(work_dir)?;

        let extract_dir = work_dir.join("extract");
        let mounts_dir = work_dir.join("mounts");
        fs::create_dir_all(&extract_dir)
            .with_context(|| format!("creating '{}'", extract_dir.display()))?;
        fs::create_dir_all(&mounts_dir)
            .with_context(|| format!("creating '{}'", mounts_dir.display()))?;

        let manifest = RunManifest::started();
        manifest.write(work_dir)?;

        Ok(Self {
            work_dir: work_dir.to_path_buf(),
            extract_dir,
            mounts_dir,
            retain_work_dir: false,
            current_phase: Phase::MountSources,
            manifest,
            lock,
        })
    }

    pub fn enter_phase(&mut self, phase: Phase) {
        self.current_phase = phase;
        println!("=== {} ===", phase);
    }

    /// Mount point for the nested installed-system image.
    pub fn install_mount_dir(&self) -> PathBuf {
        self.mounts_dir.join("install")
    }

    /// Mount point for the nested setup-environment image.
    pub fn boot_mount_dir(&self) -> PathBuf {
        self.mounts_dir.join("boot")
    }

    /// Tear down the run: delete the working directory tree, unless
    /// `retain_work_dir` was set by a fatal failure, in which case the
    /// tree survives with an updated manifest.
    pub fn finalize(mut self, failed_phase: Option<Phase>) -> Result<()> {
        self.current_phase = Phase::Finalize;
        println!("=== {} ===", Phase::Finalize);

        if self.retain_work_dir {
            self.manifest
                .mark_failed(failed_phase.map(|phase| phase.to_string()));
            self.manifest.write(&self.work_dir)?;
            println!(
                "  working directory retained for inspection: {}",
                self.work_dir.display()
            );
            return Ok(());
        }

        let PipelineContext { work_dir, lock, .. } = self;
        let _ = lock.unlock();
        drop(lock);
        fs::remove_dir_all(&work_dir)
            .with_context(|| format!("removing working directory '{}'", work_dir.display()))?;
        println!("  removed working directory");
        Ok(())
    }
}

fn wipe_except_lock(work_dir: &Path) -> Result<()> {
    for entry in fs::read_dir(work_dir)
        .with_context(|| format!("reading working directory '{}'", work_dir.display()))?
    {
        let entry =
            entry.with_context(|| format!("iterating '{}'", work_dir.display()))?;
        if entry.file_name() == LOCK_FILENAME {
            continue;
        }
        let path = entry.path();
        let result = if entry
            .file_type()
            .with_context(|| format!("reading file type of '{}'", path.display()))?
            .is_dir()
        {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        result.with_context(|| format!("wiping stale entry '{}'", path.display()))?;
    }
    Ok(())
}
