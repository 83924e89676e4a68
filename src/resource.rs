//! Ledger of acquired imaging resources.
//!
//! Every container attach and nested-image mount is recorded here
//! immediately after the underlying acquisition succeeds. Release actions
//! are plain data executed against the imaging service, so a single
//! unconditional [`ResourceLedger::release_all`] pass at pipeline exit is
//! sufficient to reach zero held resources regardless of which phase
//! failed.
//!
//! Guarantees:
//! - release is idempotent; a resource is never released twice
//! - `release_all` runs in strict reverse-acquisition order
//! - an individual release failure does not stop the pass; failures are
//!   collected and surfaced as a non-fatal warning

use crate::imaging::ImagingService;
use anyhow::{bail, Result};
use std::path::PathBuf;
use time::OffsetDateTime;

/// Opaque id for a tracked resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceHandle(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    ContainerMount,
    NestedImageMount,
}

/// How to let go of a tracked resource. Executed against the imaging
/// service at release time.
#[derive(Debug, Clone)]
pub enum ReleaseAction {
    DetachContainer { image: PathBuf },
    UnmountNested { mount_dir: PathBuf },
}

impl ReleaseAction {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ReleaseAction::DetachContainer { .. } => ResourceKind::ContainerMount,
            ReleaseAction::UnmountNested { .. } => ResourceKind::NestedImageMount,
        }
    }
}

struct LedgerEntry {
    id: u64,
    label: String,
    action: ReleaseAction,
    #[allow(dead_code)]
    acquired_at: OffsetDateTime,
    released: bool,
}

/// Ordered record of every held resource for one pipeline run.
#[derive(Default)]
pub struct ResourceLedger {
    entries: Vec<LedgerEntry>,
    next_id: u64,
}

/// Outcome of a `release_all` pass.
pub struct ReleaseReport {
    /// Resources released cleanly during this pass.
    pub released: usize,
    /// Labels and errors of releases that failed; best-effort, the pass
    /// continued past each one.
    pub failures: Vec<(String, anyhow::Error)>,
}

impl ReleaseReport {
    pub fn clean(&self) -> bool {
        self.failures.is_empty()
    }
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a resource as held. Call immediately after the underlying
    /// acquisition call succeeds.
    pub fn track(&mut self, label: impl Into<String>, action: ReleaseAction) -> ResourceHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(LedgerEntry {
            id,
            label: label.into(),
            action,
            acquired_at: OffsetDateTime::now_utc(),
            released: false,
        });
        ResourceHandle(id)
    }

    /// Resources tracked and not yet released.
    pub fn outstanding(&self) -> usize {
        self.entries.iter().filter(|e| !e.released).count()
    }

    /// Release one resource, discarding any pending changes. Idempotent:
    /// releasing an already-released handle is a no-op.
    pub fn release(&mut self, imaging: &dyn ImagingService, handle: ResourceHandle) -> Result<()> {
        self.release_inner(imaging, handle, false)
    }

    /// Release a nested-image mount, committing its changes. This is the
    /// success-path variant; the unconditional cleanup pass always discards.
    pub fn release_committing(
        &mut self,
        imaging: &dyn ImagingService,
        handle: ResourceHandle,
    ) -> Result<()> {
        self.release_inner(imaging, handle, true)
    }

    fn release_inner(
        &mut self,
        imaging: &dyn ImagingService,
        handle: ResourceHandle,
        commit: bool,
    ) -> Result<()> {
        let entry = match self.entries.iter_mut().find(|e| e.id == handle.0) {
            Some(entry) => entry,
            None => bail!("unknown resource handle"),
        };
        if entry.released {
            return Ok(());
        }
        // Mark released before executing: a failed release is not retried,
        // it is reported and the resource is considered spent.
        entry.released = true;
        perform_release(imaging, &entry.action, commit)
    }

    /// Release every held resource in strict reverse-acquisition order,
    /// discarding pending changes, swallowing individual failures.
    pub fn release_all(&mut self, imaging: &dyn ImagingService) -> ReleaseReport {
        let mut report = ReleaseReport {
            released: 0,
            failures: Vec::new(),
        };
        for entry in self.entries.iter_mut().rev() {
            if entry.released {
                continue;
            }
            entry.released = true;
            match perform_release(imaging, &entry.action, false) {
                Ok(()) => report.released += 1,
                Err(err) => report.failures.push((entry.label.clone(), err)),
            }
        }
        report
    }
}

fn perform_release(imaging: &dyn ImagingService, action: &ReleaseAction, commit: bool) -> Result<()> {
    match action {
        ReleaseAction::DetachContainer { image } => imaging.detach_container(image),
        ReleaseAction::UnmountNested { mount_dir } => imaging.unmount_nested(mount_dir, commit),
    }
}
