//! Driver-catalog injection and payload embedding against a mounted
//! nested image.

use crate::catalog::DriverDescriptor;
use crate::imaging::ImagingService;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Nested installed-system image, relative to the extracted tree.
pub const INSTALL_IMAGE: &str = "sources/install.wim";

/// Nested boot-environment image, relative to the extracted tree.
pub const BOOT_IMAGE: &str = "sources/boot.wim";

/// Tree index of the setup environment inside the boot image. Index 1 is
/// the recovery environment and must not be modified.
pub const BOOT_SETUP_INDEX: u32 = 2;

/// Where the payload lands inside the installed-system image.
pub const PAYLOAD_TARGET: &str = "Windows/virtio-win-guest-tools.exe";

/// Scripts the target platform executes automatically once, after its own
/// first-boot setup completes and before first interactive logon.
pub const SETUP_SCRIPTS_DIR: &str = "Windows/Setup/Scripts";
pub const SETUP_COMPLETE_FILENAME: &str = "SetupComplete.cmd";

/// Fixed post-setup script: silently installs the guest tools without
/// rebooting.
pub const SETUP_COMPLETE_SCRIPT: &str = "@echo off\r\n\
\"%SystemRoot%\\virtio-win-guest-tools.exe\" /install /quiet /norestart\r\n";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InjectionSummary {
    pub injected: usize,
    pub skipped: usize,
}

/// Inject every catalog subtree present on the driver media into the
/// mounted nested image. A subtree missing from the media is a per-entry
/// skip with a warning, not a failure.
pub fn inject_driver_catalog(
    imaging: &dyn ImagingService,
    driver_root: &Path,
    mount_dir: &Path,
    catalog: &[DriverDescriptor],
) -> Result<InjectionSummary> {
    let mut summary = InjectionSummary::default();
    for descriptor in catalog {
        let source = driver_root.join(descriptor.subtree);
        if !source.is_dir() {
            eprintln!(
                "warning: {} not present on driver media; skipping",
                descriptor.display
            );
            summary.skipped += 1;
            continue;
        }
        imaging
            .inject_driver_tree(mount_dir, &source)
            .with_context(|| {
                format!(
                    "injecting {} from '{}'",
                    descriptor.display,
                    source.display()
                )
            })?;
        println!("  injected {}", descriptor.display);
        summary.injected += 1;
    }
    Ok(summary)
}

/// Copy the payload binary into the mounted image's system directory and
/// write the post-setup script that installs it on first boot.
pub fn embed_payload_files(mount_dir: &Path, payload: &Path) -> Result<()> {
    let target = mount_dir.join(PAYLOAD_TARGET);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating '{}'", parent.display()))?;
    }
    fs::copy(payload, &target).with_context(|| {
        format!(
            "copying payload '{}' to '{}'",
            payload.display(),
            target.display()
        )
    })?;

    let scripts_dir = mount_dir.join(SETUP_SCRIPTS_DIR);
    fs::create_dir_all(&scripts_dir)
        .with_context(|| format!("creating '{}'", scripts_dir.display()))?;
    let script = scripts_dir.join(SETUP_COMPLETE_FILENAME);
    fs::write(&script, SETUP_COMPLETE_SCRIPT)
        .with_context(|| format!("writing post-setup script '{}'", script.display()))?;
    Ok(())
}
