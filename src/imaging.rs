//! Boundary to the OS-level imaging service.
//!
//! The container format (attachable disk images) and the nested image
//! format (multi-tree, index-addressable file archives) are never parsed
//! here. Everything goes through [`ImagingService`]; the production
//! implementation shells out to PowerShell and `dism`, tests use a fake.

use crate::process::Cmd;
use crate::version::DriverVersion;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

/// Operations the pipeline needs from the host imaging stack.
pub trait ImagingService {
    /// Attach a container image and return the root of the mounted tree.
    fn attach_container(&self, image: &Path) -> Result<PathBuf>;

    /// Detach a previously attached container image.
    fn detach_container(&self, image: &Path) -> Result<()>;

    /// Ordinals of the logical file-trees inside a nested image.
    fn nested_image_indexes(&self, image: &Path) -> Result<Vec<u32>>;

    /// Mount one tree of a nested image writable at `mount_dir`.
    fn mount_nested(&self, image: &Path, index: u32, mount_dir: &Path) -> Result<()>;

    /// Unmount a nested image, committing or discarding changes.
    fn unmount_nested(&self, mount_dir: &Path, commit: bool) -> Result<()>;

    /// Inject a driver subtree into a mounted nested image, recursively,
    /// permitting unsigned content.
    fn inject_driver_tree(&self, mount_dir: &Path, driver_dir: &Path) -> Result<()>;

    /// Version recorded in an executable's binary metadata, if any.
    fn executable_version(&self, exe: &Path) -> Result<Option<DriverVersion>>;
}

/// Production imaging service: PowerShell for container attach/detach and
/// executable metadata, `dism` for nested image operations.
pub struct DismImaging {
    powershell: PathBuf,
    dism: PathBuf,
}

impl DismImaging {
    pub fn new(powershell: PathBuf, dism: PathBuf) -> Self {
        Self { powershell, dism }
    }

    /// Locate the host tools on PATH.
    pub fn discover() -> Result<Self> {
        let powershell = which::which("powershell")
            .or_else(|_| which::which("pwsh"))
            .context("locating powershell (install Windows PowerShell or pwsh)")?;
        let dism = which::which("dism").context("locating dism (install the Windows ADK)")?;
        Ok(Self::new(powershell, dism))
    }

    fn powershell(&self, script: &str) -> Result<String> {
        let output = Cmd::new(&self.powershell)
            .arg("-NoProfile")
            .arg("-NonInteractive")
            .arg("-Command")
            .arg(script)
            .run()?;
        Ok(output.stdout)
    }
}

/// Quote a path for a single-quoted PowerShell string literal.
fn ps_quote(path: &Path) -> String {
    path.to_string_lossy().replace('\'', "''")
}

impl ImagingService for DismImaging {
    fn attach_container(&self, image: &Path) -> Result<PathBuf> {
        let script = format!(
            "(Mount-DiskImage -ImagePath '{}' -PassThru | Get-Volume).DriveLetter",
            ps_quote(image)
        );
        let stdout = self
            .powershell(&script)
            .with_context(|| format!("attaching container image '{}'", image.display()))?;
        let letter = stdout.trim();
        if letter.len() != 1 || !letter.chars().all(|c| c.is_ascii_alphabetic()) {
            bail!(
                "unexpected drive letter '{}' attaching '{}'",
                letter,
                image.display()
            );
        }
        Ok(PathBuf::from(format!("{}:\\", letter)))
    }

    fn detach_container(&self, image: &Path) -> Result<()> {
        let script = format!(
            "Dismount-DiskImage -ImagePath '{}' | Out-Null",
            ps_quote(image)
        );
        self.powershell(&script)
            .with_context(|| format!("detaching container image '{}'", image.display()))?;
        Ok(())
    }

    fn nested_image_indexes(&self, image: &Path) -> Result<Vec<u32>> {
        let output = Cmd::new(&self.dism)
            .arg("/English")
            .arg("/Get-ImageInfo")
            .arg(format!("/ImageFile:{}", image.display()))
            .error_msg(format!(
                "querying image indexes of '{}' failed",
                image.display()
            ))
            .run()?;
        let mut indexes = Vec::new();
        for line in output.stdout.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("Index") {
                if let Some(value) = rest.trim_start().strip_prefix(':') {
                    if let Ok(index) = value.trim().parse::<u32>() {
                        indexes.push(index);
                    }
                }
            }
        }
        if indexes.is_empty() {
            bail!("no image indexes reported for '{}'", image.display());
        }
        Ok(indexes)
    }

    fn mount_nested(&self, image: &Path, index: u32, mount_dir: &Path) -> Result<()> {
        Cmd::new(&self.dism)
            .arg("/Mount-Image")
            .arg(format!("/ImageFile:{}", image.display()))
            .arg(format!("/Index:{}", index))
            .arg(format!("/MountDir:{}", mount_dir.display()))
            .error_msg(format!(
                "mounting nested image '{}' index {} at '{}' failed",
                image.display(),
                index,
                mount_dir.display()
            ))
            .run()?;
        Ok(())
    }

    fn unmount_nested(&self, mount_dir: &Path, commit: bool) -> Result<()> {
        Cmd::new(&self.dism)
            .arg("/Unmount-Image")
            .arg(format!("/MountDir:{}", mount_dir.display()))
            .arg(if commit { "/Commit" } else { "/Discard" })
            .error_msg(format!(
                "unmounting nested image at '{}' failed",
                mount_dir.display()
            ))
            .run()?;
        Ok(())
    }

    fn inject_driver_tree(&self, mount_dir: &Path, driver_dir: &Path) -> Result<()> {
        Cmd::new(&self.dism)
            .arg(format!("/Image:{}", mount_dir.display()))
            .arg("/Add-Driver")
            .arg(format!("/Driver:{}", driver_dir.display()))
            .arg("/Recurse")
            .arg("/ForceUnsigned")
            .error_msg(format!(
                "injecting drivers from '{}' failed",
                driver_dir.display()
            ))
            .run()?;
        Ok(())
    }

    fn executable_version(&self, exe: &Path) -> Result<Option<DriverVersion>> {
        let script = format!(
            "(Get-Item '{}').VersionInfo.ProductVersion",
            ps_quote(exe)
        );
        let stdout = self
            .powershell(&script)
            .with_context(|| format!("reading version metadata of '{}'", exe.display()))?;
        let version = stdout.trim();
        if version.is_empty() {
            return Ok(None);
        }
        Ok(Some(DriverVersion::parse(version)))
    }
}
