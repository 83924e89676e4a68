//! Boundary to the external image-mastering tool.
//!
//! The tool turns the extracted, driver-injected tree back into a single
//! bootable image. Its contract is a single executable taking, in order:
//! size-limit override, storage optimization, dual-filesystem mode, UDF
//! version, volume label, a boot-data descriptor, the source directory,
//! and the destination file.

use crate::process::Cmd;
use anyhow::{Context, Result};
use std::ffi::OsString;
use std::path::PathBuf;
use thiserror::Error;

/// The two boot-sector assets the output image boots from.
#[derive(Debug, Clone)]
pub struct BootAssets {
    /// Legacy (BIOS) boot-sector asset.
    pub legacy: PathBuf,
    /// UEFI boot-sector asset.
    pub uefi: PathBuf,
}

/// One mastering invocation.
#[derive(Debug, Clone)]
pub struct MasterRequest {
    pub volume_label: String,
    pub boot: BootAssets,
    pub source_dir: PathBuf,
    pub destination: PathBuf,
}

#[derive(Debug, Error)]
pub enum MasterError {
    #[error("launching mastering tool: {0}")]
    Launch(anyhow::Error),
    /// Non-zero exit; `output` is the tool's captured output, verbatim.
    #[error("mastering tool exited with {status}:\n{output}")]
    Failed { status: String, output: String },
}

pub trait ImageMasterer {
    fn master(&self, request: &MasterRequest) -> Result<(), MasterError>;
}

/// Boot-data descriptor naming both boot-sector assets, each tagged with
/// its partition-table entry: `{count}#p0,e,b{legacy}#pEF,e,b{uefi}`.
pub fn boot_data_descriptor(boot: &BootAssets) -> String {
    format!(
        "2#p0,e,b{}#pEF,e,b{}",
        boot.legacy.display(),
        boot.uefi.display()
    )
}

/// The `oscdimg` mastering tool.
pub struct Oscdimg {
    exe: PathBuf,
}

impl Oscdimg {
    pub fn new(exe: PathBuf) -> Self {
        Self { exe }
    }

    /// Locate the tool on PATH.
    pub fn discover() -> Result<Self> {
        let exe = which::which("oscdimg")
            .context("locating oscdimg (install the Windows ADK deployment tools)")?;
        Ok(Self::new(exe))
    }

    /// Full argument vector for one request, in the contract's order.
    pub fn command_args(request: &MasterRequest) -> Vec<OsString> {
        vec![
            OsString::from("-m"),
            OsString::from("-o"),
            OsString::from("-u2"),
            OsString::from("-udfver102"),
            OsString::from(format!("-l{}", request.volume_label)),
            OsString::from(format!("-bootdata:{}", boot_data_descriptor(&request.boot))),
            request.source_dir.clone().into_os_string(),
            request.destination.clone().into_os_string(),
        ]
    }
}

impl ImageMasterer for Oscdimg {
    fn master(&self, request: &MasterRequest) -> Result<(), MasterError> {
        let output = Cmd::new(&self.exe)
            .args(Self::command_args(request))
            .allow_fail()
            .run()
            .map_err(MasterError::Launch)?;
        if !output.success() {
            return Err(MasterError::Failed {
                status: output.status.to_string(),
                output: output.combined(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn request() -> MasterRequest {
        MasterRequest {
            volume_label: "MicroWin11_25H2_Eng_x64_VIO285".to_string(),
            boot: BootAssets {
                legacy: Path::new("work/extract/boot/etfsboot.com").to_path_buf(),
                uefi: Path::new("work/extract/efi/microsoft/boot/efisys.bin").to_path_buf(),
            },
            source_dir: Path::new("work/extract").to_path_buf(),
            destination: Path::new("out/MicroWin11_25H2_Eng_x64_VIO285.iso").to_path_buf(),
        }
    }

    #[test]
    fn test_boot_data_descriptor_format() {
        let descriptor = boot_data_descriptor(&request().boot);
        assert_eq!(
            descriptor,
            "2#p0,e,bwork/extract/boot/etfsboot.com\
             #pEF,e,bwork/extract/efi/microsoft/boot/efisys.bin"
        );
    }

    #[test]
    fn test_command_args_order() {
        let args = Oscdimg::command_args(&request());
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args[0], "-m");
        assert_eq!(args[1], "-o");
        assert_eq!(args[2], "-u2");
        assert_eq!(args[3], "-udfver102");
        assert_eq!(args[4], "-lMicroWin11_25H2_Eng_x64_VIO285");
        assert!(args[5].starts_with("-bootdata:2#p0,e,b"));
        assert_eq!(args[6], "work/extract");
        assert_eq!(args[7], "out/MicroWin11_25H2_Eng_x64_VIO285.iso");
    }
}
