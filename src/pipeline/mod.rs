//! The driver-injection phase state machine.
//!
//! Phases execute in a fixed sequence with no backward transitions and
//! terminate on the first fatal error:
//!
//! ```text
//! MountSources → ExtractPrimaryContents → VerifyBootAssets
//!   → InjectInstallationImage → EmbedPostInstallPayload (optional)
//!   → InjectBootEnvironmentImage → BuildOutputArtifact → Finalize
//! ```
//!
//! Every acquired mount goes through the [`ResourceLedger`]; a single
//! unconditional release pass after the phase sequence, plus the finalize
//! step, reach zero held resources on every exit path. On fatal failure
//! the working directory is retained for inspection.

pub mod context;
pub mod extract;
pub mod inject;

use crate::catalog::{DriverDescriptor, DRIVER_CATALOG};
use crate::detect::SelectedArtifacts;
use crate::error::SlipstreamError;
use crate::filesystem;
use crate::imaging::ImagingService;
use crate::mastering::{ImageMasterer, MasterError, MasterRequest};
use crate::naming;
use crate::resource::{ReleaseAction, ResourceHandle, ResourceLedger};
use anyhow::anyhow;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub use context::PipelineContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    MountSources,
    ExtractPrimaryContents,
    VerifyBootAssets,
    InjectInstallationImage,
    EmbedPostInstallPayload,
    InjectBootEnvironmentImage,
    BuildOutputArtifact,
    Finalize,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::MountSources => "MountSources",
            Phase::ExtractPrimaryContents => "ExtractPrimaryContents",
            Phase::VerifyBootAssets => "VerifyBootAssets",
            Phase::InjectInstallationImage => "InjectInstallationImage",
            Phase::EmbedPostInstallPayload => "EmbedPostInstallPayload",
            Phase::InjectBootEnvironmentImage => "InjectBootEnvironmentImage",
            Phase::BuildOutputArtifact => "BuildOutputArtifact",
            Phase::Finalize => "Finalize",
        };
        write!(f, "{}", name)
    }
}

/// The produced image. Exists only after full pipeline success.
#[derive(Debug, Clone)]
pub struct OutputArtifact {
    /// Volume label / file stem, at most 32 characters.
    pub name: String,
    pub path: PathBuf,
}

/// One end-to-end transformation over resolved input artifacts.
pub struct SlipstreamPipeline<'a> {
    imaging: &'a dyn ImagingService,
    masterer: &'a dyn ImageMasterer,
    catalog: &'a [DriverDescriptor],
}

impl<'a> SlipstreamPipeline<'a> {
    pub fn new(imaging: &'a dyn ImagingService, masterer: &'a dyn ImageMasterer) -> Self {
        Self {
            imaging,
            masterer,
            catalog: DRIVER_CATALOG,
        }
    }

    pub fn with_catalog(mut self, catalog: &'a [DriverDescriptor]) -> Self {
        self.catalog = catalog;
        self
    }

    /// Run the full phase sequence. Regardless of the outcome, every
    /// resource acquired along the way is released before this returns.
    pub fn run(
        &self,
        artifacts: &SelectedArtifacts,
        work_dir: &Path,
        output_dir: &Path,
    ) -> Result<OutputArtifact, SlipstreamError> {
        let mut ctx = PipelineContext::claim(work_dir)
            .map_err(|cause| SlipstreamError::Workspace { cause })?;
        let mut ledger = ResourceLedger::new();

        let result = self.run_phases(&mut ctx, &mut ledger, artifacts, output_dir);

        // Unconditional cleanup pass: every exit path goes through here.
        let report = ledger.release_all(self.imaging);
        for (label, err) in &report.failures {
            eprintln!("warning: releasing {}: {:#}", label, err);
        }

        let failed_phase = result.as_ref().err().and_then(|err| err.phase());
        if result.is_err() {
            ctx.retain_work_dir = true;
        }
        if let Err(err) = ctx.finalize(failed_phase) {
            eprintln!("warning: finalizing working directory: {:#}", err);
        }

        result
    }

    fn run_phases(
        &self,
        ctx: &mut PipelineContext,
        ledger: &mut ResourceLedger,
        artifacts: &SelectedArtifacts,
        output_dir: &Path,
    ) -> Result<OutputArtifact, SlipstreamError> {
        ctx.enter_phase(Phase::MountSources);
        let driver_root = self.attach_tracked(ledger, &artifacts.driver.path)?;
        println!("  driver media at {}", driver_root.display());
        let primary_root = self.attach_tracked(ledger, &artifacts.primary.path)?;
        println!("  installer media at {}", primary_root.display());

        ctx.enter_phase(Phase::ExtractPrimaryContents);
        let copied = extract::extract_primary_contents(&primary_root, &ctx.extract_dir)?;
        println!("  copied {} files", copied);

        ctx.enter_phase(Phase::VerifyBootAssets);
        let boot_assets = extract::verify_boot_assets(&ctx.extract_dir)?;
        println!("  legacy and UEFI boot assets present");

        ctx.enter_phase(Phase::InjectInstallationImage);
        let install_image = ctx.extract_dir.join(inject::INSTALL_IMAGE);
        let install_index =
            self.first_image_index(&install_image, Phase::InjectInstallationImage)?;
        let install_mount = ctx.install_mount_dir();
        let handle = self.mount_nested_tracked(
            ledger,
            &install_image,
            install_index,
            &install_mount,
            Phase::InjectInstallationImage,
        )?;
        let summary =
            inject::inject_driver_catalog(self.imaging, &driver_root, &install_mount, self.catalog)
                .map_err(|cause| SlipstreamError::Failed {
                    phase: Phase::InjectInstallationImage,
                    cause,
                })?;
        println!(
            "  injected {} catalog entries, skipped {}",
            summary.injected, summary.skipped
        );
        self.commit_tracked(ledger, handle, Phase::InjectInstallationImage)?;

        if let Some(payload) = &artifacts.payload {
            ctx.enter_phase(Phase::EmbedPostInstallPayload);
            let handle = self.mount_nested_tracked(
                ledger,
                &install_image,
                install_index,
                &install_mount,
                Phase::EmbedPostInstallPayload,
            )?;
            inject::embed_payload_files(&install_mount, &payload.path).map_err(|cause| {
                SlipstreamError::Failed {
                    phase: Phase::EmbedPostInstallPayload,
                    cause,
                }
            })?;
            println!("  payload staged for post-setup installation");
            self.commit_tracked(ledger, handle, Phase::EmbedPostInstallPayload)?;
        }

        ctx.enter_phase(Phase::InjectBootEnvironmentImage);
        let boot_image = ctx.extract_dir.join(inject::BOOT_IMAGE);
        let boot_mount = ctx.boot_mount_dir();
        let handle = self.mount_nested_tracked(
            ledger,
            &boot_image,
            inject::BOOT_SETUP_INDEX,
            &boot_mount,
            Phase::InjectBootEnvironmentImage,
        )?;
        let summary =
            inject::inject_driver_catalog(self.imaging, &driver_root, &boot_mount, self.catalog)
                .map_err(|cause| SlipstreamError::Failed {
                    phase: Phase::InjectBootEnvironmentImage,
                    cause,
                })?;
        println!(
            "  injected {} catalog entries, skipped {}",
            summary.injected, summary.skipped
        );
        self.commit_tracked(ledger, handle, Phase::InjectBootEnvironmentImage)?;

        ctx.enter_phase(Phase::BuildOutputArtifact);
        let name = naming::compute_name(
            &file_name_of(&artifacts.primary.path),
            &file_name_of(&artifacts.driver.path),
        );
        if name.truncated {
            eprintln!(
                "warning: output name clamped to {} characters: {}",
                naming::MAX_NAME_LEN,
                name.name
            );
        }
        fs::create_dir_all(output_dir).map_err(|err| SlipstreamError::Failed {
            phase: Phase::BuildOutputArtifact,
            cause: anyhow!(err).context(format!(
                "creating output directory '{}'",
                output_dir.display()
            )),
        })?;
        let destination = output_dir.join(name.file_name());
        let request = MasterRequest {
            volume_label: name.volume_label().to_string(),
            boot: boot_assets,
            source_dir: ctx.extract_dir.clone(),
            destination: destination.clone(),
        };
        self.masterer.master(&request).map_err(|err| match err {
            MasterError::Failed { status, output } => SlipstreamError::Build { status, output },
            MasterError::Launch(cause) => SlipstreamError::Failed {
                phase: Phase::BuildOutputArtifact,
                cause,
            },
        })?;

        let digest =
            filesystem::sha256_file(&destination).map_err(|cause| SlipstreamError::Failed {
                phase: Phase::BuildOutputArtifact,
                cause,
            })?;
        let checksum_path = destination.with_extension("iso.sha256");
        fs::write(&checksum_path, format!("{}  {}\n", digest, name.file_name())).map_err(
            |err| SlipstreamError::Failed {
                phase: Phase::BuildOutputArtifact,
                cause: anyhow!(err)
                    .context(format!("writing checksum '{}'", checksum_path.display())),
            },
        )?;
        println!("  Wrote: {}", destination.display());

        Ok(OutputArtifact {
            name: name.name,
            path: destination,
        })
    }

    fn attach_tracked(
        &self,
        ledger: &mut ResourceLedger,
        image: &Path,
    ) -> Result<PathBuf, SlipstreamError> {
        let root = self
            .imaging
            .attach_container(image)
            .map_err(|cause| SlipstreamError::Mount {
                phase: Phase::MountSources,
                cause,
            })?;
        ledger.track(
            format!("container mount of '{}'", image.display()),
            ReleaseAction::DetachContainer {
                image: image.to_path_buf(),
            },
        );
        Ok(root)
    }

    fn mount_nested_tracked(
        &self,
        ledger: &mut ResourceLedger,
        image: &Path,
        index: u32,
        mount_dir: &Path,
        phase: Phase,
    ) -> Result<ResourceHandle, SlipstreamError> {
        fs::create_dir_all(mount_dir).map_err(|err| SlipstreamError::Mount {
            phase,
            cause: anyhow!(err).context(format!("creating mount dir '{}'", mount_dir.display())),
        })?;
        self.imaging
            .mount_nested(image, index, mount_dir)
            .map_err(|cause| SlipstreamError::Mount { phase, cause })?;
        Ok(ledger.track(
            format!("nested image '{}' index {}", image.display(), index),
            ReleaseAction::UnmountNested {
                mount_dir: mount_dir.to_path_buf(),
            },
        ))
    }

    /// Commit and unmount on the success path of an injection phase.
    fn commit_tracked(
        &self,
        ledger: &mut ResourceLedger,
        handle: ResourceHandle,
        phase: Phase,
    ) -> Result<(), SlipstreamError> {
        ledger
            .release_committing(self.imaging, handle)
            .map_err(|cause| SlipstreamError::Mount { phase, cause })
    }

    fn first_image_index(&self, image: &Path, phase: Phase) -> Result<u32, SlipstreamError> {
        let indexes = self
            .imaging
            .nested_image_indexes(image)
            .map_err(|cause| SlipstreamError::Mount { phase, cause })?;
        indexes
            .first()
            .copied()
            .ok_or_else(|| SlipstreamError::Mount {
                phase,
                cause: anyhow!("no image indexes reported for '{}'", image.display()),
            })
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{ArtifactRole, DetectedType, SourceArtifact};
    use crate::imaging::fake::FakeImaging;
    use crate::manifest::RunManifest;
    use crate::version::DriverVersion;
    use std::cell::RefCell;
    use tempfile::TempDir;

    struct FakeMasterer {
        fail: bool,
        calls: RefCell<Vec<MasterRequest>>,
    }

    impl FakeMasterer {
        fn new() -> Self {
            Self {
                fail: false,
                calls: RefCell::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl ImageMasterer for FakeMasterer {
        fn master(&self, request: &MasterRequest) -> Result<(), MasterError> {
            self.calls.borrow_mut().push(request.clone());
            if self.fail {
                return Err(MasterError::Failed {
                    status: "exit code: 1".to_string(),
                    output: "ERROR: boot sector file rejected".to_string(),
                });
            }
            fs::write(&request.destination, b"mastered-image")
                .map_err(|err| MasterError::Launch(anyhow!(err)))?;
            Ok(())
        }
    }

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    struct Fixture {
        temp: TempDir,
        imaging: FakeImaging,
        artifacts: SelectedArtifacts,
    }

    impl Fixture {
        /// Standard happy-path media: full installer tree with both boot
        /// assets, driver media with two catalog subtrees present.
        fn new(with_payload: bool, with_legacy_boot_asset: bool) -> Self {
            let temp = TempDir::new().unwrap();
            let imaging = FakeImaging::new();

            let primary = temp.path().join("MicroWin11_25H2_English_x64.iso");
            touch(&primary);
            let primary_root = temp.path().join("primary-root");
            touch(&primary_root.join("setup.exe"));
            touch(&primary_root.join("sources/install.wim"));
            touch(&primary_root.join("sources/boot.wim"));
            if with_legacy_boot_asset {
                touch(&primary_root.join(extract::LEGACY_BOOT_ASSET));
            }
            touch(&primary_root.join(extract::UEFI_BOOT_ASSET));
            imaging.map_container(&primary, &primary_root);

            let driver = temp.path().join("virtio-win-0.1.285.iso");
            touch(&driver);
            let driver_root = temp.path().join("driver-root");
            touch(&driver_root.join("NetKVM/w11/amd64/netkvm.inf"));
            touch(&driver_root.join("viostor/w11/amd64/viostor.inf"));
            imaging.map_container(&driver, &driver_root);

            let payload = if with_payload {
                let exe = temp.path().join("virtio-win-guest-tools.exe");
                touch(&exe);
                Some(SourceArtifact {
                    path: exe,
                    role: ArtifactRole::PayloadExecutable,
                    detected: DetectedType::Unknown,
                    version: DriverVersion::parse("0.1.285"),
                })
            } else {
                None
            };

            let artifacts = SelectedArtifacts {
                primary: SourceArtifact {
                    path: primary,
                    role: ArtifactRole::PrimaryImage,
                    detected: DetectedType::InstallMedia,
                    version: DriverVersion::zero(),
                },
                driver: SourceArtifact {
                    path: driver,
                    role: ArtifactRole::DriverImage,
                    detected: DetectedType::DriverMedia,
                    version: DriverVersion::parse("0.1.285"),
                },
                payload,
            };

            Self {
                temp,
                imaging,
                artifacts,
            }
        }

        fn work_dir(&self) -> PathBuf {
            self.temp.path().join("work")
        }

        fn output_dir(&self) -> PathBuf {
            self.temp.path().join("out")
        }
    }

    #[test]
    fn test_full_success_without_payload() {
        let fixture = Fixture::new(false, true);
        let masterer = FakeMasterer::new();
        let pipeline = SlipstreamPipeline::new(&fixture.imaging, &masterer);

        let artifact = pipeline
            .run(&fixture.artifacts, &fixture.work_dir(), &fixture.output_dir())
            .unwrap();

        assert_eq!(artifact.name, "MicroWin11_25H2_Eng_x64_VIO285");
        assert!(artifact.path.is_file());
        assert!(fixture
            .output_dir()
            .join("MicroWin11_25H2_Eng_x64_VIO285.iso.sha256")
            .is_file());
        // Working directory deleted on success.
        assert!(!fixture.work_dir().exists());

        // Embed phase skipped: only the install and boot images were
        // mounted, and both commits happened.
        assert_eq!(fixture.imaging.count_events("mount "), 2);
        assert_eq!(fixture.imaging.count_events("unmount install commit"), 1);
        assert_eq!(fixture.imaging.count_events("unmount boot commit"), 1);

        // Containers detached in reverse acquisition order.
        let events = fixture.imaging.events();
        let detaches: Vec<&String> =
            events.iter().filter(|e| e.starts_with("detach")).collect();
        assert_eq!(
            detaches,
            vec![
                "detach MicroWin11_25H2_English_x64.iso",
                "detach virtio-win-0.1.285.iso"
            ]
        );
        // Nothing was discarded on the success path.
        assert_eq!(fixture.imaging.count_events("unmount install discard"), 0);
        assert_eq!(fixture.imaging.count_events("unmount boot discard"), 0);
    }

    #[test]
    fn test_payload_embeds_through_a_second_mount_session() {
        let fixture = Fixture::new(true, true);
        let masterer = FakeMasterer::new();
        let pipeline = SlipstreamPipeline::new(&fixture.imaging, &masterer);

        pipeline
            .run(&fixture.artifacts, &fixture.work_dir(), &fixture.output_dir())
            .unwrap();

        // install (inject), install (embed), boot (inject).
        assert_eq!(fixture.imaging.count_events("mount install.wim"), 2);
        assert_eq!(fixture.imaging.count_events("mount boot.wim"), 1);
        assert_eq!(fixture.imaging.count_events("unmount install commit"), 2);
    }

    #[test]
    fn test_boot_environment_uses_the_setup_index() {
        let fixture = Fixture::new(false, true);
        let masterer = FakeMasterer::new();
        let pipeline = SlipstreamPipeline::new(&fixture.imaging, &masterer);

        pipeline
            .run(&fixture.artifacts, &fixture.work_dir(), &fixture.output_dir())
            .unwrap();

        let events = fixture.imaging.events();
        // install.wim at its first reported index, boot.wim at the fixed
        // setup-environment index.
        assert!(events.iter().any(|e| e.starts_with("mount install.wim #1")));
        assert!(events.iter().any(|e| e.starts_with("mount boot.wim #2")));
    }

    #[test]
    fn test_missing_legacy_boot_asset_aborts_and_retains() {
        let fixture = Fixture::new(false, false);
        let masterer = FakeMasterer::new();
        let pipeline = SlipstreamPipeline::new(&fixture.imaging, &masterer);

        let err = pipeline
            .run(&fixture.artifacts, &fixture.work_dir(), &fixture.output_dir())
            .unwrap_err();

        assert!(matches!(err, SlipstreamError::MissingBootAsset { .. }));
        assert_eq!(err.phase(), Some(Phase::VerifyBootAssets));

        // Extraction ran before verification; the tree is retained.
        assert!(fixture
            .work_dir()
            .join("extract/sources/install.wim")
            .is_file());
        let manifest = RunManifest::load(&fixture.work_dir()).unwrap();
        assert_eq!(manifest.status, "failed");
        assert_eq!(manifest.failed_phase.as_deref(), Some("VerifyBootAssets"));

        // Build never ran, no output artifact was created.
        assert!(masterer.calls.borrow().is_empty());
        assert!(!fixture.output_dir().exists());

        // Zero mounted resources remain: both containers were attached
        // and both were detached; no nested image was ever mounted.
        assert_eq!(fixture.imaging.count_events("attach"), 2);
        assert_eq!(fixture.imaging.count_events("detach"), 2);
        assert_eq!(fixture.imaging.count_events("mount "), 0);
    }

    #[test]
    fn test_mastering_failure_surfaces_tool_output() {
        let fixture = Fixture::new(false, true);
        let masterer = FakeMasterer::failing();
        let pipeline = SlipstreamPipeline::new(&fixture.imaging, &masterer);

        let err = pipeline
            .run(&fixture.artifacts, &fixture.work_dir(), &fixture.output_dir())
            .unwrap_err();

        match &err {
            SlipstreamError::Build { output, .. } => {
                assert!(output.contains("boot sector file rejected"));
            }
            other => panic!("expected Build error, got {other:?}"),
        }
        assert_eq!(err.phase(), Some(Phase::BuildOutputArtifact));
        // Retained for inspection, mounts all released.
        assert!(fixture.work_dir().exists());
        assert_eq!(
            fixture.imaging.count_events("attach"),
            fixture.imaging.count_events("detach")
        );
    }

    #[test]
    fn test_attach_failure_releases_the_mounts_already_held() {
        let fixture = Fixture::new(false, true);
        fixture.imaging.refuse_attach(&fixture.artifacts.primary.path);
        let masterer = FakeMasterer::new();
        let pipeline = SlipstreamPipeline::new(&fixture.imaging, &masterer);

        let err = pipeline
            .run(&fixture.artifacts, &fixture.work_dir(), &fixture.output_dir())
            .unwrap_err();

        assert!(matches!(
            err,
            SlipstreamError::Mount {
                phase: Phase::MountSources,
                ..
            }
        ));
        // The driver container had been attached first and must be the
        // one detached by the cleanup pass.
        assert_eq!(fixture.imaging.count_events("attach"), 1);
        assert_eq!(fixture.imaging.count_events("detach"), 1);
    }

    #[test]
    fn test_empty_primary_media_is_fatal() {
        let fixture = Fixture::new(false, true);
        // Replace the primary root with an empty directory.
        let empty_root = fixture.temp.path().join("empty-root");
        fs::create_dir_all(&empty_root).unwrap();
        fixture
            .imaging
            .map_container(&fixture.artifacts.primary.path, &empty_root);
        let masterer = FakeMasterer::new();
        let pipeline = SlipstreamPipeline::new(&fixture.imaging, &masterer);

        let err = pipeline
            .run(&fixture.artifacts, &fixture.work_dir(), &fixture.output_dir())
            .unwrap_err();
        assert!(matches!(err, SlipstreamError::EmptyExtraction { .. }));
        assert_eq!(err.phase(), Some(Phase::ExtractPrimaryContents));
    }

    #[test]
    fn test_missing_boot_image_fails_the_boot_environment_phase() {
        let fixture = Fixture::new(false, true);
        // Delete boot.wim from the primary media so the extracted tree
        // has no boot image and InjectBootEnvironmentImage fails to mount.
        fs::remove_file(
            fixture
                .temp
                .path()
                .join("primary-root")
                .join(inject::BOOT_IMAGE),
        )
        .unwrap();
        let masterer = FakeMasterer::new();
        let pipeline = SlipstreamPipeline::new(&fixture.imaging, &masterer);

        let err = pipeline
            .run(&fixture.artifacts, &fixture.work_dir(), &fixture.output_dir())
            .unwrap_err();
        assert!(matches!(
            err,
            SlipstreamError::Mount {
                phase: Phase::InjectBootEnvironmentImage,
                ..
            }
        ));
        // The install image was still committed on its own success path.
        assert_eq!(fixture.imaging.count_events("unmount install commit"), 1);
        assert!(masterer.calls.borrow().is_empty());
    }
}
