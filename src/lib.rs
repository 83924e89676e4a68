//! Infrastructure for rebuilding Windows installer ISOs with VirtIO drivers
//! slipstreamed into the nested install and boot images.
//!
//! The crate is organized around one orchestration pipeline and a small set
//! of leaf components it consumes:
//!
//! - **Artifact detection** - classifies candidate media by probing mounted
//!   contents and selects the best candidate per role
//! - **Resource ledger** - tracks every acquired mount and guarantees
//!   reverse-order release on every exit path
//! - **Injection pipeline** - the phase state machine driving the
//!   mount/extract/inject/build sequence
//! - **Output naming** - deterministic, length-bounded volume names
//!
//! # Architecture
//!
//! ```text
//! virtio-slipstream
//!     │
//!     ├── detect    ── classify candidates, resolve the three input roles
//!     ├── resource  ── ledger of acquired mounts, reverse-order release
//!     ├── pipeline  ── MountSources → … → BuildOutputArtifact → Finalize
//!     ├── naming    ── {product}_{release}_{lang}_{arch}_VIO{token}
//!     │
//!     ├── imaging   ── OS imaging service boundary (PowerShell / dism)
//!     └── mastering ── image-mastering tool boundary (oscdimg)
//! ```
//!
//! The imaging service and the mastering tool are external collaborators;
//! this crate only speaks to them through the [`imaging::ImagingService`]
//! and [`mastering::ImageMasterer`] traits and never parses image formats
//! itself.

pub mod catalog;
pub mod config;
pub mod detect;
pub mod error;
pub mod filesystem;
pub mod imaging;
pub mod manifest;
pub mod mastering;
pub mod naming;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod resource;
pub mod version;

pub use catalog::{DriverDescriptor, DRIVER_CATALOG};
pub use detect::{select_artifacts, ArtifactOverrides, ArtifactRole, SelectedArtifacts};
pub use error::SlipstreamError;
pub use pipeline::{OutputArtifact, Phase, SlipstreamPipeline};
pub use resource::ResourceLedger;
pub use version::DriverVersion;
