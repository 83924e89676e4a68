//! Static catalog of driver subtrees to inject into the nested images.

/// One hardware-abstraction subtree on the driver distribution media.
#[derive(Debug, Clone, Copy)]
pub struct DriverDescriptor {
    /// Path of the driver subtree relative to the driver media root.
    pub subtree: &'static str,
    /// Human-readable name for per-entry logging.
    pub display: &'static str,
}

/// Driver subtrees injected into both nested images.
///
/// The entry count is not an invariant: the pipeline iterates whatever
/// catalog it is given and skips entries missing from the media with a
/// non-fatal warning.
pub const DRIVER_CATALOG: &[DriverDescriptor] = &[
    DriverDescriptor {
        subtree: "NetKVM/w11/amd64",
        display: "NetKVM (network)",
    },
    DriverDescriptor {
        subtree: "viostor/w11/amd64",
        display: "viostor (block storage)",
    },
    DriverDescriptor {
        subtree: "vioscsi/w11/amd64",
        display: "vioscsi (SCSI passthrough)",
    },
    DriverDescriptor {
        subtree: "Balloon/w11/amd64",
        display: "Balloon (memory ballooning)",
    },
    DriverDescriptor {
        subtree: "vioserial/w11/amd64",
        display: "vioserial (serial)",
    },
    DriverDescriptor {
        subtree: "viorng/w11/amd64",
        display: "viorng (entropy source)",
    },
    DriverDescriptor {
        subtree: "vioinput/w11/amd64",
        display: "vioinput (input)",
    },
    DriverDescriptor {
        subtree: "viofs/w11/amd64",
        display: "viofs (shared filesystem)",
    },
    DriverDescriptor {
        subtree: "qxldod/w11/amd64",
        display: "qxldod (display)",
    },
    DriverDescriptor {
        subtree: "pvpanic/w11/amd64",
        display: "pvpanic (panic notification)",
    },
];
