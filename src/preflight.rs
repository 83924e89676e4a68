//! Preflight checks for host tool validation.
//!
//! Validates that the imaging and mastering tools exist before a run
//! starts. This prevents cryptic errors after sources are already mounted.

use anyhow::{bail, Result};

/// Check if a command exists on the host system.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Required host tools. Each tuple is (command_name, where_to_get_it).
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[
    ("powershell", "Windows PowerShell"),
    ("dism", "Windows ADK / DISM"),
    ("oscdimg", "Windows ADK deployment tools"),
];

/// Check that specific tools are available.
///
/// # Returns
///
/// * `Ok(())` if all tools are found
/// * `Err` listing the missing tools and where to get them
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let mut missing = Vec::new();

    for (tool, package) in tools {
        if !command_exists(tool) {
            missing.push((*tool, *package));
        }
    }

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}

/// Check that all standard tools in [`REQUIRED_TOOLS`] are available.
pub fn check_host_tools() -> Result<()> {
    check_required_tools(REQUIRED_TOOLS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_exists() {
        assert!(command_exists("ls"));
        assert!(!command_exists("definitely_not_a_real_command_12345"));
    }

    #[test]
    fn test_missing_tools_are_listed() {
        let err = check_required_tools(&[("definitely_not_a_real_command_12345", "nowhere")])
            .unwrap_err();
        assert!(err.to_string().contains("definitely_not_a_real_command_12345"));
        assert!(err.to_string().contains("nowhere"));
    }

    #[test]
    fn test_empty_tool_list_passes() {
        check_required_tools(&[]).unwrap();
    }
}
