//! Extraction and boot-asset verification phases.

use crate::error::SlipstreamError;
use crate::filesystem;
use crate::mastering::BootAssets;
use std::path::Path;

/// Legacy (BIOS) boot-sector asset, relative to the extracted tree.
pub const LEGACY_BOOT_ASSET: &str = "boot/etfsboot.com";

/// UEFI boot-sector asset, relative to the extracted tree.
pub const UEFI_BOOT_ASSET: &str = "efi/microsoft/boot/efisys.bin";

/// Bulk-copy the mounted primary tree into the extraction directory and
/// clear the read-only attribute on every copied entry.
///
/// A zero-file copy signals a copy that silently no-op'd rather than
/// erroring, and is fatal.
pub fn extract_primary_contents(
    primary_root: &Path,
    extract_dir: &Path,
) -> Result<u64, SlipstreamError> {
    let copied = filesystem::copy_tree_counting(primary_root, extract_dir)
        .map_err(|cause| SlipstreamError::Copy { cause })?;
    if copied == 0 {
        return Err(SlipstreamError::EmptyExtraction {
            source_root: primary_root.to_path_buf(),
        });
    }
    filesystem::clear_readonly_tree(extract_dir).map_err(|cause| SlipstreamError::Copy { cause })?;
    Ok(copied)
}

/// Confirm both boot-sector assets exist in the extracted tree. Without
/// both, the output image would not boot on one of the two firmware
/// modes.
pub fn verify_boot_assets(extract_dir: &Path) -> Result<BootAssets, SlipstreamError> {
    let legacy = extract_dir.join(LEGACY_BOOT_ASSET);
    if !legacy.is_file() {
        return Err(SlipstreamError::MissingBootAsset { asset: legacy });
    }
    let uefi = extract_dir.join(UEFI_BOOT_ASSET);
    if !uefi.is_file() {
        return Err(SlipstreamError::MissingBootAsset { asset: uefi });
    }
    Ok(BootAssets { legacy, uefi })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_extraction_counts_and_clears_readonly() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("root");
        let extract = temp.path().join("extract");
        touch(&root.join("sources/install.wim"));
        let locked = root.join("autorun.inf");
        touch(&locked);
        let mut permissions = fs::metadata(&locked).unwrap().permissions();
        permissions.set_readonly(true);
        fs::set_permissions(&locked, permissions).unwrap();

        let copied = extract_primary_contents(&root, &extract).unwrap();
        assert_eq!(copied, 2);
        let copy = extract.join("autorun.inf");
        assert!(!fs::metadata(&copy).unwrap().permissions().readonly());
    }

    #[test]
    fn test_zero_file_extraction_is_fatal() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("root");
        fs::create_dir_all(&root).unwrap();
        let result = extract_primary_contents(&root, &temp.path().join("extract"));
        assert!(matches!(
            result,
            Err(SlipstreamError::EmptyExtraction { .. })
        ));
    }

    #[test]
    fn test_missing_legacy_asset_is_fatal() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join(UEFI_BOOT_ASSET));
        let result = verify_boot_assets(temp.path());
        assert!(
            matches!(result, Err(SlipstreamError::MissingBootAsset { asset }) if asset.ends_with("etfsboot.com"))
        );
    }

    #[test]
    fn test_missing_uefi_asset_is_fatal() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join(LEGACY_BOOT_ASSET));
        let result = verify_boot_assets(temp.path());
        assert!(
            matches!(result, Err(SlipstreamError::MissingBootAsset { asset }) if asset.ends_with("efisys.bin"))
        );
    }

    #[test]
    fn test_both_assets_present_resolves_paths() {
        let temp = TempDir::new().unwrap();
        touch(&temp.path().join(LEGACY_BOOT_ASSET));
        touch(&temp.path().join(UEFI_BOOT_ASSET));
        let assets = verify_boot_assets(temp.path()).unwrap();
        assert!(assets.legacy.is_file());
        assert!(assets.uefi.is_file());
    }
}
