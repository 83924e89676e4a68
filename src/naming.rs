//! Output name derivation.
//!
//! The output name is composed from structured fields of the primary
//! artifact name and a compact version token from the driver artifact name:
//! `{product}_{release}_{lang}_{arch}_VIO{token}`. The target naming scheme
//! caps volume labels at 32 characters, so longer compositions are clamped.

use crate::version::dotted_digit_runs;

/// Hard cap of the target volume-label scheme.
pub const MAX_NAME_LEN: usize = 32;

/// Token used when no version pattern matches the driver name.
const VERSION_PLACEHOLDER: &str = "UNK";

/// Closed lookup table for language-tag abbreviation. Unrecognized tags
/// fall back to truncation; extending the table does not change the
/// matching algorithm.
const LANGUAGE_ABBREVIATIONS: &[(&str, &str)] = &[
    ("English", "Eng"),
    ("German", "Ger"),
    ("French", "Fre"),
    ("Spanish", "Spa"),
    ("Italian", "Ita"),
    ("Portuguese", "Por"),
    ("Dutch", "Dut"),
    ("Polish", "Pol"),
    ("Russian", "Rus"),
    ("Japanese", "Jpn"),
    ("Korean", "Kor"),
    ("Chinese", "Chs"),
];

/// A composed output name, clamped to [`MAX_NAME_LEN`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputName {
    pub name: String,
    /// True when the composition exceeded the cap and was clamped.
    /// Truncation is lossy and may straddle a field; accepted behavior.
    pub truncated: bool,
}

impl OutputName {
    pub fn file_name(&self) -> String {
        format!("{}.iso", self.name)
    }

    pub fn volume_label(&self) -> &str {
        &self.name
    }
}

/// Compose the output name from the two input artifact names.
///
/// Falls back to `{primary stem}_VIO{token}` when the primary name does not
/// match the `{product}_{release}_{language}_{arch}` convention.
pub fn compute_name(primary_name: &str, driver_name: &str) -> OutputName {
    let token = version_token(driver_name);
    let stem = strip_media_extension(primary_name);
    let composed = match parse_primary_fields(stem) {
        Some(fields) => format!(
            "{}_{}_{}_{}_VIO{}",
            fields.product,
            fields.release,
            abbreviate_language(fields.language),
            fields.arch,
            token
        ),
        None => format!("{}_VIO{}", stem, token),
    };
    clamp(composed)
}

struct PrimaryFields<'a> {
    product: &'a str,
    release: &'a str,
    language: &'a str,
    arch: &'a str,
}

/// The recognized convention is exactly four non-empty `_`-separated fields.
fn parse_primary_fields(stem: &str) -> Option<PrimaryFields<'_>> {
    let mut parts = stem.split('_');
    let product = parts.next()?;
    let release = parts.next()?;
    let language = parts.next()?;
    let arch = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    if [product, release, language, arch].iter().any(|p| p.is_empty()) {
        return None;
    }
    Some(PrimaryFields {
        product,
        release,
        language,
        arch,
    })
}

fn abbreviate_language(tag: &str) -> String {
    for (language, abbreviation) in LANGUAGE_ABBREVIATIONS {
        if tag.eq_ignore_ascii_case(language) {
            return (*abbreviation).to_string();
        }
    }
    tag.chars().take(3).collect()
}

/// Ordered pattern matchers over the driver name, first match wins:
/// trailing `maj.min.build` suffix, then any patch component, then the
/// fixed placeholder.
fn version_token(driver_name: &str) -> String {
    let stem = strip_media_extension(driver_name);
    trailing_build_token(stem)
        .or_else(|| patch_component_token(stem))
        .unwrap_or_else(|| VERSION_PLACEHOLDER.to_string())
}

/// Most-specific pattern: the name ends in a dotted run of at least three
/// numeric components; the token is the final component.
fn trailing_build_token(stem: &str) -> Option<String> {
    let run: String = stem
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    let run = run.trim_matches('.');
    let components: Vec<&str> = run.split('.').collect();
    if components.len() < 3 || components.iter().any(|c| c.parse::<u32>().is_err()) {
        return None;
    }
    components.last().map(|c| (*c).to_string())
}

/// Fallback pattern: the patch component of the first dotted triple found
/// anywhere in the name.
fn patch_component_token(stem: &str) -> Option<String> {
    for run in dotted_digit_runs(stem) {
        let components: Vec<&str> = run.split('.').collect();
        if components.len() >= 3 && components.iter().all(|c| c.parse::<u32>().is_ok()) {
            return Some(components[2].to_string());
        }
    }
    None
}

fn strip_media_extension(name: &str) -> &str {
    for extension in [".iso", ".img", ".exe"] {
        if name.len() <= extension.len() {
            continue;
        }
        let split = name.len() - extension.len();
        if name.is_char_boundary(split) && name[split..].eq_ignore_ascii_case(extension) {
            return &name[..split];
        }
    }
    name
}

fn clamp(composed: String) -> OutputName {
    if composed.chars().count() <= MAX_NAME_LEN {
        return OutputName {
            name: composed,
            truncated: false,
        };
    }
    OutputName {
        name: composed.chars().take(MAX_NAME_LEN).collect(),
        truncated: true,
    }
}
