//! Optional TOML configuration.
//!
//! Everything has a working default; the config file only overrides where
//! artifacts are looked for, where intermediate and output files go, and
//! where the external tools live.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Default config filename, looked up in the current directory when no
/// explicit path is given.
pub const CONFIG_FILENAME: &str = "slipstream.toml";

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SlipstreamConfig {
    pub paths: PathsConfig,
    pub tools: ToolsConfig,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PathsConfig {
    /// Directory scanned for candidate artifacts.
    pub source_dir: Option<PathBuf>,
    /// Working directory claimed by the run.
    pub work_dir: Option<PathBuf>,
    /// Directory the output image is written to.
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ToolsConfig {
    pub powershell: Option<PathBuf>,
    pub dism: Option<PathBuf>,
    pub oscdimg: Option<PathBuf>,
}

/// Load configuration.
///
/// An explicit path must exist and parse. Without one, a `slipstream.toml`
/// in the current directory is used when present, else defaults.
pub fn load(explicit: Option<&Path>) -> Result<SlipstreamConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let implicit = PathBuf::from(CONFIG_FILENAME);
            if !implicit.is_file() {
                return Ok(SlipstreamConfig::default());
            }
            implicit
        }
    };
    parse_file(&path)
}

fn parse_file(path: &Path) -> Result<SlipstreamConfig> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading config '{}'", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing config '{}'", path.display()))
}

/// Default working directory, under the user cache directory.
pub fn default_work_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("virtio-slipstream")
        .join("work")
}
