use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use virtio_slipstream::config::{self, SlipstreamConfig};
use virtio_slipstream::detect::{self, ArtifactOverrides};
use virtio_slipstream::imaging::DismImaging;
use virtio_slipstream::mastering::Oscdimg;
use virtio_slipstream::preflight;
use virtio_slipstream::resource::ResourceLedger;
use virtio_slipstream::SlipstreamPipeline;

fn usage() -> &'static str {
    "Usage:\n  \
     virtio-slipstream build [--primary <iso>] [--drivers <iso>] [--payload <exe>]\n                          \
     [--source-dir <dir>] [--output-dir <dir>] [--work-dir <dir>] [--config <toml>]\n  \
     virtio-slipstream detect [--source-dir <dir>] [--config <toml>]"
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.split_first() {
        Some((command, rest)) if command == "build" => run_build(parse_options(rest)?),
        Some((command, rest)) if command == "detect" => run_detect(parse_options(rest)?),
        _ => bail!(usage()),
    }
}

#[derive(Default)]
struct CliOptions {
    primary: Option<PathBuf>,
    drivers: Option<PathBuf>,
    payload: Option<PathBuf>,
    source_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    work_dir: Option<PathBuf>,
    config: Option<PathBuf>,
}

fn parse_options(args: &[String]) -> Result<CliOptions> {
    let mut options = CliOptions::default();
    let mut iter = args.iter();
    while let Some(flag) = iter.next() {
        let slot = match flag.as_str() {
            "--primary" => &mut options.primary,
            "--drivers" => &mut options.drivers,
            "--payload" => &mut options.payload,
            "--source-dir" => &mut options.source_dir,
            "--output-dir" => &mut options.output_dir,
            "--work-dir" => &mut options.work_dir,
            "--config" => &mut options.config,
            other => bail!("unrecognized option '{}'\n{}", other, usage()),
        };
        let value = iter
            .next()
            .with_context(|| format!("missing value for '{}'", flag))?;
        *slot = Some(PathBuf::from(value));
    }
    Ok(options)
}

fn resolved_dirs(
    options: &CliOptions,
    config: &SlipstreamConfig,
) -> Result<(PathBuf, PathBuf, PathBuf)> {
    let cwd = std::env::current_dir().context("resolving current directory")?;
    let source_dir = options
        .source_dir
        .clone()
        .or_else(|| config.paths.source_dir.clone())
        .unwrap_or_else(|| cwd.clone());
    let output_dir = options
        .output_dir
        .clone()
        .or_else(|| config.paths.output_dir.clone())
        .unwrap_or(cwd);
    let work_dir = options
        .work_dir
        .clone()
        .or_else(|| config.paths.work_dir.clone())
        .unwrap_or_else(config::default_work_dir);
    Ok((source_dir, output_dir, work_dir))
}

/// Check availability of the host tools the run will shell out to,
/// skipping any whose location is pinned by configuration.
fn preflight_tools(config: &SlipstreamConfig) -> Result<()> {
    let pinned = |path: &Option<PathBuf>| path.is_some();
    let tools: Vec<(&str, &str)> = preflight::REQUIRED_TOOLS
        .iter()
        .filter(|(tool, _)| match *tool {
            "powershell" => !pinned(&config.tools.powershell),
            "dism" => !pinned(&config.tools.dism),
            "oscdimg" => !pinned(&config.tools.oscdimg),
            _ => true,
        })
        .copied()
        .collect();
    preflight::check_required_tools(&tools)
}

fn build_imaging(config: &SlipstreamConfig) -> Result<DismImaging> {
    let powershell = match &config.tools.powershell {
        Some(path) => path.clone(),
        None => which::which("powershell")
            .or_else(|_| which::which("pwsh"))
            .context("locating powershell (install Windows PowerShell or pwsh)")?,
    };
    let dism = match &config.tools.dism {
        Some(path) => path.clone(),
        None => which::which("dism").context("locating dism (install the Windows ADK)")?,
    };
    Ok(DismImaging::new(powershell, dism))
}

fn build_masterer(config: &SlipstreamConfig) -> Result<Oscdimg> {
    match &config.tools.oscdimg {
        Some(exe) => Ok(Oscdimg::new(exe.clone())),
        None => Oscdimg::discover(),
    }
}

fn run_build(options: CliOptions) -> Result<()> {
    let config = config::load(options.config.as_deref())?;
    preflight_tools(&config)?;
    let (source_dir, output_dir, work_dir) = resolved_dirs(&options, &config)?;

    let imaging = build_imaging(&config)?;
    let masterer = build_masterer(&config)?;

    let overrides = ArtifactOverrides {
        primary: options.primary,
        driver: options.drivers,
        payload: options.payload,
    };
    let mut ledger = ResourceLedger::new();
    let artifacts = detect::select_artifacts(&imaging, &mut ledger, &source_dir, &overrides)?;

    println!("Inputs:");
    println!("  primary: {}", artifacts.primary.path.display());
    println!(
        "  drivers: {} (version {})",
        artifacts.driver.path.display(),
        artifacts.driver.version
    );
    match &artifacts.payload {
        Some(payload) => println!(
            "  payload: {} (version {})",
            payload.path.display(),
            payload.version
        ),
        None => println!("  payload: none"),
    }

    let pipeline = SlipstreamPipeline::new(&imaging, &masterer);
    let artifact = pipeline.run(&artifacts, &work_dir, &output_dir)?;
    println!("Output: {}", artifact.path.display());
    Ok(())
}

fn run_detect(options: CliOptions) -> Result<()> {
    let config = config::load(options.config.as_deref())?;
    let (source_dir, _, _) = resolved_dirs(&options, &config)?;
    let imaging = build_imaging(&config)?;

    let mut ledger = ResourceLedger::new();
    let artifacts = detect::select_artifacts(
        &imaging,
        &mut ledger,
        &source_dir,
        &ArtifactOverrides::default(),
    )?;

    println!("Detected in '{}':", source_dir.display());
    println!("  primary: {}", artifacts.primary.path.display());
    println!(
        "  drivers: {} (version {})",
        artifacts.driver.path.display(),
        artifacts.driver.version
    );
    match &artifacts.payload {
        Some(payload) => println!(
            "  payload: {} (version {})",
            payload.path.display(),
            payload.version
        ),
        None => println!("  payload: none"),
    }
    Ok(())
}
