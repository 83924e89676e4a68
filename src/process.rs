//! Thin wrapper over `std::process::Command` with captured output and
//! uniform error reporting for external tool invocations.

use anyhow::{bail, Context, Result};
use std::ffi::{OsStr, OsString};
use std::path::Path;
use std::process::{Command, ExitStatus};

/// A command to run with captured stdout/stderr.
pub struct Cmd {
    program: OsString,
    args: Vec<OsString>,
    allow_fail: bool,
    error_msg: Option<String>,
}

/// Captured result of a finished command.
pub struct CmdOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Stdout and stderr concatenated, for surfacing tool output verbatim.
    pub fn combined(&self) -> String {
        let mut combined = String::new();
        if !self.stdout.trim().is_empty() {
            combined.push_str(self.stdout.trim_end());
        }
        if !self.stderr.trim().is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(self.stderr.trim_end());
        }
        combined
    }
}

impl Cmd {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            allow_fail: false,
            error_msg: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn arg_path(self, path: &Path) -> Self {
        self.arg(path.as_os_str())
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_os_string());
        }
        self
    }

    /// A non-zero exit becomes part of the returned `CmdOutput` instead of
    /// an error.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Message to lead the error with when the command fails.
    pub fn error_msg(mut self, msg: impl Into<String>) -> Self {
        self.error_msg = Some(msg.into());
        self
    }

    /// Run the command to completion, capturing output.
    pub fn run(self) -> Result<CmdOutput> {
        let program = self.program.to_string_lossy().into_owned();
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .with_context(|| format!("spawning '{}'", program))?;

        let result = CmdOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !result.success() && !self.allow_fail {
            let detail = result.combined();
            match self.error_msg {
                Some(msg) => bail!("{}\n{}", msg, detail),
                None => bail!("'{}' failed (exit: {})\n{}", program, result.status, detail),
            }
        }

        Ok(result)
    }
}
