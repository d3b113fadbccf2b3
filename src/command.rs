use anyhow::{Context, Result};
use log::debug;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Output, Stdio};

/// Runs the external tools the bisection drives: git, gclient, the build
/// system and the user-supplied performance test command.
///
/// Two execution modes cover every call site: [`CommandRunner::run`]
/// captures stdout/stderr for parsing (revision lists, metric output), and
/// [`CommandRunner::run_streaming`] inherits the parent's stdio so build and
/// sync progress stays visible on the console.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    /// Working directory for spawned processes
    working_dir: Option<PathBuf>,
    /// Extra environment variables
    env_vars: Vec<(String, String)>,
    /// Label used in place of the raw command line when reporting errors
    label: Option<String>,
}

impl CommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// A runner whose processes spawn in `dir`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            working_dir: Some(dir.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    /// Override the working directory
    pub fn working_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Add an environment variable for spawned processes
    pub fn env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    /// Set a label used in place of the raw command line in error messages
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Run a command to completion, capturing stdout and stderr.
    ///
    /// A non-zero exit status is an error; use [`CommandRunner::run_unchecked`]
    /// when the caller wants to inspect the status itself.
    pub fn run(&self, cmd: &str, args: &[&str]) -> Result<Output> {
        let output = self.run_unchecked(cmd, args)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "Command failed with status {}: {}\nStderr: {}",
                output.status.code().unwrap_or(-1),
                self.describe(cmd, args),
                stderr.trim_end()
            );
        }

        Ok(output)
    }

    /// Run a command to completion, capturing output, without treating a
    /// non-zero exit status as an error.
    pub fn run_unchecked(&self, cmd: &str, args: &[&str]) -> Result<Output> {
        debug!("Running command: {}", self.describe(cmd, args));

        self.configure(cmd, args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .with_context(|| format!("Failed to spawn command: {}", self.describe(cmd, args)))
    }

    /// Run a shell command line, capturing output.
    pub fn run_shell(&self, cmd_line: &str) -> Result<Output> {
        self.run_unchecked("sh", &["-c", cmd_line])
    }

    /// Run a command with stdio inherited from the parent, so long-running
    /// tools (builds, syncs) show their progress. Returns the exit status.
    pub fn run_streaming(&self, cmd: &str, args: &[&str]) -> Result<ExitStatus> {
        debug!("Running command (streaming): {}", self.describe(cmd, args));

        self.configure(cmd, args)
            .status()
            .with_context(|| format!("Failed to spawn command: {}", self.describe(cmd, args)))
    }

    fn configure(&self, cmd: &str, args: &[&str]) -> Command {
        let mut command = Command::new(cmd);
        command.args(args);

        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        for (key, value) in &self.env_vars {
            command.env(key, value);
        }

        command
    }

    fn describe(&self, cmd: &str, args: &[&str]) -> String {
        if let Some(label) = &self.label {
            return label.clone();
        }

        format!("{} {}", cmd, args.join(" "))
    }
}
