use core::fmt;
use std::fmt::{Debug, Display};

use serde::{Deserialize, Serialize};

/// What the transport hands back for one remote command, before any
/// interpretation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// `None` if the remote side never reported an exit status
    pub exit_status: Option<i32>,
}

impl RawOutput {
    /// Convenience for building outputs from text
    pub fn new(stdout: impl AsRef<str>, stderr: impl AsRef<str>, exit_status: Option<i32>) -> Self {
        Self {
            stdout: stdout.as_ref().as_bytes().to_vec(),
            stderr: stderr.as_ref().as_bytes().to_vec(),
            exit_status,
        }
    }
}

/// The result of one remote command. Created once per executed command and
/// never changed afterwards.
#[must_use]
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub command: String,
    /// The stdout split on newlines, with the empty piece after a final
    /// newline removed
    pub stdout: Vec<String>,
    /// The stderr with one trailing newline removed
    pub stderr: String,
    pub exit_status: Option<i32>,
}

impl Debug for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!(
            "CommandResult {{\ncommand: {:?},\nexit_status: {:?},\n",
            self.command, self.exit_status
        ))?;
        // move the commas out of the way of the stdout and stderr
        if !self.stdout.is_empty() {
            f.write_fmt(format_args!("stdout: {}\n,", self.stdout_text()))?;
        }
        if !self.stderr.is_empty() {
            f.write_fmt(format_args!("stderr: {}\n,", self.stderr))?;
        }
        f.write_fmt(format_args!("}}"))
    }
}

/// The verbose echo of a command: the prompt line followed by everything the
/// command printed
impl Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "$> {}", self.command)?;
        for line in &self.stdout {
            writeln!(f, "{line}")?;
        }
        f.write_str(&self.stderr)
    }
}

impl CommandResult {
    pub fn from_raw(command: impl Into<String>, raw: RawOutput) -> Self {
        let stdout = String::from_utf8_lossy(&raw.stdout);
        let mut stdout: Vec<String> = stdout.split('\n').map(str::to_owned).collect();
        if stdout.last().is_some_and(|line| line.is_empty()) {
            stdout.pop();
        }
        let stderr = String::from_utf8_lossy(&raw.stderr);
        let stderr = stderr.strip_suffix('\n').unwrap_or(&stderr).to_owned();
        Self {
            command: command.into(),
            stdout,
            stderr,
            exit_status: raw.exit_status,
        }
    }

    /// A command that wrote anything to its error stream fails the whole run,
    /// regardless of its exit status
    pub fn is_failure(&self) -> bool {
        !self.stderr.is_empty()
    }

    /// Returns if the command reported a zero exit status
    pub fn exited_successfully(&self) -> bool {
        self.exit_status == Some(0)
    }

    /// The stdout lines joined back together
    pub fn stdout_text(&self) -> String {
        let mut text = self.stdout.join("\n");
        if !self.stdout.is_empty() {
            text.push('\n');
        }
        text
    }
}
