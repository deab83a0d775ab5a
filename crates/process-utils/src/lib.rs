//! Helpers for spawning the external tools trackdrop drives (yt-dlp, ffmpeg).
//!
//! Every child is created without a console window on Windows and, for the tokio
//! variant, is killed when its handle is dropped so that aborting the owning task
//! never leaves an orphaned download behind.

use std::ffi::OsStr;
use std::process::ExitStatus;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Maximum number of stderr lines kept for error reporting.
pub const STDERR_TAIL_LINES: usize = 8;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
    }
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Output of a finished child process.
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Last non-empty stderr lines, joined with `\n`.
    pub fn stderr_tail(&self) -> String {
        stderr_tail(&String::from_utf8_lossy(&self.stderr), STDERR_TAIL_LINES)
    }
}

/// Keep the last `max_lines` non-blank lines of a stderr dump.
pub fn stderr_tail(stderr: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

/// Describe a failed run as `"<program> exited with <status>: <stderr tail>"`.
pub fn describe_failure(program: &str, output: &CapturedOutput) -> String {
    let tail = output.stderr_tail();
    if tail.is_empty() {
        format!("{program} exited with {}", output.status)
    } else {
        format!("{program} exited with {}: {tail}", output.status)
    }
}

/// Create a `tokio::process::Command` with piped stdio, `kill_on_drop`, and
/// `CREATE_NO_WINDOW` applied on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd.stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Run a command to completion and capture both output streams.
///
/// Dropping the returned future kills the child.
#[cfg(feature = "tokio")]
pub async fn run_captured(cmd: &mut tokio::process::Command) -> std::io::Result<CapturedOutput> {
    let output = cmd.output().await?;
    Ok(CapturedOutput {
        status: output.status,
        stdout: output.stdout,
        stderr: output.stderr,
    })
}

/// Check whether a binary can be started at all (`<program> --version`).
#[cfg(feature = "tokio")]
pub async fn probe_binary(program: impl AsRef<OsStr>, version_flag: &str) -> bool {
    let mut cmd = tokio_command(program);
    cmd.arg(version_flag);
    matches!(run_captured(&mut cmd).await, Ok(out) if out.success())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let dump = "a\n\nb\nc\n   \nd\n";
        assert_eq!(stderr_tail(dump, 2), "c\nd");
        assert_eq!(stderr_tail(dump, 10), "a\nb\nc\nd");
        assert_eq!(stderr_tail("", 3), "");
    }

    #[cfg(feature = "tokio")]
    #[tokio::test]
    async fn test_probe_missing_binary() {
        assert!(!probe_binary("definitely-not-a-real-binary-xyz", "--version").await);
    }
}
