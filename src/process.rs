//! Running external commands with their context preserved on failure.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

use crate::error::{Error, Result};

/// Renders the program and arguments of `cmd` for messages.
pub fn describe(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

fn working_dir(cmd: &Command) -> PathBuf {
    cmd.get_current_dir()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn check(cmd: &Command, output: Output) -> Result<Output> {
    if output.status.success() {
        return Ok(output);
    }
    let mut combined = String::from_utf8_lossy(&output.stderr).into_owned();
    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
        combined.push_str(&stdout);
    }
    if combined.trim().is_empty() {
        combined = output.status.to_string();
    }
    Err(Error::Command {
        command: describe(cmd),
        dir: working_dir(cmd),
        output: combined.trim_end().to_string(),
    })
}

fn spawn_error(cmd: &Command, e: std::io::Error) -> Error {
    Error::Command {
        command: describe(cmd),
        dir: working_dir(cmd),
        output: e.to_string(),
    }
}

/// Runs `cmd` to completion, failing with [`Error::Command`] on a non-zero
/// exit. The output is captured.
pub fn run(cmd: &mut Command) -> Result<Output> {
    let output = cmd.output().map_err(|e| spawn_error(cmd, e))?;
    check(cmd, output)
}

/// Like [`run`], returning trimmed stdout.
pub fn run_stdout(cmd: &mut Command) -> Result<String> {
    let output = run(cmd)?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Runs `cmd` with `input` written to its stdin.
pub fn run_with_stdin(cmd: &mut Command, input: &[u8]) -> Result<Output> {
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spawn_error(cmd, e))?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input)?;
    }
    let output = child.wait_with_output()?;
    check(cmd, output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        let mut cmd = Command::new("git");
        cmd.args(["rev-parse", "HEAD"]);
        assert_eq!(describe(&cmd), "git rev-parse HEAD");
    }

    #[cfg(unix)]
    #[test]
    fn test_failure_keeps_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo oops >&2; exit 3"]).current_dir(dir.path());
        match run(&mut cmd) {
            Err(Error::Command { output, dir: d, .. }) => {
                assert_eq!(output, "oops");
                assert_eq!(d, dir.path());
            }
            other => panic!("expected command error, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_stdin_is_forwarded() {
        let mut cmd = Command::new("cat");
        let out = run_with_stdin(&mut cmd, b"hello").unwrap();
        assert_eq!(out.stdout, b"hello");
    }

    #[test]
    fn test_missing_program() {
        let mut cmd = Command::new("definitely-not-a-real-program-unity");
        assert!(matches!(run(&mut cmd), Err(Error::Command { .. })));
    }
}
