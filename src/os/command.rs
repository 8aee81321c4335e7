//! Bounded-time execution of short-lived external commands

use crate::error::{Error, Result};
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a finished command
#[derive(Debug)]
pub struct CommandOutput {
    /// Exit code (None when killed by a signal)
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Run `program args..` and wait at most `timeout` for it to finish
///
/// On expiry the child is killed and [`Error::CommandTimeout`] is returned.
pub fn run(program: &Path, args: &[String], timeout: Duration) -> Result<CommandOutput> {
    let command = render(program, args);

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::CommandFailed {
            command: command.clone(),
            message: e.to_string(),
        })?;

    // Drain pipes on helper threads so a chatty child cannot block on a full pipe
    let stdout_reader = child.stdout.take().map(|mut out| {
        thread::spawn(move || {
            let mut buf = String::new();
            let _ = out.read_to_string(&mut buf);
            buf
        })
    });
    let stderr_reader = child.stderr.take().map(|mut err| {
        thread::spawn(move || {
            let mut buf = String::new();
            let _ = err.read_to_string(&mut buf);
            buf
        })
    });

    let start = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if start.elapsed() >= timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(Error::CommandTimeout {
                        command,
                        seconds: timeout.as_secs(),
                    });
                }
                thread::sleep(Duration::from_millis(20));
            }
            Err(e) => {
                return Err(Error::CommandFailed {
                    command,
                    message: e.to_string(),
                });
            }
        }
    };

    let stdout = stdout_reader
        .and_then(|h| h.join().ok())
        .unwrap_or_default();
    let stderr = stderr_reader
        .and_then(|h| h.join().ok())
        .unwrap_or_default();

    Ok(CommandOutput {
        code: status.code(),
        stdout,
        stderr,
    })
}

/// Run a command that must exit zero
pub fn run_checked(program: &Path, args: &[String], timeout: Duration) -> Result<CommandOutput> {
    let output = run(program, args, timeout)?;
    if !output.success() {
        return Err(Error::CommandFailed {
            command: render(program, args),
            message: output.stderr.trim().to_string(),
        });
    }
    Ok(output)
}

fn render(program: &Path, args: &[String]) -> String {
    let mut line = program.display().to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_captures_output() {
        let output = run(
            Path::new("sh"),
            &["-c".into(), "echo hello; echo oops >&2".into()],
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[test]
    fn test_run_times_out() {
        let err = run(
            Path::new("sleep"),
            &["5".into()],
            Duration::from_millis(200),
        )
        .unwrap_err();
        assert!(matches!(err, Error::CommandTimeout { .. }));
    }

    #[test]
    fn test_run_checked_reports_failure() {
        let err = run_checked(
            Path::new("sh"),
            &["-c".into(), "echo broken >&2; exit 3".into()],
            Duration::from_secs(5),
        )
        .unwrap_err();
        match err {
            Error::CommandFailed { message, .. } => assert_eq!(message, "broken"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_program() {
        let err = run(
            Path::new("/nonexistent/cableguy-test-binary"),
            &[],
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(err, Error::CommandFailed { .. }));
    }
}
