//! Subprocess execution for live mode
//!
//! The interlock never runs commands itself; it hands approved ones to a
//! [`CommandRunner`]. Runs are bounded by a wall-clock timeout and never retried.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

/// Hard limit on a live command
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How a live command ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The process exited on its own
    Completed {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    /// The process was killed after exceeding the timeout
    TimedOut,
    /// The process could not be started or waited on
    Failed(String),
}

/// Runs an approved command
pub trait CommandRunner {
    fn run(&self, command: &str) -> RunOutcome;
}

/// Runs commands through `sh -c`
#[derive(Debug, Clone)]
pub struct ShellRunner {
    timeout: Duration,
}

impl ShellRunner {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str) -> RunOutcome {
        let deadline = Instant::now() + self.timeout;

        let mut shell = Command::new("sh");
        shell
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Own process group, so a timeout also reaches anything the shell started
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            shell.process_group(0);
        }

        let mut child = match shell.spawn() {
            Ok(child) => child,
            Err(e) => return RunOutcome::Failed(e.to_string()),
        };

        // Drain pipes on their own threads so a chatty child cannot fill them and stall.
        let (tx, rx) = mpsc::channel();
        let mut pending = 0;
        if let Some(pipe) = child.stdout.take() {
            drain(pipe, Stream::Stdout, tx.clone());
            pending += 1;
        }
        if let Some(pipe) = child.stderr.take() {
            drain(pipe, Stream::Stderr, tx.clone());
            pending += 1;
        }
        drop(tx);

        let status = match wait_until(&mut child, deadline) {
            Ok(Some(status)) => status,
            Ok(None) => {
                terminate(&mut child);
                return RunOutcome::TimedOut;
            }
            Err(e) => {
                terminate(&mut child);
                return RunOutcome::Failed(e.to_string());
            }
        };

        // The shell is gone, but a background job may still hold the pipes open
        let mut stdout = String::new();
        let mut stderr = String::new();
        while pending > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((Stream::Stdout, text)) => stdout = text,
                Ok((Stream::Stderr, text)) => stderr = text,
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!("Command exited but its output stayed open past the timeout");
                    kill_group(&child);
                    return RunOutcome::TimedOut;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
            pending -= 1;
        }

        RunOutcome::Completed {
            exit_code: status.code(),
            stdout,
            stderr,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

fn wait_until(child: &mut Child, deadline: Instant) -> std::io::Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R, stream: Stream, tx: Sender<(Stream, String)>) {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        let _ = tx.send((stream, String::from_utf8_lossy(&buf).into_owned()));
    });
}

/// Kill the whole process group and reap the shell
fn terminate(child: &mut Child) {
    kill_group(child);
    if let Err(e) = child.kill() {
        log::debug!("Shell already gone: {}", e);
    }
    let _ = child.wait();
}

#[cfg(unix)]
fn kill_group(child: &Child) {
    let group = format!("-{}", child.id());
    match Command::new("sh")
        .arg("-c")
        .arg(format!("kill -KILL -- {}", group))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) if status.success() => {}
        Ok(status) => log::debug!("kill {} exited with {}", group, status),
        Err(e) => log::warn!("Failed to kill process group {}: {}", group, e),
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_captures_output_and_exit_code() {
        let runner = ShellRunner::new();
        match runner.run("echo hello; echo oops 1>&2; exit 3") {
            RunOutcome::Completed {
                exit_code,
                stdout,
                stderr,
            } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stdout.trim(), "hello");
                assert_eq!(stderr.trim(), "oops");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_timeout_kills_command() {
        let runner = ShellRunner::with_timeout(Duration::from_millis(200));
        let started = Instant::now();
        let outcome = runner.run("sleep 5");

        assert_eq!(outcome, RunOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_background_job_holding_output_times_out() {
        let runner = ShellRunner::with_timeout(Duration::from_millis(300));
        let started = Instant::now();
        let outcome = runner.run("sleep 4 &");

        assert_eq!(outcome, RunOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_background_job_with_closed_output_completes() {
        let runner = ShellRunner::with_timeout(Duration::from_secs(5));
        let started = Instant::now();
        let outcome = runner.run("echo done; sleep 4 >/dev/null 2>&1 &");

        match outcome {
            RunOutcome::Completed {
                exit_code, stdout, ..
            } => {
                assert_eq!(exit_code, Some(0));
                assert_eq!(stdout.trim(), "done");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_default_timeout() {
        assert_eq!(ShellRunner::default().timeout(), Duration::from_secs(30));
    }
}
