use std::io::{self, Read};
use std::process::{Child, ChildStderr, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;
use wait_timeout::ChildExt;

use crate::{CommandError, Invocation};

/// Collects a child's standard error on a background thread.
///
/// The drain exists only so that a chatty stage can never fill its stderr
/// pipe and stall while the main thread is busy relaying data.
pub(crate) struct StderrDrain {
    handle: JoinHandle<String>,
}

impl StderrDrain {
    pub(crate) fn spawn(label: &str, mut stderr: ChildStderr) -> io::Result<Self> {
        let handle = thread::Builder::new()
            .name(format!("stderr-{label}"))
            .spawn(move || {
                let mut captured = Vec::new();
                let _ = stderr.read_to_end(&mut captured);
                String::from_utf8_lossy(&captured).trim().to_owned()
            })?;
        Ok(Self { handle })
    }

    /// Waits for the stream to close and returns what was read.
    pub(crate) fn collect(self) -> String {
        self.handle.join().unwrap_or_default()
    }
}

/// A long-running helper process (a remote listener) that must finish
/// within a bounded time once the data it serves has been delivered.
///
/// The process is killed if it is dropped while still running.
pub struct SupervisedChild {
    command: String,
    child: Child,
    stderr: Option<StderrDrain>,
}

impl SupervisedChild {
    /// Starts `invocation` with stdin and stdout detached and stderr drained.
    pub fn spawn(invocation: &Invocation) -> Result<Self, CommandError> {
        let command = invocation.to_string();
        debug!(target: "snaprelay::cmd", command = %command, "starting supervised process");

        let mut child = invocation
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| CommandError::Spawn {
                command: command.clone(),
                source,
            })?;

        let stderr = match child.stderr.take() {
            Some(stream) => match StderrDrain::spawn("control", stream) {
                Ok(drain) => Some(drain),
                Err(source) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(CommandError::Io { command, source });
                }
            },
            None => None,
        };

        Ok(Self {
            command,
            child,
            stderr,
        })
    }

    /// Reports whether the process has already exited.
    pub fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    /// Waits up to `timeout` for the process to exit successfully.
    ///
    /// On timeout the process is killed and [`CommandError::TimedOut`] is
    /// returned. A non-zero exit yields [`CommandError::Failed`] carrying the
    /// drained standard error.
    pub fn wait_timeout(mut self, timeout: Duration) -> Result<(), CommandError> {
        let waited = self.child.wait_timeout(timeout);
        let status = match waited {
            Ok(Some(status)) => status,
            Ok(None) => {
                let _ = self.child.kill();
                let _ = self.child.wait();
                return Err(CommandError::TimedOut {
                    command: self.command.clone(),
                    timeout,
                });
            }
            Err(source) => {
                return Err(CommandError::Io {
                    command: self.command.clone(),
                    source,
                });
            }
        };

        let stderr = self.stderr.take().map(StderrDrain::collect).unwrap_or_default();
        self.finish(status, stderr)
    }

    /// Kills the process and returns whatever it printed on stderr.
    pub fn terminate(mut self) -> String {
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.stderr.take().map(StderrDrain::collect).unwrap_or_default()
    }

    fn finish(&self, status: ExitStatus, stderr: String) -> Result<(), CommandError> {
        if status.success() {
            Ok(())
        } else {
            Err(CommandError::Failed {
                command: self.command.clone(),
                status,
                stderr,
            })
        }
    }
}

impl Drop for SupervisedChild {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::ZfsFailure;

    fn shell(script: &str) -> Invocation {
        Invocation::new("sh").args(["-c", script])
    }

    #[test]
    fn successful_exit_within_timeout() {
        let child = SupervisedChild::spawn(&shell("exit 0")).expect("spawn");
        child
            .wait_timeout(Duration::from_secs(10))
            .expect("process exits cleanly");
    }

    #[test]
    fn failure_carries_stderr() {
        let child = SupervisedChild::spawn(&shell(
            "echo 'cannot receive new filesystem stream: out of space' >&2; exit 1",
        ))
        .expect("spawn");

        let err = child
            .wait_timeout(Duration::from_secs(10))
            .expect_err("process fails");
        assert_eq!(err.failure(), ZfsFailure::OutOfSpace);
    }

    #[test]
    fn hung_process_is_killed_after_timeout() {
        let child = SupervisedChild::spawn(&shell("exec sleep 30")).expect("spawn");
        let err = child
            .wait_timeout(Duration::from_millis(200))
            .expect_err("times out");
        assert!(matches!(err, CommandError::TimedOut { .. }));
    }

    #[test]
    fn terminate_returns_captured_stderr() {
        let mut child = SupervisedChild::spawn(&shell("echo early >&2; exec sleep 30")).expect("spawn");
        thread::sleep(Duration::from_millis(300));
        assert!(!child.has_exited());
        assert_eq!(child.terminate(), "early");
    }
}
