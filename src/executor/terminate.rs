//! Worker exit observation and the graceful-then-forceful stop protocol.

use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;
use tracing::{debug, warn};

use super::job::UNOBSERVED_EXIT_CODE;

/// How a stopped worker went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exited on its own after SIGTERM.
    Graceful { exit_code: i32 },
    /// Needed SIGKILL, either requested or after the grace period.
    Killed { exit_code: i32 },
}

/// Map an exit status to a single code. Signal deaths become `-signal`.
pub fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    UNOBSERVED_EXIT_CODE
}

/// Non-blocking exit check. A failing wait primitive counts as an exit with
/// [`UNOBSERVED_EXIT_CODE`].
pub fn poll_child(child: &mut Child) -> Option<i32> {
    match child.try_wait() {
        Ok(Some(status)) => Some(exit_code_of(status)),
        Ok(None) => None,
        Err(e) => {
            warn!(pid = ?child.id(), error = %e, "failed to poll worker exit status");
            Some(UNOBSERVED_EXIT_CODE)
        }
    }
}

/// Terminate `child` and reap it.
///
/// With `force` the worker is killed outright. Otherwise SIGTERM is sent and
/// the worker gets `grace` to exit before SIGKILL.
pub async fn terminate(
    child: &mut Child,
    force: bool,
    grace: Duration,
) -> std::io::Result<Termination> {
    if force {
        return kill(child).await;
    }

    send_sigterm(child);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            let exit_code = exit_code_of(status);
            debug!(exit_code, "worker exited after SIGTERM");
            Ok(Termination::Graceful { exit_code })
        }
        Ok(Err(e)) => Err(e),
        Err(_) => {
            warn!(
                pid = ?child.id(),
                grace_secs = grace.as_secs(),
                "worker did not exit after SIGTERM, sending SIGKILL"
            );
            kill(child).await
        }
    }
}

async fn kill(child: &mut Child) -> std::io::Result<Termination> {
    child.kill().await?;
    let status = child.wait().await?;
    Ok(Termination::Killed {
        exit_code: exit_code_of(status),
    })
}

#[cfg(unix)]
fn send_sigterm(child: &Child) {
    if let Some(pid) = child.id() {
        // SAFETY: signalling a pid we spawned and have not reaped yet.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc != 0 {
            warn!(pid, error = %std::io::Error::last_os_error(), "failed to send SIGTERM");
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    fn sh(script: &str) -> Child {
        Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .unwrap()
    }

    #[tokio::test]
    async fn test_poll_child_reports_exit_code() {
        let mut child = sh("exit 3");
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        let code = loop {
            if let Some(code) = poll_child(&mut child) {
                break code;
            }
            assert!(tokio::time::Instant::now() < deadline, "child never exited");
            tokio::time::sleep(Duration::from_millis(20)).await;
        };
        assert_eq!(code, 3);
    }

    #[tokio::test]
    async fn test_graceful_stop() {
        let mut child = sh("sleep 30");
        let outcome = terminate(&mut child, false, Duration::from_secs(5)).await.unwrap();
        assert_eq!(
            outcome,
            Termination::Graceful {
                exit_code: -libc::SIGTERM
            }
        );
    }

    #[tokio::test]
    async fn test_escalates_when_sigterm_ignored() {
        let mut child = sh("trap '' TERM; while true; do sleep 0.1; done");
        // Give the shell time to install the trap.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let outcome = terminate(&mut child, false, Duration::from_millis(300)).await.unwrap();
        assert_eq!(
            outcome,
            Termination::Killed {
                exit_code: -libc::SIGKILL
            }
        );
    }

    #[tokio::test]
    async fn test_force_kills_immediately() {
        let mut child = sh("sleep 30");
        let started = std::time::Instant::now();
        let outcome = terminate(&mut child, true, Duration::from_secs(30)).await.unwrap();
        assert!(matches!(outcome, Termination::Killed { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
