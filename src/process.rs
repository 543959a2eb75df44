//! Bounded runs of external programs (the transcoder and the inference CLI).
//!
//! A child that outlives its time limit is killed and reaped, so a hung tool cannot pin a
//! job slot. Both output pipes are drained on their own threads while the child runs.

use std::io::{self, Read};
use std::process::{Command, Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::warn;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How a bounded run ended.
#[derive(Debug)]
pub enum RunOutcome {
    Finished(Output),
    TimedOut,
}

/// Run `command` to completion or until `limit` elapses.
///
/// Fails only when the program cannot be started.
pub fn run_with_timeout(command: &mut Command, limit: Duration) -> io::Result<RunOutcome> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = Instant::now() + limit;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break Some(status);
        }
        if Instant::now() >= deadline {
            if let Err(e) = child.kill() {
                warn!(pid = child.id(), error = %e, "Failed to kill timed out process");
            }
            // Reap it so no zombie is left behind
            let _ = child.wait();
            break None;
        }
        thread::sleep(POLL_INTERVAL);
    };

    let stdout = stdout.join().unwrap_or_default();
    let stderr = stderr.join().unwrap_or_default();

    Ok(match status {
        Some(status) => RunOutcome::Finished(Output {
            status,
            stdout,
            stderr,
        }),
        None => RunOutcome::TimedOut,
    })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

/// Write an executable shell script standing in for an external tool.
///
/// `$last` holds the final argument (the transcoder's output path).
#[cfg(all(test, unix))]
pub(crate) fn fake_program(dir: &std::path::Path, name: &str, body: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script = dir.join(name);
    std::fs::write(&script, format!("#!/bin/sh\nfor last; do :; done\n{}\n", body)).unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    script
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_finished_run_keeps_output() {
        let outcome = run_with_timeout(
            Command::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]),
            Duration::from_secs(10),
        )
        .unwrap();

        match outcome {
            RunOutcome::Finished(output) => {
                assert_eq!(output.status.code(), Some(3));
                assert_eq!(output.stdout, b"out\n");
                assert_eq!(output.stderr, b"err\n");
            }
            RunOutcome::TimedOut => panic!("should have finished"),
        }
    }

    #[test]
    fn test_hung_program_is_killed() {
        let started = Instant::now();
        let outcome = run_with_timeout(
            Command::new("sh").args(["-c", "exec sleep 30"]),
            Duration::from_millis(200),
        )
        .unwrap();

        assert!(matches!(outcome, RunOutcome::TimedOut));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_missing_program_is_an_error() {
        let err = run_with_timeout(
            &mut Command::new("no-such-program-51d2"),
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
