//! Command runners (spec §4.1, C1).
//!
//! Every external subprocess — `git`, `gh`, `validate`, agent binaries —
//! goes through here. Arguments are always passed as an argv array, never
//! shell-interpolated. Failures are returned as values; nothing from this
//! module panics or lets an I/O error escape as an unhandled exception.

use std::io::{BufRead, BufReader, Write as _};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use crate::cancel::CancellationToken;
use crate::error::ProcError;

/// The captured result of a finished subprocess.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

fn argv_label(argv: &[&str]) -> String {
    argv.join(" ")
}

/// Run a short-lived command to completion and capture its output. Never
/// fails merely because the command exited non-zero — callers decide
/// whether that matters.
pub fn run(argv: &[&str], cwd: &Path) -> Result<CommandOutput, ProcError> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| ProcError::InvalidState("empty argv".to_owned()))?;
    let output = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .output()
        .map_err(|e| ProcError::Spawn { command: argv_label(argv), source: e })?;
    Ok(CommandOutput {
        exit_code: output.status.code(),
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Like [`run`], but turns a non-zero exit into `Err`. Use for steps where
/// the caller has no fallback behavior for failure.
pub fn run_checked(argv: &[&str], cwd: &Path) -> Result<CommandOutput, ProcError> {
    let out = run(argv, cwd)?;
    if out.success {
        Ok(out)
    } else {
        Err(ProcError::NonZeroExit {
            command: argv_label(argv),
            exit_code: out.exit_code,
            stderr: out.stderr,
        })
    }
}

#[cfg(unix)]
fn terminate_process_group(pid: u32) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pgid = Pid::from_raw(i32::try_from(pid).unwrap_or(0));
    let _ = killpg(pgid, Signal::SIGTERM);
    std::thread::sleep(Duration::from_millis(200));
    if killpg(pgid, None).is_ok() {
        let _ = killpg(pgid, Signal::SIGKILL);
    }
}

#[cfg(not(unix))]
fn terminate_process_group(_pid: u32) {}

/// Run a long-lived subprocess (an agent backend), feeding `stdin_content`
/// over stdin and invoking `on_line` for every line of stdout as it
/// arrives. Honors `cancel`: on cancellation, SIGTERM (then SIGKILL if
/// unresponsive) is sent to the whole process group (spec §4.1 "Honor a
/// cancellation token; on cancel, send SIGTERM and reap").
///
/// `on_line` sees raw lines, JSON or not — the agent invoker decides how
/// to parse them; non-JSON lines are simply content this layer doesn't
/// interpret.
pub fn run_streaming(
    argv: &[&str],
    cwd: &Path,
    stdin_content: Option<&str>,
    cancel: &CancellationToken,
    mut on_line: impl FnMut(&str),
) -> Result<CommandOutput, ProcError> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| ProcError::InvalidState("empty argv".to_owned()))?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .stdin(if stdin_content.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt as _;
        cmd.process_group(0);
    }

    let mut child = cmd.spawn().map_err(|e| ProcError::Spawn { command: argv_label(argv), source: e })?;
    let pid = child.id();

    if let Some(content) = stdin_content {
        if let Some(mut stdin) = child.stdin.take() {
            let content = content.to_owned();
            std::thread::spawn(move || {
                let _ = stdin.write_all(content.as_bytes());
            });
        }
    }

    let stdout = child.stdout.take().expect("stdout was piped");
    let stderr = child.stderr.take().expect("stderr was piped");

    let (tx, rx) = mpsc::channel::<String>();
    let stdout_reader = std::thread::spawn(move || {
        for line in BufReader::new(stdout).lines().map_while(Result::ok) {
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    let stderr_buf = Arc::new(std::sync::Mutex::new(String::new()));
    let stderr_buf_writer = Arc::clone(&stderr_buf);
    let stderr_reader = std::thread::spawn(move || {
        for line in BufReader::new(stderr).lines().map_while(Result::ok) {
            let mut buf = stderr_buf_writer.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            buf.push_str(&line);
            buf.push('\n');
        }
    });

    let mut stdout_lines = Vec::new();
    let mut terminated = false;
    loop {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(line) => {
                on_line(&line);
                stdout_lines.push(line);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if cancel.is_cancelled() && !terminated {
                    terminate_process_group(pid);
                    terminated = true;
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    let _ = stdout_reader.join();
    let _ = stderr_reader.join();

    let status = child
        .wait()
        .map_err(|e| ProcError::Spawn { command: argv_label(argv), source: e })?;

    let stderr = Arc::try_unwrap(stderr_buf).map_or_else(
        |arc| arc.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone(),
        |mutex| mutex.into_inner().unwrap_or_else(std::sync::PoisonError::into_inner),
    );

    Ok(CommandOutput {
        exit_code: status.code(),
        success: status.success() && !terminated,
        stdout: stdout_lines.join("\n"),
        stderr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn cwd() -> PathBuf {
        std::env::temp_dir()
    }

    #[test]
    fn run_captures_stdout() {
        let out = run(&["echo", "hello"], &cwd()).unwrap();
        assert!(out.success);
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn run_checked_errors_on_nonzero_exit() {
        let err = run_checked(&["sh", "-c", "exit 3"], &cwd()).unwrap_err();
        match err {
            ProcError::NonZeroExit { exit_code, .. } => assert_eq!(exit_code, Some(3)),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn run_streaming_collects_lines() {
        let mut lines = Vec::new();
        let out = run_streaming(
            &["sh", "-c", "printf 'one\\ntwo\\n'"],
            &cwd(),
            None,
            &CancellationToken::new(),
            |line| lines.push(line.to_owned()),
        )
        .unwrap();
        assert!(out.success);
        assert_eq!(lines, vec!["one".to_owned(), "two".to_owned()]);
    }

    #[test]
    fn run_streaming_honors_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out = run_streaming(&["sleep", "5"], &cwd(), None, &cancel, |_| {}).unwrap();
        assert!(!out.success);
    }
}
