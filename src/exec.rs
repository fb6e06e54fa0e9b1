//! Running external tools (`apk index`, `abuild-sign`, `abuild-keygen`)
//!
//! Everything that spawns a process goes through [`CommandRunner`], so the
//! repository code can be exercised with a scripted runner in tests.

use std::ffi::{OsStr, OsString};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use wait_timeout::ChildExt;

use crate::error::{IndexerError, Result};

/// A command line to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(OsString, OsString)>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.env
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    /// Shell-like rendering for log messages
    pub fn display(&self) -> String {
        let mut out = self.program.clone();
        for arg in &self.args {
            out.push(' ');
            out.push_str(&arg.to_string_lossy());
        }
        out
    }
}

/// Captured result of a finished (or abandoned) process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if killed by a signal or timed out
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status == Some(0)
    }

    /// stdout followed by stderr, as the tool printed them
    pub fn combined(&self) -> String {
        let mut text = String::new();
        for part in [self.stdout.trim_end(), self.stderr.trim_end()] {
            if part.is_empty() {
                continue;
            }
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(part);
        }
        text
    }

    /// [`combined`](Self::combined), or a note on how the tool ended if it
    /// printed nothing
    pub fn diagnostic(&self) -> String {
        let mut text = self.combined();
        if text.is_empty() {
            match self.status {
                Some(code) => text = format!("exited with status {}", code),
                None => text = "terminated by signal".to_string(),
            }
        }
        text
    }
}

/// Executes tool commands and reports their outcome
pub trait CommandRunner: Send + Sync {
    /// Run `cmd` to completion.
    ///
    /// An `Err` means the process could not be started at all.
    fn run(&self, cmd: &ToolCommand) -> io::Result<CommandOutput>;
}

/// Runs commands as real child processes with a bounded wait
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, cmd: &ToolCommand) -> io::Result<CommandOutput> {
        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &cmd.cwd {
            command.current_dir(dir);
        }
        for (key, value) in &cmd.env {
            command.env(key, value);
        }

        tracing::debug!("Running: {}", cmd.display());
        let mut child = command.spawn()?;

        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        match child.wait_timeout(self.timeout)? {
            Some(status) => Ok(CommandOutput {
                status: status.code(),
                stdout: collect(stdout, None),
                stderr: collect(stderr, None),
                timed_out: false,
            }),
            None => {
                tracing::warn!(
                    "{} exceeded {}s, killing it",
                    cmd.program,
                    self.timeout.as_secs()
                );
                let _ = child.kill();
                let _ = child.wait();
                // Grandchildren may still hold the pipes open, so only wait
                // briefly and keep whatever has been read so far.
                Ok(CommandOutput {
                    status: None,
                    stdout: collect(stdout, Some(DRAIN_GRACE)),
                    stderr: collect(stderr, Some(DRAIN_GRACE)),
                    timed_out: true,
                })
            }
        }
    }
}

/// How long a killed tool's pipes are read after the kill
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Bytes read so far from a pipe, and whether the pipe has closed
struct Capture {
    buf: Arc<Mutex<Vec<u8>>>,
    done: thread::JoinHandle<()>,
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> Capture {
    let buf = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&buf);
    let done = thread::spawn(move || {
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Ok(mut buf) = sink.lock() {
                        buf.extend_from_slice(&chunk[..n]);
                    }
                }
            }
        }
    });
    Capture { buf, done }
}

/// Text read from the pipe; waits for it to close, for at most `grace` if given
fn collect(capture: Option<Capture>, grace: Option<Duration>) -> String {
    let Some(capture) = capture else {
        return String::new();
    };

    match grace {
        None => {
            let _ = capture.done.join();
        }
        Some(grace) => {
            let deadline = Instant::now() + grace;
            while !capture.done.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
        }
    }

    capture
        .buf
        .lock()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

/// Policy for invoking a tool whose failure aborts the run
#[derive(Debug, Clone, Copy)]
pub struct Invocation {
    /// Extra attempts after the first failure
    pub retries: u32,
    /// Reported in timeout errors
    pub timeout: Duration,
}

impl Invocation {
    /// Run `cmd`, mapping every kind of failure to an error.
    ///
    /// `on_failure` builds the tool-specific error from the diagnostic text
    /// (tool output, or the reason the tool could not be started).
    pub fn run(
        &self,
        runner: &dyn CommandRunner,
        cmd: &ToolCommand,
        on_failure: impl Fn(String) -> IndexerError,
    ) -> Result<CommandOutput> {
        let attempts = self.retries + 1;
        let mut attempt = 1;
        loop {
            let error = match runner.run(cmd) {
                Ok(output) if output.success() => return Ok(output),
                Ok(output) if output.timed_out => IndexerError::ToolTimeout {
                    tool: cmd.program.clone(),
                    secs: self.timeout.as_secs(),
                    output: output.combined(),
                },
                Ok(output) => on_failure(output.diagnostic()),
                Err(e) => on_failure(format!("failed to run `{}`: {}", cmd.program, e)),
            };

            if attempt >= attempts {
                return Err(error);
            }
            tracing::warn!(
                "Attempt {}/{} of `{}` failed: {}",
                attempt,
                attempts,
                cmd.display(),
                error
            );
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeRunner;

    fn invocation(retries: u32) -> Invocation {
        Invocation {
            retries,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_diagnostic_joins_streams() {
        let output = CommandOutput {
            status: Some(1),
            stdout: "building\n".to_string(),
            stderr: "ERROR: bad\n".to_string(),
            timed_out: false,
        };
        assert_eq!(output.diagnostic(), "building\nERROR: bad");

        let silent = CommandOutput {
            status: Some(2),
            ..Default::default()
        };
        assert_eq!(silent.diagnostic(), "exited with status 2");
    }

    #[test]
    fn test_invocation_maps_failure() {
        let runner = FakeRunner::failing("apk", "no space left");
        let err = invocation(0)
            .run(&runner, &ToolCommand::new("apk").arg("index"), |output| {
                IndexerError::IndexingFailed {
                    arch: "x86_64".to_string(),
                    output,
                }
            })
            .unwrap_err();

        match err {
            IndexerError::IndexingFailed { output, .. } => assert_eq!(output, "no space left"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn test_invocation_retries() {
        let runner = FakeRunner::failing("apk", "flaky");
        let result = invocation(2).run(&runner, &ToolCommand::new("apk"), |output| {
            IndexerError::InvalidConfig(output)
        });
        assert!(result.is_err());
        assert_eq!(runner.calls().len(), 3);
    }

    #[test]
    fn test_invocation_reports_timeout() {
        let runner = FakeRunner::new(|_| {
            Ok(CommandOutput {
                timed_out: true,
                stderr: "waiting for lock\n".to_string(),
                ..Default::default()
            })
        });
        let err = invocation(0)
            .run(&runner, &ToolCommand::new("abuild-sign"), |output| {
                IndexerError::InvalidConfig(output)
            })
            .unwrap_err();
        match &err {
            IndexerError::ToolTimeout { secs, output, .. } => {
                assert_eq!(*secs, 5);
                assert_eq!(output, "waiting for lock");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().ends_with("within 5s:\nwaiting for lock"), "{err}");
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_captures_output() {
        let runner = SystemRunner::new(Duration::from_secs(10));
        let cmd = ToolCommand::new("sh")
            .arg("-c")
            .arg("echo out; echo err >&2; exit 3");
        let output = runner.run(&cmd).unwrap();
        assert_eq!(output.status, Some(3));
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert!(!output.success());
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_times_out() {
        let runner = SystemRunner::new(Duration::from_millis(200));
        let output = runner.run(&ToolCommand::new("sleep").arg("10")).unwrap();
        assert!(output.timed_out);
        assert!(!output.success());
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_keeps_output_on_timeout() {
        let runner = SystemRunner::new(Duration::from_millis(500));
        let cmd = ToolCommand::new("sh")
            .arg("-c")
            .arg("echo started; echo stuck >&2; exec sleep 10");
        let output = runner.run(&cmd).unwrap();
        assert!(output.timed_out);
        assert_eq!(output.stdout, "started\n");
        assert_eq!(output.stderr, "stuck\n");
    }

    #[test]
    fn test_system_runner_missing_program() {
        let runner = SystemRunner::new(Duration::from_secs(1));
        assert!(runner
            .run(&ToolCommand::new("definitely-not-a-real-tool-4821"))
            .is_err());
    }
}
