//! Time-bounded subprocess execution.
//!
//! Every external call the pipeline makes goes through `run_streaming` or
//! `run_captured`. A call that exceeds its timeout is killed and reported as
//! `timed_out`; callers treat that as a failed command, not a crash.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::error::{Result, StackbackError};
use crate::output::{LineSink, NullSink, Stream};

// ---------------------------------------------------------------------------
// CommandSpec
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Extra environment. Values are never logged.
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        cmd
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for a in &self.args {
            write!(f, " {a}")?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSpec")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("cwd", &self.cwd)
            .field(
                "env",
                &self.env.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

// ---------------------------------------------------------------------------
// CommandOutput
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// `None` when killed by a signal or by the timeout.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Short human description of how the command ended.
    pub fn describe(&self) -> String {
        if self.timed_out {
            return "timed out".to_string();
        }
        let base = match self.exit_code {
            Some(code) => format!("exited with code {code}"),
            None => "terminated by signal".to_string(),
        };
        let tail = self.stderr.trim();
        if tail.is_empty() {
            base
        } else {
            let start = tail
                .char_indices()
                .rev()
                .nth(399)
                .map(|(i, _)| i)
                .unwrap_or(0);
            format!("{base}: {}", &tail[start..])
        }
    }
}

// ---------------------------------------------------------------------------
// Runners
// ---------------------------------------------------------------------------

/// Run to completion and capture output.
pub async fn run_captured(spec: &CommandSpec, timeout: Duration) -> Result<CommandOutput> {
    run_streaming(spec, timeout, &NullSink).await
}

/// Run to completion, forwarding each stdout/stderr line to `sink` as it
/// arrives. Output is also accumulated in the returned `CommandOutput`.
pub async fn run_streaming(
    spec: &CommandSpec,
    timeout: Duration,
    sink: &dyn LineSink,
) -> Result<CommandOutput> {
    tracing::debug!(command = %spec, timeout_secs = timeout.as_secs(), "exec");

    let mut cmd = spec.to_command();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| StackbackError::Spawn {
        program: spec.program.clone(),
        source,
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("stdout was not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("stderr was not captured"))?;

    let (tx, mut rx) = mpsc::unbounded_channel::<(Stream, String)>();

    let tx_out = tx.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx_out.send((Stream::Stdout, line)).is_err() {
                break;
            }
        }
    });

    let tx_err = tx;
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx_err.send((Stream::Stderr, line)).is_err() {
                break;
            }
        }
    });

    let mut output = CommandOutput::default();
    let drive = async {
        // Channel closes once both pipes hit EOF.
        while let Some((stream, line)) = rx.recv().await {
            sink.line(stream, &line);
            let buf = match stream {
                Stream::Stdout => &mut output.stdout,
                Stream::Stderr => &mut output.stderr,
            };
            buf.push_str(&line);
            buf.push('\n');
        }
        child.wait().await
    };

    let finished = tokio::time::timeout(timeout, drive).await;
    match finished {
        Ok(status) => {
            output.exit_code = status?.code();
        }
        Err(_) => {
            tracing::warn!(command = %spec, timeout_secs = timeout.as_secs(), "command timed out; killing");
            let _ = child.kill().await;
            output.timed_out = true;
        }
    }
    Ok(output)
}
