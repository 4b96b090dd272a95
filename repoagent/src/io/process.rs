//! Helpers for running child processes with timeouts and bounded output.

use std::io::{BufRead, BufReader, Read};
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, ScopedJoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Bounds applied to one child process.
#[derive(Debug, Clone, Copy)]
pub struct ProcessLimits {
    pub timeout: Duration,
    /// Bytes kept per stream; the rest is drained and counted.
    pub output_limit_bytes: usize,
}

/// Longest piece of stdout buffered at once; longer lines reach the sink in pieces.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Receives each stdout line (including its newline) as it is read.
pub type LineSink<'a> = &'a mut (dyn FnMut(&[u8]) + Send);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Last `max_chars` characters of stderr, for error messages.
    pub fn stderr_tail(&self, max_chars: usize) -> String {
        let text = String::from_utf8_lossy(&self.stderr);
        let text = text.trim_end();
        let skip = text.chars().count().saturating_sub(max_chars);
        text.chars().skip(skip).collect()
    }

    pub fn truncation_notice(&self) -> String {
        let mut notice = String::new();
        if self.stdout_truncated > 0 {
            notice.push_str(&format!(
                "\n[stdout truncated {} bytes]\n",
                self.stdout_truncated
            ));
        }
        if self.stderr_truncated > 0 {
            notice.push_str(&format!(
                "\n[stderr truncated {} bytes]\n",
                self.stderr_truncated
            ));
        }
        notice
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Both pipes are drained by scoped reader threads while the child runs; stdin is
/// closed. When `on_stdout_line` is set, each stdout line is handed to it as soon as
/// it is read, before the output limit is applied. On Unix the child leads its own
/// process group, and a timed-out child is killed together with everything it
/// spawned. Timeouts are reported through `timed_out`, not as an error.
#[instrument(skip_all, fields(program = ?cmd.get_program(), timeout_secs = limits.timeout.as_secs(), streaming = on_stdout_line.is_some()))]
pub fn run_command(
    mut cmd: Command,
    limits: ProcessLimits,
    on_stdout_line: Option<LineSink<'_>>,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    cmd.process_group(0);

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let limit = limits.output_limit_bytes;

    thread::scope(|scope| {
        let stdout_handle = scope.spawn(move || read_lines_limited(stdout, limit, on_stdout_line));
        let stderr_handle = scope.spawn(move || read_stream_limited(stderr, limit));

        let waited = wait_or_kill(&mut child, limits.timeout);
        if waited.is_err() {
            // Unblock the readers before the scope joins them.
            if let Err(e) = kill_tree(&mut child) {
                warn!(err = %e, "failed to kill child after wait error");
            }
        }

        let stdout = join_output(stdout_handle).context("join stdout");
        let stderr = join_output(stderr_handle).context("join stderr");
        let (status, timed_out) = waited?;
        let (stdout, stdout_truncated) = stdout?;
        let (stderr, stderr_truncated) = stderr?;

        if stdout_truncated > 0 || stderr_truncated > 0 {
            warn!(stdout_truncated, stderr_truncated, "output truncated");
        }

        debug!(exit_code = ?status.code(), timed_out, "command finished");
        Ok(CommandOutput {
            status,
            stdout,
            stderr,
            stdout_truncated,
            stderr_truncated,
            timed_out,
        })
    })
}

fn wait_or_kill(child: &mut Child, timeout: Duration) -> Result<(ExitStatus, bool)> {
    match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => Ok((status, false)),
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            kill_tree(child).context("kill command")?;
            let status = child.wait().context("wait command after kill")?;
            Ok((status, true))
        }
    }
}

/// Kill the child's process group so grandchildren release the output pipes.
#[cfg(unix)]
fn kill_tree(child: &mut Child) -> std::io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pgid = Pid::from_raw(child.id() as i32);
    match killpg(pgid, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => {
            warn!(err = %e, "killpg failed, killing child only");
            child.kill()
        }
    }
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) -> std::io::Result<()> {
    child.kill()
}

fn join_output(handle: ScopedJoinHandle<'_, Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Read a stream line by line with a size limit, forwarding every line to `sink`.
///
/// At most [`MAX_LINE_BYTES`] are buffered per read, so output without newlines
/// cannot grow memory past the limit.
fn read_lines_limited<R: Read>(
    reader: R,
    limit: usize,
    mut sink: Option<LineSink<'_>>,
) -> Result<(Vec<u8>, usize)> {
    let mut buf_reader = BufReader::new(reader);
    let mut collected = Vec::new();
    let mut truncated = 0usize;
    let mut line = Vec::new();

    loop {
        line.clear();
        let n = buf_reader
            .by_ref()
            .take(MAX_LINE_BYTES as u64)
            .read_until(b'\n', &mut line)
            .context("read line")?;
        if n == 0 {
            break;
        }
        if let Some(sink) = sink.as_mut() {
            sink(&line);
        }
        truncated += push_limited(&mut collected, &line, limit);
    }

    Ok((collected, truncated))
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        truncated += push_limited(&mut buf, &chunk[..n], limit);
    }

    Ok((buf, truncated))
}

/// Append what fits under `limit`; returns the number of bytes dropped.
fn push_limited(buf: &mut Vec<u8>, bytes: &[u8], limit: usize) -> usize {
    let keep = bytes.len().min(limit.saturating_sub(buf.len()));
    buf.extend_from_slice(&bytes[..keep]);
    bytes.len() - keep
}
