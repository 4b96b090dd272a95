//! Generation engine abstraction.
//!
//! The [`Engine`] trait decouples the session and agent controller from the
//! process that performs inference (currently a llama.cpp-style CLI). Tests use
//! scripted engines that return predetermined responses without spawning
//! processes.

use std::borrow::Cow;
use std::ffi::OsString;
use std::io::Write;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::response::clean_engine_output;
use crate::io::config::EngineConfig;
use crate::io::process::{ProcessLimits, run_command};

/// Partial cleaned output is forwarded at most once per this many new bytes.
pub const STREAM_CHUNK_BYTES: usize = 1024;

/// Receives the cleaned accumulated response while generation is running.
pub type OutputSink<'a> = &'a mut (dyn FnMut(&str) + Send);

/// Prompt in, generated text out.
pub trait Engine {
    /// Generate a completion for `prompt`.
    ///
    /// When `on_output` is set it is called with the cleaned response so far,
    /// and once more with the final response before returning.
    fn generate(&self, prompt: &str, on_output: Option<OutputSink<'_>>) -> Result<String>;
}

/// Engine that spawns a llama.cpp-style CLI with the prompt in a temp file.
#[derive(Debug, Clone)]
pub struct LlamaEngine {
    config: EngineConfig,
}

impl LlamaEngine {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        if config.model.trim().is_empty() {
            return Err(anyhow!("engine.model is not set (use --model or the config file)"));
        }
        Ok(Self {
            config: config.clone(),
        })
    }

    /// Argument vector for one invocation reading its prompt from `prompt_path`.
    pub fn args(&self, prompt_path: &Path) -> Vec<OsString> {
        let cfg = &self.config;
        let mut args: Vec<OsString> = [
            "-m".to_string(),
            cfg.model.clone(),
            "-c".to_string(),
            cfg.ctx_size.to_string(),
            "-n".to_string(),
            cfg.n_predict.to_string(),
            "--temp".to_string(),
            cfg.temperature.to_string(),
            "--top-k".to_string(),
            cfg.top_k.to_string(),
            "--top-p".to_string(),
            cfg.top_p.to_string(),
            "--threads".to_string(),
            cfg.threads.to_string(),
            "--batch-size".to_string(),
            cfg.batch_size.to_string(),
        ]
        .into_iter()
        .map(OsString::from)
        .collect();
        args.extend(cfg.extra_args.iter().map(OsString::from));
        args.push(OsString::from("--file"));
        args.push(prompt_path.as_os_str().to_owned());
        args
    }

    fn limits(&self) -> ProcessLimits {
        ProcessLimits {
            timeout: Duration::from_secs(self.config.timeout_secs),
            output_limit_bytes: self.config.output_limit_bytes,
        }
    }
}

/// Streamed stdout kept for partial emits, capped at the output limit.
///
/// Re-emits once the text has grown by [`STREAM_CHUNK_BYTES`] or by an eighth
/// of its length, whichever is larger, so re-cleaning stays linear overall.
#[derive(Debug)]
struct StreamBuffer {
    bytes: Vec<u8>,
    limit: usize,
    emitted_at: usize,
}

impl StreamBuffer {
    fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
            emitted_at: 0,
        }
    }

    /// Append `piece`; returns whether a partial emit is due.
    fn push(&mut self, piece: &[u8]) -> bool {
        let room = self.limit.saturating_sub(self.bytes.len());
        if room == 0 {
            return false;
        }
        self.bytes.extend_from_slice(&piece[..piece.len().min(room)]);
        let grown = self.bytes.len() - self.emitted_at;
        if grown >= STREAM_CHUNK_BYTES.max(self.emitted_at / 8) || self.bytes.len() == self.limit {
            self.emitted_at = self.bytes.len();
            return true;
        }
        false
    }

    fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

impl Engine for LlamaEngine {
    #[instrument(skip_all, fields(binary = %self.config.binary, prompt_bytes = prompt.len(), streaming = on_output.is_some()))]
    fn generate(&self, prompt: &str, on_output: Option<OutputSink<'_>>) -> Result<String> {
        let mut prompt_file = tempfile::Builder::new()
            .prefix("repoagent-prompt-")
            .suffix(".txt")
            .tempfile()
            .context("create prompt file")?;
        prompt_file
            .write_all(prompt.as_bytes())
            .context("write prompt file")?;
        prompt_file.flush().context("flush prompt file")?;

        let mut cmd = Command::new(&self.config.binary);
        cmd.args(self.args(prompt_file.path()));
        info!(model = %self.config.model, "starting engine");

        let output = match on_output {
            Some(sink) => {
                let mut stream = StreamBuffer::new(self.config.output_limit_bytes);
                let mut on_line = |line: &[u8]| {
                    if stream.push(line) {
                        sink(&clean_engine_output(&stream.text(), prompt));
                    }
                };
                let output = run_command(cmd, self.limits(), Some(&mut on_line))
                    .with_context(|| format!("run {}", self.config.binary))?;
                sink(&clean_engine_output(&stream.text(), prompt));
                output
            }
            None => run_command(cmd, self.limits(), None)
                .with_context(|| format!("run {}", self.config.binary))?,
        };

        if output.timed_out {
            warn!(timeout_secs = self.config.timeout_secs, "engine timed out");
            return Err(anyhow!(
                "{} timed out after {}s",
                self.config.binary,
                self.config.timeout_secs
            ));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "engine failed");
            return Err(anyhow!(
                "{} failed with status {:?}: {}",
                self.config.binary,
                output.status.code(),
                output.stderr_tail(400)
            ));
        }
        if output.stdout_truncated > 0 {
            warn!(
                dropped = output.stdout_truncated,
                "engine output exceeded limit"
            );
        }

        let response = clean_engine_output(&output.stdout_lossy(), prompt);
        debug!(response_bytes = response.len(), "engine completed");
        Ok(response)
    }
}
