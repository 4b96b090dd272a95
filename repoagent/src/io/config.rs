//! Agent configuration stored in `.repoagent.toml`.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::paths::normalize_relative;
use crate::core::types::Mode;

/// Default config file name, looked up in the current directory.
pub const CONFIG_FILE_NAME: &str = ".repoagent.toml";

/// Per-run configuration (TOML).
///
/// Every field has a default so a partial file (or none at all) is valid.
/// Tables come last so the serialized form stays readable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Repository root. Relative values resolve against the process cwd.
    pub workdir: PathBuf,
    pub mode: Mode,
    /// Substring matched against relative paths to pick the inlined focus file.
    pub focus_file: Option<String>,
    /// Apply replacement blocks from `ask` responses.
    pub apply_changes: bool,
    /// Run the test command after changes were applied.
    pub run_tests: bool,
    /// Forward partial engine output to the terminal while generating.
    pub stream_output: bool,
    /// Inline file bodies into the context snapshot.
    pub include_code: bool,
    /// When set, prompts, responses and the final report are written here.
    pub transcript_dir: Option<PathBuf>,

    pub context: ContextConfig,
    pub engine: EngineConfig,
    pub test: TestConfig,
}

/// Repository scan and inlining budgets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContextConfig {
    /// Upper bound on inlined bytes per snapshot.
    pub max_total: u64,
    /// Files at or above this size are listed but never inlined.
    pub max_file: u64,
    pub max_depth: usize,
    pub max_entries: usize,
    /// Always-useful files (headers, manifests) are inlined only below this size.
    pub inline_threshold: u64,
}

/// Invocation of the llama.cpp-style generation CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub binary: String,
    pub model: String,
    pub ctx_size: u32,
    pub n_predict: u32,
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub threads: u32,
    pub batch_size: u32,
    /// Appended verbatim before `--file`.
    pub extra_args: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TestConfig {
    /// Shell command run from the workdir (e.g. `make test`).
    pub command: Option<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("."),
            mode: Mode::default(),
            focus_file: None,
            apply_changes: false,
            run_tests: false,
            stream_output: false,
            include_code: true,
            transcript_dir: None,
            context: ContextConfig::default(),
            engine: EngineConfig::default(),
            test: TestConfig::default(),
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_total: 4 * 1024 * 1024,
            max_file: 512 * 1024,
            max_depth: 5,
            max_entries: 1000,
            inline_threshold: 10_000,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: "llama-cli".to_string(),
            model: String::new(),
            ctx_size: 16_384,
            n_predict: 4096,
            temperature: 0.3,
            top_k: 20,
            top_p: 0.95,
            threads: 4,
            batch_size: 512,
            extra_args: Vec::new(),
            timeout_secs: 30 * 60,
            output_limit_bytes: 4 * 1024 * 1024,
        }
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            command: None,
            timeout_secs: 10 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        let ctx = &self.context;
        if ctx.max_total == 0 {
            return Err(anyhow!("context.max_total must be > 0"));
        }
        if ctx.max_file == 0 {
            return Err(anyhow!("context.max_file must be > 0"));
        }
        if ctx.max_file > ctx.max_total {
            return Err(anyhow!(
                "context.max_file ({}) must not exceed context.max_total ({})",
                ctx.max_file,
                ctx.max_total
            ));
        }
        if ctx.max_entries == 0 {
            return Err(anyhow!("context.max_entries must be > 0"));
        }

        let engine = &self.engine;
        if engine.binary.trim().is_empty() {
            return Err(anyhow!("engine.binary must be non-empty"));
        }
        if engine.ctx_size == 0 || engine.n_predict == 0 {
            return Err(anyhow!("engine.ctx_size and engine.n_predict must be > 0"));
        }
        if engine.threads == 0 || engine.batch_size == 0 {
            return Err(anyhow!("engine.threads and engine.batch_size must be > 0"));
        }
        if engine.timeout_secs == 0 {
            return Err(anyhow!("engine.timeout_secs must be > 0"));
        }
        if engine.output_limit_bytes == 0 {
            return Err(anyhow!("engine.output_limit_bytes must be > 0"));
        }

        if self.test.timeout_secs == 0 {
            return Err(anyhow!("test.timeout_secs must be > 0"));
        }
        if self.test.output_limit_bytes == 0 {
            return Err(anyhow!("test.output_limit_bytes must be > 0"));
        }
        if let Some(command) = &self.test.command
            && command.trim().is_empty()
        {
            return Err(anyhow!("test.command must be non-empty when set"));
        }
        Ok(())
    }

    /// Make `workdir` absolute and check that it is a directory.
    pub fn resolve_workdir(&mut self) -> Result<()> {
        if self.workdir.is_relative() {
            let cwd = env::current_dir().context("read current directory")?;
            self.workdir = cwd.join(&self.workdir);
        }
        if !self.workdir.is_dir() {
            return Err(anyhow!(
                "workdir {} is not a directory",
                self.workdir.display()
            ));
        }
        Ok(())
    }

    /// Join a relative path under the workdir, rejecting escapes.
    pub fn resolve(&self, rel: &str) -> Result<PathBuf> {
        let rel = normalize_relative(rel).with_context(|| format!("resolve {rel:?}"))?;
        Ok(self.workdir.join(rel))
    }

    /// Test command, if tests are enabled and one is configured.
    pub fn test_command(&self) -> Option<&str> {
        self.test.command.as_deref().filter(|_| self.run_tests)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `Config::default()`.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        let cfg = Config::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &Config) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
