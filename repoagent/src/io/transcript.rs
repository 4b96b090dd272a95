//! Transcript files: every prompt/response pair of a run plus the final report.
//!
//! Layout under the transcript directory:
//!
//! - `NN-<phase>.prompt.txt` / `NN-<phase>.response.txt` per engine call
//! - `report.json` at the end of the run

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;

const PROMPT_SUFFIX: &str = ".prompt.txt";
const RESPONSE_SUFFIX: &str = ".response.txt";
const REPORT_FILE: &str = "report.json";

/// Writer for one run. A disabled transcript accepts every call and writes nothing.
#[derive(Debug, Default)]
pub struct Transcript {
    dir: Option<PathBuf>,
    seq: usize,
}

impl Transcript {
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Prepare `dir`, removing transcript files left by a previous run.
    ///
    /// Only files this module writes are removed; anything else in the
    /// directory is left alone.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("create transcript dir {}", dir.display()))?;
        for entry in
            fs::read_dir(dir).with_context(|| format!("read transcript dir {}", dir.display()))?
        {
            let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_transcript_file(&name) {
                fs::remove_file(entry.path())
                    .with_context(|| format!("remove stale transcript {}", entry.path().display()))?;
            }
        }
        Ok(Self {
            dir: Some(dir.to_path_buf()),
            seq: 0,
        })
    }

    pub fn from_option(dir: Option<&Path>) -> Result<Self> {
        match dir {
            Some(dir) => Self::open(dir),
            None => Ok(Self::disabled()),
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Record one engine exchange; returns the shared file stem when enabled.
    pub fn record(&mut self, phase: &str, prompt: &str, response: &str) -> Result<Option<String>> {
        let Some(dir) = &self.dir else {
            return Ok(None);
        };
        self.seq += 1;
        let stem = format!("{:02}-{}", self.seq, sanitize(phase));
        write_text(&dir.join(format!("{stem}{PROMPT_SUFFIX}")), prompt)?;
        write_text(&dir.join(format!("{stem}{RESPONSE_SUFFIX}")), response)?;
        debug!(stem = %stem, "transcript recorded");
        Ok(Some(stem))
    }

    pub fn write_report<T: Serialize>(&self, report: &T) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let path = dir.join(REPORT_FILE);
        let mut json = serde_json::to_string_pretty(report).context("serialize report")?;
        json.push('\n');
        write_text(&path, &json)
    }
}

fn is_transcript_file(name: &str) -> bool {
    name == REPORT_FILE || name.ends_with(PROMPT_SUFFIX) || name.ends_with(RESPONSE_SUFFIX)
}

fn sanitize(phase: &str) -> String {
    phase
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}
