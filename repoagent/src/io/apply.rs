//! Change applier: materializes change records under the workdir.
//!
//! Per record, in order: normalize the path, create parent directories, back
//! up an existing target to `<path>.bak` (once per call, failure tolerated),
//! then replace the content through a sibling temp file and rename. A failing
//! record never stops the ones after it.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};

use crate::core::paths::{display_relative, normalize_relative};
use crate::core::types::ChangeRecord;

pub const BACKUP_SUFFIX: &str = ".bak";

/// What happened to one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ApplyOutcome {
    Written {
        /// Backup path relative to the workdir, if the target pre-existed and
        /// the copy succeeded.
        backup: Option<String>,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileResult {
    pub path: String,
    #[serde(flatten)]
    pub outcome: ApplyOutcome,
}

/// Per-call summary: `applied` out of `total` records, plus per-record detail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub applied: usize,
    pub total: usize,
    pub results: Vec<FileResult>,
}

impl ApplyReport {
    pub fn is_partial(&self) -> bool {
        self.applied < self.total
    }

    /// Fold another report into this one (used to sum the agent's edit phases).
    pub fn absorb(&mut self, other: ApplyReport) {
        self.applied += other.applied;
        self.total += other.total;
        self.results.extend(other.results);
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.results.iter().filter_map(|r| match &r.outcome {
            ApplyOutcome::Failed { error } => Some((r.path.as_str(), error.as_str())),
            ApplyOutcome::Written { .. } => None,
        })
    }
}

/// Apply `records` under `workdir`, marking each successful one applied.
#[instrument(skip_all, fields(workdir = %workdir.display(), records = records.len()))]
pub fn apply_changes(workdir: &Path, records: &mut [ChangeRecord]) -> ApplyReport {
    let mut report = ApplyReport {
        total: records.len(),
        ..ApplyReport::default()
    };
    let mut backed_up: HashSet<PathBuf> = HashSet::new();

    for record in records.iter_mut() {
        let outcome = match apply_one(workdir, record, &mut backed_up) {
            Ok(backup) => {
                record.mark_applied();
                report.applied += 1;
                info!(path = record.path(), bytes = record.content().len(), "applied change");
                ApplyOutcome::Written { backup }
            }
            Err(e) => {
                warn!(path = record.path(), err = %format!("{e:#}"), "change not applied");
                ApplyOutcome::Failed {
                    error: format!("{e:#}"),
                }
            }
        };
        report.results.push(FileResult {
            path: record.path().to_string(),
            outcome,
        });
    }

    debug!(applied = report.applied, total = report.total, "apply finished");
    report
}

fn apply_one(
    workdir: &Path,
    record: &ChangeRecord,
    backed_up: &mut HashSet<PathBuf>,
) -> Result<Option<String>> {
    let rel = normalize_relative(record.path())
        .with_context(|| format!("refuse path {:?}", record.path()))?;
    let target = workdir.join(&rel);

    let parent = target
        .parent()
        .with_context(|| format!("path missing parent {}", target.display()))?;
    let root = workdir
        .canonicalize()
        .with_context(|| format!("resolve workdir {}", workdir.display()))?;
    let nearest = parent.ancestors().find(|dir| dir.exists()).unwrap_or(workdir);
    ensure_inside(&root, nearest)?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    ensure_inside(&root, parent)?;

    let existing = fs::symlink_metadata(&target).ok();
    if existing.as_ref().is_some_and(|meta| meta.is_dir()) {
        bail!("{} is a directory", target.display());
    }

    let mut backup = None;
    if existing.is_some() && backed_up.insert(rel.clone()) {
        let backup_path = backup_path(&target);
        match fs::copy(&target, &backup_path) {
            Ok(_) => {
                debug!(backup = %backup_path.display(), "backed up");
                backup = Some(format!("{}{BACKUP_SUFFIX}", display_relative(&rel)));
            }
            Err(e) => warn!(path = %target.display(), err = %e, "backup failed, writing anyway"),
        }
    }

    write_atomic(&target, record.content().as_bytes(), existing.as_ref())?;
    Ok(backup)
}

/// Symlinked directories must not carry a write outside the workdir.
fn ensure_inside(root: &Path, dir: &Path) -> Result<()> {
    let resolved = dir
        .canonicalize()
        .with_context(|| format!("resolve {}", dir.display()))?;
    if !resolved.starts_with(root) {
        bail!("{} resolves outside the workdir", dir.display());
    }
    Ok(())
}

fn write_atomic(target: &Path, contents: &[u8], existing: Option<&fs::Metadata>) -> Result<()> {
    let parent = target
        .parent()
        .with_context(|| format!("path missing parent {}", target.display()))?;
    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("create temp file in {}", parent.display()))?;
    tmp.write_all(contents)
        .with_context(|| format!("write temp file for {}", target.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("sync temp file for {}", target.display()))?;
    if let Some(meta) = existing.filter(|meta| meta.is_file()) {
        fs::set_permissions(tmp.path(), meta.permissions())
            .with_context(|| format!("copy permissions to {}", target.display()))?;
    }
    tmp.persist(target)
        .with_context(|| format!("replace {}", target.display()))?;
    Ok(())
}

pub fn backup_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}
