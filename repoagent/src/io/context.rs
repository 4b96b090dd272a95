//! Bounded repository snapshot: a structural listing plus selectively inlined
//! file bodies.
//!
//! Inlining is greedy per candidate: a file that would push the running total
//! past `max_total` is skipped, but smaller files later in the scan are still
//! tried. Unreadable files keep their listing entry and are never inlined;
//! bodies that are not valid UTF-8 are inlined lossily.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::core::filters::{is_always_useful, is_ignored, is_listed_file};
use crate::core::paths::display_relative;
use crate::core::types::FileEntry;
use crate::io::config::ContextConfig;

/// What to inline on top of the structural listing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextRequest<'a> {
    /// Substring matched against relative paths; matching files are inlined
    /// regardless of extension (still subject to both budgets).
    pub focus: Option<&'a str>,
    pub include_bodies: bool,
}

/// A rendered snapshot together with the accounting behind it.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub text: String,
    pub entries: Vec<FileEntry>,
    /// Relative paths whose bodies were inlined, in scan order.
    pub inlined: Vec<String>,
    pub inlined_bytes: u64,
}

/// Walk `workdir` and render the snapshot for `request`.
///
/// Fails only if the workdir itself cannot be listed.
#[instrument(skip_all, fields(workdir = %workdir.display(), focus = request.focus))]
pub fn build_context(
    workdir: &Path,
    budgets: &ContextConfig,
    request: ContextRequest<'_>,
) -> Result<Snapshot> {
    let entries = scan_repository(workdir, budgets)?;

    let mut text = String::new();
    let _ = writeln!(text, "Repository root: {}\n", workdir.display());
    text.push_str("## Repository Structure:\n");

    let mut inlined = Vec::new();
    let mut inlined_bytes = 0u64;
    let focus = request.focus.map(str::trim).filter(|f| !f.is_empty());

    for entry in &entries {
        if entry.is_dir {
            let _ = writeln!(text, "📁 {}/", entry.path);
            continue;
        }
        let _ = writeln!(text, "📄 {} ({} bytes)", entry.path, entry.size);

        if !request.include_bodies || !wants_inline(entry, focus, budgets) {
            continue;
        }
        if entry.size >= budgets.max_file {
            debug!(path = %entry.path, size = entry.size, "over max_file, not inlined");
            continue;
        }
        if inlined_bytes + entry.size > budgets.max_total {
            debug!(path = %entry.path, size = entry.size, inlined_bytes, "over max_total, skipped");
            continue;
        }

        let bytes = match fs::read(workdir.join(&entry.path)) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(path = %entry.path, err = %e, "unreadable, not inlined");
                continue;
            }
        };
        // The file may have grown since the scan; recheck with the bytes actually read.
        let len = bytes.len() as u64;
        if len >= budgets.max_file || inlined_bytes + len > budgets.max_total {
            continue;
        }
        let body = String::from_utf8_lossy(&bytes);

        let _ = write!(text, "\n### File: {}\n```\n{}\n```\n\n", entry.path, body);
        inlined_bytes += len;
        inlined.push(entry.path.clone());
    }

    let _ = write!(text, "\nTotal files: {}\n", entries.len());
    debug!(
        entries = entries.len(),
        inlined = inlined.len(),
        inlined_bytes,
        "context built"
    );

    Ok(Snapshot {
        text,
        entries,
        inlined,
        inlined_bytes,
    })
}

fn wants_inline(entry: &FileEntry, focus: Option<&str>, budgets: &ContextConfig) -> bool {
    if focus.is_some_and(|f| entry.path.contains(f)) {
        return true;
    }
    let name = entry.path.rsplit('/').next().unwrap_or(&entry.path);
    entry.size < budgets.inline_threshold && is_always_useful(name)
}

/// List accepted entries under `workdir` in sorted scan order.
///
/// Dotfiles and ignored names are pruned (their subtrees are not entered).
/// Directories are always listed; regular files only when code-like or a
/// known manifest. Symlinks are not followed.
pub fn scan_repository(workdir: &Path, budgets: &ContextConfig) -> Result<Vec<FileEntry>> {
    fs::read_dir(workdir).with_context(|| format!("read directory {}", workdir.display()))?;

    let walker = WalkDir::new(workdir)
        .min_depth(1)
        .max_depth(budgets.max_depth + 1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_ignored(&e.file_name().to_string_lossy()));

    let mut entries = Vec::new();
    for item in walker {
        if entries.len() >= budgets.max_entries {
            debug!(max_entries = budgets.max_entries, "entry ceiling reached");
            break;
        }
        let dirent = match item {
            Ok(dirent) => dirent,
            Err(e) => {
                debug!(err = %e, "skipping unreadable entry");
                continue;
            }
        };
        let rel = match dirent.path().strip_prefix(workdir) {
            Ok(rel) => display_relative(rel),
            Err(_) => continue,
        };
        let file_type = dirent.file_type();
        if file_type.is_dir() {
            entries.push(FileEntry {
                path: rel,
                size: 0,
                is_dir: true,
            });
        } else if file_type.is_file() && is_listed_file(&dirent.file_name().to_string_lossy()) {
            let size = dirent.metadata().map(|m| m.len()).unwrap_or(0);
            entries.push(FileEntry {
                path: rel,
                size,
                is_dir: false,
            });
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(path, contents).expect("write");
    }

    fn budgets(max_total: u64, max_file: u64) -> ContextConfig {
        ContextConfig {
            max_total,
            max_file,
            ..ContextConfig::default()
        }
    }

    #[test]
    fn lists_code_and_prunes_ignored() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        write(root, "src/main.c", "int main(void) { return 0; }\n");
        write(root, "logo.png", "png");
        write(root, "node_modules/dep/index.js", "x");
        write(root, ".git/config", "x");
        write(root, "build/out.c", "x");
        write(root, "Makefile", "all:\n");

        let entries = scan_repository(root, &ContextConfig::default()).expect("scan");
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["Makefile", "src", "src/main.c"]);
        assert!(entries[1].is_dir);
        assert_eq!(entries[1].size, 0);
    }

    #[test]
    fn depth_and_entry_ceilings_apply() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        write(root, "a/b/c/deep.c", "x");
        let shallow = ContextConfig {
            max_depth: 1,
            ..ContextConfig::default()
        };
        let paths: Vec<String> = scan_repository(root, &shallow)
            .expect("scan")
            .into_iter()
            .map(|e| e.path)
            .collect();
        assert_eq!(paths, vec!["a", "a/b"]);

        let few = ContextConfig {
            max_entries: 2,
            ..ContextConfig::default()
        };
        assert_eq!(scan_repository(root, &few).expect("scan").len(), 2);
    }

    #[test]
    fn focus_file_is_inlined_regardless_of_size_class() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        write(root, "src/engine.c", "void run(void) {}\n");
        write(root, "src/other.c", "void other(void) {}\n");

        let snapshot = build_context(
            root,
            &ContextConfig::default(),
            ContextRequest {
                focus: Some("engine.c"),
                include_bodies: true,
            },
        )
        .expect("build");

        assert_eq!(snapshot.inlined, vec!["src/engine.c"]);
        assert!(snapshot.text.contains("### File: src/engine.c\n```\nvoid run(void) {}\n"));
        assert!(snapshot.text.contains("📄 src/other.c (20 bytes)"));
        assert!(snapshot.text.ends_with("\nTotal files: 3\n"));
    }

    #[test]
    fn always_useful_files_inlined_only_with_bodies() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        write(root, "README.md", "# demo\n");
        write(root, "util.h", "int util(void);\n");

        let request = ContextRequest {
            focus: None,
            include_bodies: true,
        };
        let snapshot = build_context(root, &ContextConfig::default(), request).expect("build");
        assert_eq!(snapshot.inlined, vec!["README.md", "util.h"]);

        let listing_only = build_context(root, &ContextConfig::default(), ContextRequest::default())
            .expect("build");
        assert!(listing_only.inlined.is_empty());
        assert!(!listing_only.text.contains("### File:"));
    }

    #[test]
    fn files_at_max_file_are_listed_not_inlined() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        write(root, "big.c", &"x".repeat(64));
        let request = ContextRequest {
            focus: Some("big.c"),
            include_bodies: true,
        };
        let snapshot = build_context(root, &budgets(1024, 64), request).expect("build");
        assert!(snapshot.inlined.is_empty());
        assert!(snapshot.text.contains("📄 big.c (64 bytes)"));
    }

    #[test]
    fn greedy_budget_skips_large_then_takes_smaller() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        write(root, "a.h", &"a".repeat(60));
        write(root, "b.h", &"b".repeat(50));
        write(root, "c.h", &"c".repeat(30));

        let request = ContextRequest {
            focus: None,
            include_bodies: true,
        };
        let snapshot = build_context(root, &budgets(100, 80), request).expect("build");
        assert_eq!(snapshot.inlined, vec!["a.h", "c.h"]);
        assert_eq!(snapshot.inlined_bytes, 90);
    }

    #[test]
    fn inlined_bytes_never_exceed_budget() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        for i in 0..20 {
            write(root, &format!("h{i:02}.h"), &"x".repeat(10 + i * 7));
        }
        let request = ContextRequest {
            focus: Some(".h"),
            include_bodies: true,
        };
        for max_total in [1, 50, 97, 200, 333, 1000] {
            let snapshot =
                build_context(root, &budgets(max_total, max_total), request).expect("build");
            assert!(snapshot.inlined_bytes <= max_total, "max_total {max_total}");
        }
    }

    #[test]
    fn focus_file_with_invalid_utf8_is_inlined_lossily() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::write(root.join("latin1.c"), b"char *s = \"caf\xe9\";\n").expect("write");

        let request = ContextRequest {
            focus: Some("latin1.c"),
            include_bodies: true,
        };
        let snapshot = build_context(root, &ContextConfig::default(), request).expect("build");

        assert_eq!(snapshot.inlined, vec!["latin1.c"]);
        assert_eq!(snapshot.inlined_bytes, 18);
        assert!(snapshot.text.contains("char *s = \"caf\u{FFFD}\";\n"));
    }

    #[test]
    fn missing_workdir_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let missing = temp.path().join("missing");
        assert!(build_context(&missing, &ContextConfig::default(), ContextRequest::default()).is_err());
    }
}
