//! Extraction of the planned file list from an overview response.
//!
//! Recognized line formats, first match wins per line:
//!
//! - `FILES: a.c, b.c` (comma-separated)
//! - `FILE: path`
//! - `- path` / `* path` (bullet; first word must look like a source file)
//! - a bare line that looks like a source file
//!
//! Duplicates are kept: order reflects the engine's stated priority.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::filters::{is_code_like, is_manifest_name};
use crate::core::patch::MAX_PATH_LEN;

/// Planned paths beyond this count are dropped.
pub const MAX_PLAN_FILES: usize = 256;

static FILES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^FILES:\s*(.*)$").expect("FILES_RE should compile"));
static FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^FILE:\s*(.+)$").expect("FILE_RE should compile"));
static BULLET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-*]\s+(\S+)").expect("BULLET_RE should compile"));

/// Extract the ordered plan file list from `text`.
pub fn extract_plan(text: &str) -> Vec<String> {
    let mut files = Vec::new();
    for raw_line in text.lines() {
        if files.len() >= MAX_PLAN_FILES {
            break;
        }
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(caps) = FILES_RE.captures(line) {
            for item in caps[1].split(',') {
                let item = clean_token(item);
                if !item.is_empty() && files.len() < MAX_PLAN_FILES {
                    files.push(item.to_string());
                }
            }
            continue;
        }
        if let Some(caps) = FILE_RE.captures(line) {
            let item = clean_token(&caps[1]);
            if !item.is_empty() {
                files.push(item.to_string());
            }
            continue;
        }
        if let Some(caps) = BULLET_RE.captures(line) {
            let item = clean_token(&caps[1]);
            if looks_like_source_file(item) {
                files.push(item.to_string());
            }
            continue;
        }
        let item = clean_token(line);
        if looks_like_source_file(item) {
            files.push(item.to_string());
        }
    }
    files
}

/// Heuristic: a single token naming a file with a known extension or a
/// well-known manifest name.
pub fn looks_like_source_file(token: &str) -> bool {
    if token.is_empty() || token.len() > MAX_PATH_LEN {
        return false;
    }
    if token.chars().any(char::is_whitespace) || token.contains("://") {
        return false;
    }
    let name = token.rsplit('/').next().unwrap_or(token);
    if name.is_empty() {
        return false;
    }
    is_code_like(name) || is_manifest_name(name)
}

fn clean_token(raw: &str) -> &str {
    raw.trim()
        .trim_matches(|c| matches!(c, '`' | '"' | '\'' | '*'))
        .trim_end_matches(|c| matches!(c, ',' | ';' | ':' | '.' | ')'))
        .trim()
}
