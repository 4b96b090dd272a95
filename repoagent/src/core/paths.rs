//! Normalization of engine-supplied relative paths.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Why a generated path was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UnsafePath {
    #[error("path is empty")]
    Empty,
    #[error("path is absolute")]
    Absolute,
    #[error("path escapes the workdir")]
    ParentTraversal,
}

/// Normalize `raw` into a relative path that stays under the workdir.
///
/// `.` components are dropped; `..`, roots and drive prefixes are rejected.
pub fn normalize_relative(raw: &str) -> Result<PathBuf, UnsafePath> {
    let mut out = PathBuf::new();
    for component in Path::new(raw.trim()).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir => return Err(UnsafePath::ParentTraversal),
            Component::RootDir | Component::Prefix(_) => return Err(UnsafePath::Absolute),
        }
    }
    if out.as_os_str().is_empty() {
        return Err(UnsafePath::Empty);
    }
    Ok(out)
}

/// Render a relative path with `/` separators regardless of platform.
pub fn display_relative(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_plain_relative_paths() {
        assert_eq!(
            normalize_relative("src/main.c"),
            Ok(PathBuf::from("src/main.c"))
        );
        assert_eq!(
            normalize_relative("./src/./lib.rs"),
            Ok(PathBuf::from("src/lib.rs"))
        );
    }

    #[test]
    fn rejects_escaping_paths() {
        assert_eq!(
            normalize_relative("../etc/passwd"),
            Err(UnsafePath::ParentTraversal)
        );
        assert_eq!(
            normalize_relative("src/../../x"),
            Err(UnsafePath::ParentTraversal)
        );
        assert_eq!(normalize_relative("/etc/passwd"), Err(UnsafePath::Absolute));
        assert_eq!(normalize_relative("  "), Err(UnsafePath::Empty));
        assert_eq!(normalize_relative("."), Err(UnsafePath::Empty));
    }

    #[test]
    fn display_uses_forward_slashes() {
        let path: PathBuf = ["src", "io", "mod.rs"].iter().collect();
        assert_eq!(display_relative(&path), "src/io/mod.rs");
    }
}
