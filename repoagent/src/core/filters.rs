//! Static name filters used by the repository scan and plan extraction.

/// Directory and file names never scanned. Entries starting with `*` match
/// by suffix.
pub const IGNORED_NAMES: &[&str] = &[
    "node_modules",
    ".git",
    ".svn",
    "__pycache__",
    ".pytest_cache",
    "dist",
    "build",
    "target",
    ".next",
    ".vscode",
    ".idea",
    ".DS_Store",
    "*.pyc",
    "*.o",
    "*.a",
    "*.so",
    "*.dll",
    "*.exe",
    "*.class",
    "*.bak",
];

/// Extensions treated as code-like (listed in the snapshot).
pub const CODE_EXTENSIONS: &[&str] = &[
    ".c", ".h", ".cpp", ".cc", ".cxx", ".hpp", ".py", ".js", ".ts", ".jsx", ".tsx", ".java",
    ".cs", ".go", ".rs", ".rb", ".php", ".swift", ".kt", ".m", ".mm", ".scala", ".lua", ".pl",
    ".sh", ".toml", ".yaml", ".yml", ".json", ".xml", ".md", ".txt", ".sql", ".r", ".R",
];

/// Extension-less build files that are still worth listing.
pub const MANIFEST_NAMES: &[&str] = &[
    "Makefile",
    "makefile",
    "GNUmakefile",
    "Dockerfile",
    "Justfile",
    "justfile",
    "CMakeLists.txt",
    "README",
];

/// Small files always inlined into the snapshot: headers, READMEs, build and
/// package manifests.
const ALWAYS_USEFUL_NAMES: &[&str] = &[
    "README.md",
    "README",
    "Makefile",
    "CMakeLists.txt",
    "package.json",
    "Cargo.toml",
    "pyproject.toml",
    "setup.py",
    "go.mod",
    "pom.xml",
    "build.gradle",
];
const ALWAYS_USEFUL_SUFFIXES: &[&str] = &[".h", ".hpp"];

/// True for dotfiles and names in [`IGNORED_NAMES`].
pub fn is_ignored(name: &str) -> bool {
    if name.starts_with('.') {
        return true;
    }
    IGNORED_NAMES.iter().any(|pattern| match pattern.strip_prefix('*') {
        Some(suffix) => name.ends_with(suffix),
        None => name == *pattern,
    })
}

pub fn is_code_like(name: &str) -> bool {
    CODE_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

pub fn is_manifest_name(name: &str) -> bool {
    MANIFEST_NAMES.contains(&name)
}

/// Whether a regular file named `name` belongs in the structural listing.
pub fn is_listed_file(name: &str) -> bool {
    is_code_like(name) || is_manifest_name(name)
}

/// Whether `name` is in the curated always-inline set (size is checked by the caller).
pub fn is_always_useful(name: &str) -> bool {
    ALWAYS_USEFUL_NAMES.contains(&name)
        || ALWAYS_USEFUL_SUFFIXES
            .iter()
            .any(|suffix| name.ends_with(suffix))
}
