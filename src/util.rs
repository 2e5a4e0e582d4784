use anyhow::{Context, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::ToolError;

pub fn read_to_string(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

/// Lexically collapses `.` and `..` without touching the filesystem, so the
/// result is stable for paths that no longer exist (deleted files).
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Cache key for a file: absolute, cleaned, canonical where the file exists.
pub fn normalize_path(path: &Path) -> PathBuf {
    let cleaned = clean_path(path);
    match fs::canonicalize(&cleaned) {
        Ok(canonical) => canonical,
        Err(_) => cleaned,
    }
}

pub fn path_key(path: &Path) -> String {
    normalize_path(path).to_string_lossy().to_string()
}

pub fn is_within(root: &Path, path: &Path) -> bool {
    clean_path(path).starts_with(clean_path(root))
}

/// Resolves a user-supplied path against `root` and rejects anything that
/// lands outside of it.
pub fn resolve_in_root(root: &Path, raw: &str) -> Result<PathBuf, ToolError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ToolError::validation("path must not be empty"));
    }
    if trimmed.contains('\0') {
        return Err(ToolError::validation("path contains a NUL byte"));
    }
    let candidate = Path::new(trimmed);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };
    let normalized = normalize_path(&joined);
    let root = normalize_path(root);
    if !normalized.starts_with(&root) {
        return Err(ToolError::security(format!(
            "path {trimmed} escapes workspace root {}",
            root.display()
        )));
    }
    Ok(normalized)
}

pub fn hash_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_path_collapses_parent_components() {
        assert_eq!(
            clean_path(Path::new("/a/b/../c/./d.ts")),
            PathBuf::from("/a/c/d.ts")
        );
    }

    #[test]
    fn resolve_in_root_rejects_escape() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_in_root(dir.path(), "../../etc/passwd").unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::SecurityError);
        let err = resolve_in_root(dir.path(), "  ").unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ValidationError);
    }

    #[test]
    fn resolve_in_root_accepts_relative_and_absolute() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "").unwrap();
        let rel = resolve_in_root(dir.path(), "a.ts").unwrap();
        let abs = resolve_in_root(dir.path(), &dir.path().join("a.ts").to_string_lossy()).unwrap();
        assert_eq!(rel, abs);
    }
}
