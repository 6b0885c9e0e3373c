//! Workspace containment for operand paths.
//!
//! A path is accepted only if both hold:
//! 1. its lexical normalization (`.`/`..` folded) stays under the root, and
//! 2. the nearest existing ancestor, with symlinks resolved, stays under the root.
//!
//! The second check catches symlinks planted inside the workspace that point
//! elsewhere. A dangling symlink is treated as an escape.

use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::SecurityError;

/// Resolve `raw` against the canonical `root`, refusing anything outside it.
pub fn resolve_within(root: &Path, raw: &str) -> Result<PathBuf, SecurityError> {
    if raw.is_empty() {
        return Err(SecurityError::Malformed("empty path".to_string()));
    }
    if raw.contains('\0') {
        return Err(SecurityError::Malformed("path contains NUL".to_string()));
    }
    let escape = || SecurityError::PathEscape {
        raw: raw.to_string(),
    };

    let candidate = Path::new(raw);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };
    let normalized = normalize(&joined);
    if !is_contained(root, &normalized) {
        return Err(escape());
    }
    Ok(normalized)
}

/// Containment check for a path composed after operand resolution, such as
/// the `dir/<name>` target of a copy into an existing directory.
pub fn ensure_within(root: &Path, path: &Path) -> Result<(), SecurityError> {
    if is_contained(root, &normalize(path)) {
        Ok(())
    } else {
        Err(SecurityError::PathEscape {
            raw: display_relative(root, path),
        })
    }
}

fn is_contained(root: &Path, normalized: &Path) -> bool {
    if !normalized.starts_with(root) {
        return false;
    }
    let mut ancestor = normalized;
    loop {
        if fs::symlink_metadata(ancestor).is_ok() {
            return fs::canonicalize(ancestor).is_ok_and(|real| real.starts_with(root));
        }
        match ancestor.parent() {
            Some(parent) => ancestor = parent,
            None => return true,
        }
    }
}

/// Lexically fold `.` and `..`. `..` at the filesystem root stays at the root.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// Path relative to the root for display; the root itself renders as `.`.
pub fn display_relative(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
        Ok(rel) => rel.display().to_string(),
        Err(_) => path.display().to_string(),
    }
}
