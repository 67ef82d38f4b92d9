//! Containment checks for paths supplied by callers.

use crate::error::{DedupeError, Result};
use std::io;
use std::path::{Component, Path, PathBuf};

/// Resolves `relative` below `root`, refusing anything that would land outside it.
///
/// The check is done twice: lexically (`..` may not climb above the root, a
/// leading `/` is ignored) and physically, by canonicalizing the deepest
/// existing ancestor of the result and comparing it with the canonical root,
/// so a symlinked directory inside the root cannot redirect writes elsewhere.
pub fn resolve_within(root: &Path, relative: &str) -> Result<PathBuf> {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(DedupeError::UnsafePath(relative.to_string()));
                }
            }
            Component::Normal(part) => parts.push(part),
        }
    }
    let candidate = parts.iter().fold(root.to_path_buf(), |acc, p| acc.join(p));

    let canonical_root = match root.canonicalize() {
        Ok(p) => p,
        // Nothing below a missing root can be a symlink yet.
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(candidate),
        Err(source) => return Err(DedupeError::io(root, source)),
    };

    let mut ancestor = candidate.as_path();
    loop {
        match ancestor.canonicalize() {
            Ok(real) => {
                if !real.starts_with(&canonical_root) {
                    return Err(DedupeError::UnsafePath(relative.to_string()));
                }
                break;
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                if ancestor.symlink_metadata().is_ok() {
                    // Dangling symlink: its target is unknown.
                    return Err(DedupeError::UnsafePath(relative.to_string()));
                }
                match ancestor.parent() {
                    Some(parent) => ancestor = parent,
                    None => break,
                }
            }
            Err(source) => return Err(DedupeError::io(ancestor, source)),
        }
    }
    Ok(candidate)
}

/// Accepts only a single, plain file-name component.
pub fn validate_file_name(name: &str) -> Result<()> {
    let unsafe_name = || DedupeError::UnsafePath(format!("invalid file name `{name}`"));
    if name.trim().is_empty() || name.contains(['/', '\\', '\0']) {
        return Err(unsafe_name());
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(unsafe_name()),
    }
}

/// `path` relative to `root`, `/`-separated; empty for the root itself.
pub fn relative_display(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn plain_and_nested_targets_resolve_below_root() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        assert_eq!(resolve_within(root, "photos/2024").unwrap(), root.join("photos/2024"));
        assert_eq!(resolve_within(root, "").unwrap(), root.to_path_buf());
        assert_eq!(resolve_within(root, "a/../b").unwrap(), root.join("b"));
        assert_eq!(resolve_within(root, "/abs/dir").unwrap(), root.join("abs/dir"));
    }

    #[test]
    fn parent_traversal_above_root_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        for bad in ["..", "../x", "a/../../x", "/../etc"] {
            let err = resolve_within(temp.path(), bad).unwrap_err();
            assert!(matches!(err, DedupeError::UnsafePath(_)), "{bad}");
        }
    }

    #[test]
    fn missing_root_falls_back_to_lexical_check() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("not-yet");
        assert_eq!(resolve_within(&root, "x").unwrap(), root.join("x"));
        assert!(resolve_within(&root, "../x").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escaping_the_root_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("out");
        let outside = temp.path().join("outside");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("escape")).unwrap();
        std::os::unix::fs::symlink(temp.path().join("gone"), root.join("dangling")).unwrap();

        assert!(matches!(
            resolve_within(&root, "escape/sub"),
            Err(DedupeError::UnsafePath(_))
        ));
        assert!(matches!(
            resolve_within(&root, "dangling/sub"),
            Err(DedupeError::UnsafePath(_))
        ));

        fs::create_dir_all(root.join("inner")).unwrap();
        std::os::unix::fs::symlink(root.join("inner"), root.join("alias")).unwrap();
        assert!(resolve_within(&root, "alias/new").is_ok());
    }

    #[test]
    fn file_names_must_be_single_components() {
        for ok in ["a.txt", "photo 1.JPG", ".hidden"] {
            assert!(validate_file_name(ok).is_ok(), "{ok}");
        }
        for bad in ["", "  ", ".", "..", "a/b", "a\\b", "/x"] {
            assert!(validate_file_name(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn relative_display_uses_forward_slashes() {
        let root = Path::new("/out");
        assert_eq!(relative_display(root, Path::new("/out/a/b")), "a/b");
        assert_eq!(relative_display(root, Path::new("/out")), "");
    }
}
