//! Filesystem side of a consolidation: verified copy, removal, pruning.

use crate::error::{DedupeError, Result};
use filetime::FileTime;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Copies `src` to `dest` and verifies the bytes against the catalogued fingerprint.
///
/// The data goes to a temp file next to `dest` first, is hashed while it is
/// copied, synced, stamped with the source's access and modification times
/// and finally published with a no-clobber rename. The temp file is removed
/// on any failure. An existing `dest` yields [`DedupeError::Conflict`].
pub fn copy_verified(
    src: &Path,
    dest: &Path,
    expected_hash: &str,
    expected_size: u64,
    chunk_size: usize,
) -> Result<()> {
    let dest_dir = dest
        .parent()
        .ok_or_else(|| DedupeError::UnsafePath(dest.display().to_string()))?;
    fs::create_dir_all(dest_dir).map_err(|e| DedupeError::io(dest_dir, e))?;
    if dest.symlink_metadata().is_ok() {
        return Err(DedupeError::Conflict(dest.to_path_buf()));
    }

    let mut source = fs::File::open(src).map_err(|e| DedupeError::io(src, e))?;
    let meta = source.metadata().map_err(|e| DedupeError::io(src, e))?;
    let mut tmp = NamedTempFile::new_in(dest_dir).map_err(|e| DedupeError::io(dest_dir, e))?;

    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut copied: u64 = 0;
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(DedupeError::io(src, e)),
        };
        hasher.update(&buf[..n]);
        tmp.write_all(&buf[..n])
            .map_err(|e| DedupeError::io(tmp.path(), e))?;
        copied += n as u64;
    }

    let actual = hasher.finalize().to_hex().to_string();
    if copied != expected_size || actual != expected_hash {
        return Err(DedupeError::io(
            src,
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "content changed since scan (expected {expected_size} bytes, read {copied})"
                ),
            ),
        ));
    }

    tmp.as_file()
        .sync_all()
        .map_err(|e| DedupeError::io(tmp.path(), e))?;
    let atime = FileTime::from_last_access_time(&meta);
    let mtime = FileTime::from_last_modification_time(&meta);
    filetime::set_file_handle_times(tmp.as_file(), Some(atime), Some(mtime))
        .map_err(|e| DedupeError::io(tmp.path(), e))?;

    match tmp.persist_noclobber(dest) {
        Ok(_) => {
            debug!(src = %src.display(), dest = %dest.display(), bytes = copied, "copy published");
            Ok(())
        }
        Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
            Err(DedupeError::Conflict(dest.to_path_buf()))
        }
        Err(err) => Err(DedupeError::io(dest, err.error)),
    }
}

/// Removes empty directories from `start` upwards.
///
/// Stops at the first directory that is not empty, at any of `roots`, or once
/// the walk leaves all of them. Returns the removed directories.
pub fn prune_empty_dirs(start: &Path, roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    let mut dir = start.to_path_buf();
    loop {
        if roots.iter().any(|r| dir == *r) || !roots.iter().any(|r| dir.starts_with(r)) {
            break;
        }
        match fs::remove_dir(&dir) {
            Ok(()) => {
                debug!(dir = %dir.display(), "pruned empty directory");
                removed.push(dir.clone());
            }
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound && !is_not_empty(&dir) {
                    warn!(dir = %dir.display(), error = %err, "could not prune directory");
                }
                break;
            }
        }
        match dir.parent() {
            Some(parent) => dir = parent.to_path_buf(),
            None => break,
        }
    }
    removed
}

fn is_not_empty(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher;

    fn fixture(dir: &Path, name: &str, bytes: &[u8]) -> (PathBuf, String) {
        let path = dir.join(name);
        fs::write(&path, bytes).unwrap();
        let hash = hasher::hash_file(&path, 4096).unwrap();
        (path, hash)
    }

    #[test]
    fn copy_preserves_bytes_and_mtime() {
        let temp = tempfile::tempdir().unwrap();
        let (src, hash) = fixture(temp.path(), "src.bin", b"hello duplicate");
        let old = FileTime::from_unix_time(1_500_000_000, 0);
        filetime::set_file_mtime(&src, old).unwrap();

        let dest = temp.path().join("out/nested/copy.bin");
        copy_verified(&src, &dest, &hash, 15, 4).unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"hello duplicate");
        let meta = fs::metadata(&dest).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&meta), old);
        // Only the published file is left in the directory.
        assert_eq!(fs::read_dir(dest.parent().unwrap()).unwrap().count(), 1);
    }

    #[test]
    fn existing_destination_is_a_conflict() {
        let temp = tempfile::tempdir().unwrap();
        let (src, hash) = fixture(temp.path(), "src.txt", b"abc");
        let dest = temp.path().join("taken.txt");
        fs::write(&dest, b"other").unwrap();

        let err = copy_verified(&src, &dest, &hash, 3, 1024).unwrap_err();
        assert!(matches!(err, DedupeError::Conflict(_)));
        assert_eq!(fs::read(&dest).unwrap(), b"other");
    }

    #[test]
    fn changed_source_is_refused_and_leaves_nothing_behind() {
        let temp = tempfile::tempdir().unwrap();
        let (src, hash) = fixture(temp.path(), "src.txt", b"before");
        fs::write(&src, b"after!").unwrap();

        let out = temp.path().join("out");
        let err = copy_verified(&src, &out.join("x.txt"), &hash, 6, 1024).unwrap_err();
        assert!(matches!(err, DedupeError::Io { .. }));
        assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
    }

    #[test]
    fn pruning_stops_at_roots_and_non_empty_dirs() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("root");
        fs::create_dir_all(root.join("a/b/c")).unwrap();
        fs::write(root.join("a/keep.txt"), b"k").unwrap();

        let removed = prune_empty_dirs(&root.join("a/b/c"), &[root.clone()]);
        assert_eq!(removed, vec![root.join("a/b/c"), root.join("a/b")]);
        assert!(root.join("a").exists());

        fs::remove_file(root.join("a/keep.txt")).unwrap();
        prune_empty_dirs(&root.join("a"), &[root.clone()]);
        assert!(!root.join("a").exists());
        assert!(root.exists());
    }

    #[test]
    fn pruning_ignores_directories_outside_roots() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("root");
        let other = temp.path().join("other/empty");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&other).unwrap();
        assert!(prune_empty_dirs(&other, &[root]).is_empty());
        assert!(other.exists());
    }
}
