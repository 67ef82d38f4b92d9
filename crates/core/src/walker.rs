//! Lazy directory traversal with exclusion rules.

use crate::config::ScanConfig;
use crate::error::{DedupeError, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    /// Lowercase with leading dot, empty when the file has no extension.
    pub ext: String,
}

#[derive(Debug, Clone)]
pub struct WalkOptions {
    pub exclude_dirs: HashSet<String>,
    pub exclude_extensions: HashSet<String>,
    pub exclude_files: GlobSet,
    pub min_size: u64,
    pub max_size: Option<u64>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            exclude_dirs: HashSet::new(),
            exclude_extensions: HashSet::new(),
            exclude_files: GlobSet::empty(),
            min_size: 0,
            max_size: None,
        }
    }
}

impl WalkOptions {
    pub fn from_config(cfg: &ScanConfig) -> Result<Self> {
        let exclude_files = build_globset(&cfg.exclude_files)?;
        Ok(Self {
            exclude_dirs: cfg.exclude_dirs.iter().cloned().collect(),
            exclude_extensions: cfg
                .exclude_extensions
                .iter()
                .map(|e| normalize_ext(e))
                .filter(|e| !e.is_empty())
                .collect(),
            exclude_files,
            min_size: cfg.min_file_size,
            max_size: (cfg.max_file_size > 0).then_some(cfg.max_file_size as u64),
        })
    }

    fn skips_dir(&self, entry: &DirEntry) -> bool {
        entry.depth() > 0
            && entry.file_type().is_dir()
            && entry
                .file_name()
                .to_str()
                .map(|n| self.exclude_dirs.contains(n))
                .unwrap_or(false)
    }

    fn accepts(&self, name: &str, ext: &str, size: u64) -> bool {
        if !ext.is_empty() && self.exclude_extensions.contains(ext) {
            return false;
        }
        if self.exclude_files.is_match(name) {
            return false;
        }
        if size < self.min_size {
            return false;
        }
        if let Some(max) = self.max_size {
            if size > max {
                return false;
            }
        }
        true
    }
}

type EntryIter = Box<dyn Iterator<Item = walkdir::Result<DirEntry>> + Send>;

/// Depth-first iterator over every eligible file below the configured roots.
///
/// Roots are walked one after another in the order given; entries inside a
/// directory are visited in file-name order. Unreadable entries are logged
/// and skipped.
pub struct Walker {
    roots: std::vec::IntoIter<PathBuf>,
    current: Option<EntryIter>,
    options: Arc<WalkOptions>,
}

impl Walker {
    pub fn new(roots: Vec<PathBuf>, options: WalkOptions) -> Self {
        Self {
            roots: resolve_roots(&roots).into_iter(),
            current: None,
            options: Arc::new(options),
        }
    }

    fn open_next_root(&mut self) -> bool {
        let Some(root) = self.roots.next() else {
            return false;
        };
        debug!(root = %root.display(), "walking root");
        let options = Arc::clone(&self.options);
        let iter = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |e| !options.skips_dir(e));
        self.current = Some(Box::new(iter));
        true
    }

    fn describe(&self, entry: DirEntry) -> Option<FileDescriptor> {
        if !entry.file_type().is_file() {
            return None;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let ext = extension_of(entry.path());
        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(err) => {
                warn!(path = %entry.path().display(), error = %err, "cannot stat file, skipping");
                return None;
            }
        };
        let size = meta.len();
        if !self.options.accepts(&name, &ext, size) {
            return None;
        }
        Some(FileDescriptor {
            path: entry.into_path(),
            name,
            size,
            ext,
        })
    }
}

impl Iterator for Walker {
    type Item = FileDescriptor;

    fn next(&mut self) -> Option<FileDescriptor> {
        loop {
            if self.current.is_none() && !self.open_next_root() {
                return None;
            }
            let next = self.current.as_mut().and_then(|it| it.next());
            match next {
                None => self.current = None,
                Some(Err(err)) => {
                    let path = err
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default();
                    warn!(path = %path, error = %err, "walk error, skipping entry");
                }
                Some(Ok(entry)) => {
                    if let Some(file) = self.describe(entry) {
                        return Some(file);
                    }
                }
            }
        }
    }
}

/// Lowercase extension with leading dot, or an empty string.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default()
}

/// Accepts `jpg`, `.JPG` or `*.jpg` and returns `.jpg`.
pub fn normalize_ext(ext: &str) -> String {
    let trimmed = ext.trim().trim_start_matches('*').trim_start_matches('.');
    if trimmed.is_empty() {
        return String::new();
    }
    format!(".{}", trimmed.to_lowercase())
}

/// Canonical, absolute forms of `roots` with aliases and nested roots collapsed.
/// Roots that cannot be resolved (missing, unreadable) are logged and dropped.
pub fn resolve_roots(roots: &[PathBuf]) -> Vec<PathBuf> {
    let canonical = roots
        .iter()
        .filter_map(|root| match root.canonicalize() {
            Ok(real) => Some(real),
            Err(err) => {
                warn!(root = %root.display(), error = %err, "cannot resolve scan root, skipping");
                None
            }
        })
        .collect();
    collapse_roots(canonical)
}

/// Drops repeated roots and roots nested inside an earlier one so that no
/// file is yielded twice. Order of the survivors is preserved.
pub fn collapse_roots(roots: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut kept: Vec<PathBuf> = Vec::with_capacity(roots.len());
    for root in &roots {
        let covered = roots
            .iter()
            .any(|other| other != root && root.starts_with(other));
        if covered || kept.contains(root) {
            warn!(root = %root.display(), "root overlaps another scan root, skipping");
            continue;
        }
        kept.push(root.clone());
    }
    kept
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat)
            .map_err(|e| DedupeError::Config(format!("invalid glob `{pat}`: {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| DedupeError::Config(format!("invalid exclusion globs: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(path: &Path, bytes: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
    }

    fn names(walker: Walker) -> Vec<String> {
        walker.map(|f| f.name).collect()
    }

    #[test]
    fn walks_depth_first_in_name_order() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        write(&root.join("b.txt"), b"b");
        write(&root.join("a/z.txt"), b"z");
        write(&root.join("a/y/x.txt"), b"x");
        write(&root.join("c.TXT"), b"c");

        let files: Vec<FileDescriptor> =
            Walker::new(vec![root.to_path_buf()], WalkOptions::default()).collect();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["x.txt", "z.txt", "b.txt", "c.TXT"]);
        assert_eq!(files[3].ext, ".txt");
        assert_eq!(files[0].size, 1);
    }

    #[test]
    fn excluded_directories_are_not_descended() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        write(&root.join("keep/a.txt"), b"a");
        write(&root.join("node_modules/pkg/b.txt"), b"b");
        write(&root.join("keep/node_modules/c.txt"), b"c");

        let opts = WalkOptions {
            exclude_dirs: ["node_modules".to_string()].into_iter().collect(),
            ..Default::default()
        };
        assert_eq!(names(Walker::new(vec![root.to_path_buf()], opts)), vec!["a.txt"]);
    }

    #[test]
    fn root_is_walked_even_if_its_name_is_excluded() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("build");
        write(&root.join("out.bin"), b"1");

        let opts = WalkOptions {
            exclude_dirs: ["build".to_string()].into_iter().collect(),
            ..Default::default()
        };
        assert_eq!(names(Walker::new(vec![root], opts)), vec!["out.bin"]);
    }

    #[test]
    fn extension_name_and_size_filters_skip_files() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        write(&root.join("small.dat"), b"1");
        write(&root.join("medium.dat"), &[0u8; 10]);
        write(&root.join("large.dat"), &[0u8; 100]);
        write(&root.join("skip.LOG"), &[0u8; 10]);
        write(&root.join(".DS_Store"), &[0u8; 10]);

        let cfg = ScanConfig {
            exclude_extensions: vec!["log".into()],
            exclude_files: vec![".DS_Store".into()],
            min_file_size: 5,
            max_file_size: 50,
            ..Default::default()
        };
        let opts = WalkOptions::from_config(&cfg).unwrap();
        assert_eq!(names(Walker::new(vec![root.to_path_buf()], opts)), vec!["medium.dat"]);
    }

    #[test]
    fn non_positive_max_size_is_unbounded() {
        let cfg = ScanConfig {
            max_file_size: 0,
            ..Default::default()
        };
        let opts = WalkOptions::from_config(&cfg).unwrap();
        assert_eq!(opts.max_size, None);
        assert!(opts.accepts("big.iso", ".iso", u64::MAX));
    }

    #[test]
    fn missing_roots_are_skipped_and_later_roots_still_walked() {
        let temp = tempfile::tempdir().unwrap();
        let present = temp.path().join("present");
        write(&present.join("a.txt"), b"a");
        let roots = vec![temp.path().join("missing"), present];
        assert_eq!(names(Walker::new(roots, WalkOptions::default())), vec!["a.txt"]);
    }

    #[test]
    fn overlapping_roots_yield_each_file_once() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().to_path_buf();
        write(&root.join("sub/a.txt"), b"a");
        let roots = vec![root.join("sub"), root.clone(), root.clone()];
        assert_eq!(collapse_roots(roots.clone()), vec![root.clone()]);
        assert_eq!(names(Walker::new(roots, WalkOptions::default())), vec!["a.txt"]);
    }

    #[test]
    fn relative_and_aliased_roots_are_walked_once_with_absolute_paths() {
        // Created under the working directory so that its path is relative.
        let temp = tempfile::tempdir_in(".").unwrap();
        let root = temp.path().join("incoming");
        write(&root.join("only.txt"), b"one");
        assert!(root.is_relative());

        let mut roots = vec![
            root.clone(),
            temp.path().join("incoming/../incoming"),
            std::env::current_dir().unwrap().join(&root),
        ];
        #[cfg(unix)]
        {
            let alias = temp.path().join("alias");
            std::os::unix::fs::symlink(root.canonicalize().unwrap(), &alias).unwrap();
            roots.push(alias);
        }

        let files: Vec<FileDescriptor> =
            Walker::new(roots.clone(), WalkOptions::default()).collect();
        assert_eq!(files.len(), 1);
        assert!(files[0].path.is_absolute());
        assert_eq!(files[0].path, root.canonicalize().unwrap().join("only.txt"));
        assert_eq!(resolve_roots(&roots), vec![root.canonicalize().unwrap()]);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_not_followed() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("root");
        let elsewhere = temp.path().join("elsewhere");
        write(&root.join("real.txt"), b"r");
        write(&elsewhere.join("target.txt"), b"t");
        std::os::unix::fs::symlink(&elsewhere, root.join("linked_dir")).unwrap();
        std::os::unix::fs::symlink(elsewhere.join("target.txt"), root.join("link.txt")).unwrap();

        assert_eq!(names(Walker::new(vec![root], WalkOptions::default())), vec!["real.txt"]);
    }

    #[test]
    fn normalize_ext_accepts_loose_spellings() {
        assert_eq!(normalize_ext("JPG"), ".jpg");
        assert_eq!(normalize_ext(".Png"), ".png");
        assert_eq!(normalize_ext("*.gz"), ".gz");
        assert_eq!(normalize_ext(""), "");
        assert_eq!(extension_of(Path::new("/x/archive.tar.GZ")), ".gz");
        assert_eq!(extension_of(Path::new("/x/Makefile")), "");
    }
}
