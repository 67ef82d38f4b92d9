//! Directory view of the output root.

use crate::error::{DedupeError, Result};
use crate::paths::{relative_display, resolve_within, validate_file_name};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::{info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirNode {
    pub name: String,
    /// Relative to the output root, `/`-separated.
    pub path: String,
    pub children: Vec<DirNode>,
}

/// Directory tree below `root`, sorted by name. Symlinked directories are not
/// followed and files are omitted.
pub fn output_tree(root: &Path) -> Result<DirNode> {
    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let children = if root.is_dir() {
        children_of(root, root)
    } else {
        Vec::new()
    };
    Ok(DirNode {
        name,
        path: String::new(),
        children,
    })
}

fn children_of(root: &Path, dir: &Path) -> Vec<DirNode> {
    let mut nodes = Vec::new();
    let entries = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name();
    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "cannot list directory");
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        nodes.push(DirNode {
            name: entry.file_name().to_string_lossy().into_owned(),
            path: relative_display(root, entry.path()),
            children: children_of(root, entry.path()),
        });
    }
    nodes
}

/// Creates `name` under `parent` (both relative to `root`) and returns the new
/// directory's relative path.
pub fn create_directory(root: &Path, parent: &str, name: &str) -> Result<String> {
    validate_file_name(name)?;
    let relative = Path::new(parent).join(name);
    let dir = resolve_within(root, &relative.to_string_lossy())?;
    fs::create_dir_all(&dir).map_err(|e| DedupeError::io(&dir, e))?;
    info!(dir = %dir.display(), "output directory created");
    Ok(relative_display(root, &dir))
}
