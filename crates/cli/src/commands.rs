//! Argument parsing and text rendering helpers for the `dedupe` binary.

use anyhow::{bail, Context, Result};
use dedupe_core::models::{DuplicateGroup, ScanProgress};
use dedupe_core::output::DirNode;

/// Parses `1,2, 3` into ids; blanks are skipped.
pub fn parse_ids(raw: &str) -> Result<Vec<i64>> {
    let ids = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<i64>().with_context(|| format!("invalid file id `{s}`")))
        .collect::<Result<Vec<_>>>()?;
    if ids.is_empty() {
        bail!("no file ids given");
    }
    Ok(ids)
}

pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

pub fn progress_line(p: &ScanProgress) -> String {
    format!(
        "{} {}: {}/{} files ({}%)",
        p.task_id, p.status, p.processed_files, p.total_files, p.progress
    )
}

pub fn render_group(group: &DuplicateGroup) -> String {
    let mut out = format!(
        "{} x {} ({}) hash {}\n",
        group.file_count,
        human_bytes(group.size),
        group.size,
        &group.hash[..group.hash.len().min(12)]
    );
    for file in &group.files {
        out.push_str(&format!("  [{}] {}\n", file.id, file.path));
    }
    out
}

/// Indented directory listing, one node per line.
pub fn render_tree(root: &DirNode) -> String {
    let mut out = String::new();
    let label = if root.name.is_empty() { "." } else { &root.name };
    out.push_str(label);
    out.push('\n');
    for child in &root.children {
        render_node(child, 1, &mut out);
    }
    out
}

fn render_node(node: &DirNode, depth: usize, out: &mut String) {
    out.push_str(&"  ".repeat(depth));
    out.push_str(&node.name);
    out.push_str("/\n");
    for child in &node.children {
        render_node(child, depth + 1, out);
    }
}
