//! Lightweight previews for catalogued files.

use crate::models::FileRecord;
use base64::Engine;
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use std::path::Path;

pub const MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;
pub const TEXT_PREVIEW_CHARS: usize = 1000;
const SNIFF_BYTES: u64 = 8 * 1024;
const TEXT_EXTENSIONS: &[&str] = &[".txt", ".log", ".md", ".json", ".xml", ".csv"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviewKind {
    Image,
    Text,
    Binary,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilePreview {
    pub file: FileRecord,
    pub kind: PreviewKind,
    /// Data URI for images, leading text for text files.
    pub preview: Option<String>,
    pub error: Option<String>,
}

/// Builds a preview; read failures are reported in `error` instead of failing.
pub fn preview(file: FileRecord) -> FilePreview {
    let path = Path::new(&file.path).to_path_buf();
    let is_text = TEXT_EXTENSIONS.contains(&file.ext.as_str());
    let (kind, result) = match sniff(&path) {
        Ok(Some(mime)) if mime.starts_with("image/") => {
            (PreviewKind::Image, image_uri(&path, &mime))
        }
        Ok(_) if is_text => (PreviewKind::Text, text_head(&path).map(Some)),
        Ok(_) => (PreviewKind::Binary, Ok(None)),
        Err(err) => {
            let kind = if is_text {
                PreviewKind::Text
            } else {
                PreviewKind::Binary
            };
            (kind, Err(err))
        }
    };
    let (preview, error) = match result {
        Ok(p) => (p, None),
        Err(err) => (None, Some(err.to_string())),
    };
    FilePreview {
        file,
        kind,
        preview,
        error,
    }
}

fn sniff(path: &Path) -> io::Result<Option<String>> {
    let mut header = Vec::with_capacity(SNIFF_BYTES as usize);
    fs::File::open(path)?.take(SNIFF_BYTES).read_to_end(&mut header)?;
    Ok(infer::get(&header).map(|kind| kind.mime_type().to_string()))
}

fn image_uri(path: &Path, mime: &str) -> io::Result<Option<String>> {
    let len = fs::metadata(path)?.len();
    if len > MAX_IMAGE_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("image too large for preview ({len} bytes)"),
        ));
    }
    let bytes = fs::read(path)?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(Some(format!("data:{mime};base64,{encoded}")))
}

fn text_head(path: &Path) -> io::Result<String> {
    let mut bytes = Vec::new();
    fs::File::open(path)?
        .take((TEXT_PREVIEW_CHARS * 4) as u64)
        .read_to_end(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes)
        .chars()
        .take(TEXT_PREVIEW_CHARS)
        .collect())
}
