#![forbid(unsafe_code)]

//! Title and description extraction from the package's `.txt` file.

use std::fs;
use std::path::Path;

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoMetadata {
    pub title: String,
    pub description: String,
}

/// Reads `path` as UTF-8 and splits it with [`parse_description_text`].
pub fn parse_description(path: &Path) -> Result<VideoMetadata> {
    let bytes = fs::read(path)
        .map_err(|err| PipelineError::format(format!("reading {}: {err}", path.display())))?;
    let text = String::from_utf8(bytes)
        .map_err(|err| PipelineError::format(format!("{} is not UTF-8: {err}", path.display())))?;
    parse_description_text(&text)
}

/// First line is the title, the remaining lines joined by `\n` are the
/// description. An empty input or a blank title line is rejected.
pub fn parse_description_text(text: &str) -> Result<VideoMetadata> {
    let mut lines = text.lines();
    let title = lines
        .next()
        .ok_or_else(|| PipelineError::format("description file is empty"))?;
    if title.trim().is_empty() {
        return Err(PipelineError::format("first line (the title) is blank"));
    }
    let description = lines.collect::<Vec<_>>().join("\n");
    Ok(VideoMetadata {
        title: title.to_string(),
        description,
    })
}
