//! Plain-text sources for the chunker.
//!
//! These helpers are the only place the crate touches the filesystem. Read
//! failures surface as [`RagError::SourceUnavailable`].

use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::{debug, error};

use crate::chunking::{Chunker, normalize_line_endings};
use crate::config::ChunkingConfig;
use crate::document::{Document, Metadata};
use crate::error::{RagError, Result};

/// Read a UTF-8 text file and normalize its line endings.
///
/// # Errors
///
/// Returns [`RagError::SourceUnavailable`] if the file is missing, unreadable,
/// or not valid UTF-8.
pub fn load_text_file(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| {
        error!(path = %path.display(), error = %source, "failed to read source file");
        RagError::SourceUnavailable { path: path.to_path_buf(), source }
    })?;
    Ok(normalize_line_endings(&content))
}

/// Load a text file as a [`Document`].
///
/// The id is the file stem and the source is `"local_file"`; metadata records
/// the file path and its size in characters.
///
/// # Errors
///
/// Returns [`RagError::SourceUnavailable`] if the file cannot be read and
/// [`RagError::InvalidArgument`] if it is blank.
pub fn load_document(path: impl AsRef<Path>) -> Result<Document> {
    let path = path.as_ref();
    let content = load_text_file(path)?;
    let id = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let mut metadata = Metadata::new();
    metadata.insert("file_path".to_string(), Value::from(path.display().to_string()));
    metadata.insert("file_size".to_string(), Value::from(content.chars().count()));

    Ok(Document::new(id, content, "local_file")?.with_metadata(metadata))
}

/// Read a file and split it with `chunker`.
pub fn chunk_file(path: impl AsRef<Path>, chunker: &dyn Chunker) -> Result<Vec<String>> {
    let path = path.as_ref();
    let content = load_text_file(path)?;
    if content.trim().is_empty() {
        return Err(RagError::invalid(format!("file '{}' is empty", path.display())));
    }
    let chunks = chunker.split(&content);
    debug!(
        path = %path.display(),
        strategy = %chunker.strategy(),
        chunk_count = chunks.len(),
        "chunked file"
    );
    Ok(chunks)
}

/// Chunk several files in order and concatenate their chunks.
///
/// Stops at the first file that cannot be read.
pub fn chunk_files<P: AsRef<Path>>(paths: &[P], chunker: &dyn Chunker) -> Result<Vec<String>> {
    let mut all = Vec::new();
    for path in paths {
        all.extend(chunk_file(path, chunker)?);
    }
    Ok(all)
}

/// Chunk several files with the chunker described by `config`.
///
/// # Errors
///
/// Returns [`RagError::InvalidArgument`] for inconsistent chunking settings,
/// otherwise as [`chunk_files`].
pub fn chunk_files_with<P: AsRef<Path>>(
    paths: &[P],
    config: &ChunkingConfig,
) -> Result<Vec<String>> {
    let chunker = config.chunker()?;
    chunk_files(paths, chunker.as_ref())
}
