//! Utility functions for reading and rewriting the managed text files

use crate::error::{Error, Result};
use std::path::Path;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

/// Read a managed file as text, treating a missing file as empty
///
/// Invalid UTF-8 is replaced rather than rejected. Only use this for text
/// that is inspected, never for text that is written back.
pub async fn read_text_or_empty(path: &Path) -> Result<String> {
    let bytes = read_bytes_or_empty(path).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Read a managed file as raw bytes, treating a missing file as empty
pub async fn read_bytes_or_empty(path: &Path) -> Result<Vec<u8>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(Error::file(path, e)),
    }
}

/// Truncate `path` and write `contents` as its full new content
///
/// The length on disk is checked after the write is synced. A mismatch is
/// reported as [`Error::ShortWrite`]; the file is then in an unknown state
/// and the caller must not treat the update as done.
pub async fn rewrite_file(path: &Path, contents: impl AsRef<[u8]>) -> Result<()> {
    let contents = contents.as_ref();
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .await
        .map_err(|e| Error::file(path, e))?;

    file.write_all(contents)
        .await
        .map_err(|e| Error::file(path, e))?;
    file.flush().await.map_err(|e| Error::file(path, e))?;
    file.sync_all().await.map_err(|e| Error::file(path, e))?;

    let written = file
        .seek(std::io::SeekFrom::End(0))
        .await
        .map_err(|e| Error::file(path, e))?;
    check_length(path, written as usize, contents.len())
}

/// Append `contents` to `path`, creating it if needed
pub async fn append_to_file(path: &Path, contents: impl AsRef<[u8]>) -> Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .await
        .map_err(|e| Error::file(path, e))?;
    file.write_all(contents.as_ref())
        .await
        .map_err(|e| Error::file(path, e))?;
    file.flush().await.map_err(|e| Error::file(path, e))
}

fn check_length(path: &Path, written: usize, expected: usize) -> Result<()> {
    if written != expected {
        return Err(Error::ShortWrite {
            path: path.to_path_buf(),
            written,
            expected,
        });
    }
    Ok(())
}

/// Join records one per line, with a trailing newline unless there are none
pub fn join_lines<S: AsRef<[u8]>>(records: &[S]) -> Vec<u8> {
    let mut out = Vec::with_capacity(records.iter().map(|r| r.as_ref().len() + 1).sum());
    for record in records {
        out.extend_from_slice(record.as_ref());
        out.push(b'\n');
    }
    out
}
