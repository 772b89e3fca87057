// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Durable cursor storage for the shipping loop.
//!
//! The bookmark is a small sidecar file holding a single line of the form
//! `<offset>:::<filename>`. It records the next unread byte in the buffer file
//! currently being drained.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const SEPARATOR: &str = ":::";

/// Next unread byte in a buffer file.
///
/// `FileSetPosition::none()` (no file, offset 0) means nothing has ever been read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSetPosition {
    pub file: Option<PathBuf>,
    pub next_line_start: u64,
}

impl FileSetPosition {
    pub fn new(next_line_start: u64, file: Option<PathBuf>) -> Self {
        FileSetPosition {
            file,
            next_line_start,
        }
    }

    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_none(&self) -> bool {
        self.file.is_none()
    }
}

/// Open handle on the bookmark sidecar file.
///
/// The handle is closed when the value is dropped, so the owning scope releases it
/// on every exit path.
#[derive(Debug)]
pub struct BookmarkFile {
    path: PathBuf,
    file: File,
}

impl BookmarkFile {
    /// Opens the bookmark at `path`, creating it when absent.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        Ok(BookmarkFile { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the persisted cursor.
    ///
    /// Empty or malformed content yields [`FileSetPosition::none`]; only genuine I/O
    /// failures are returned as errors.
    pub fn try_read_bookmark(&mut self) -> io::Result<FileSetPosition> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut content = Vec::new();
        self.file.read_to_end(&mut content)?;
        if content.is_empty() {
            return Ok(FileSetPosition::none());
        }

        // Only the first line is meaningful. Bytes after it are leftovers from a
        // longer, earlier record.
        let first_line = match content.iter().position(|&b| b == b'\n') {
            Some(end) => &content[..end],
            None => &content[..],
        };
        match parse_bookmark_line(first_line) {
            Some(position) => Ok(position),
            None => {
                debug!(
                    "LOG SHIPPER | Ignoring malformed bookmark in {}",
                    self.path.display()
                );
                Ok(FileSetPosition::none())
            }
        }
    }

    /// Persists `position`, overwriting the record in place.
    ///
    /// Positions without a file are not written. The file is never truncated: a
    /// shorter record leaves stale trailing bytes after its newline, which readers
    /// ignore.
    pub fn write_bookmark(&mut self, position: &FileSetPosition) -> io::Result<()> {
        let Some(file) = position.file.as_ref() else {
            return Ok(());
        };
        let record = format!(
            "{}{}{}\n",
            position.next_line_start,
            SEPARATOR,
            file.display()
        );
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(record.as_bytes())?;
        self.file.flush()
    }
}

fn parse_bookmark_line(line: &[u8]) -> Option<FileSetPosition> {
    let line = std::str::from_utf8(line).ok()?;
    let line = line.strip_suffix('\r').unwrap_or(line);
    let parts: Vec<&str> = line.split(SEPARATOR).collect();
    if parts.len() != 2 || parts[1].is_empty() {
        return None;
    }
    let offset = parts[0].trim().parse::<u64>().ok()?;
    Some(FileSetPosition::new(offset, Some(PathBuf::from(parts[1]))))
}
