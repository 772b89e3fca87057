// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turning runs of buffered lines into ingestion payloads.
//!
//! [`PayloadReader`] separates the line framing of buffer files from the shape of
//! the batch a particular ingestion target expects. Implementors supply three
//! hooks (`init_payload`, `add_to_payload`, `finish_payload`) and an empty value.
//! The provided [`PayloadReader::read_payload`] walks the file.
//!
//! # Framing
//!
//! - Only newline-terminated lines are consumed; a trailing partial line is left
//!   for a later read because the writer may still be appending to it.
//! - A UTF-8 byte order mark at the start of the file is skipped.
//! - Blank lines are skipped, but their bytes are consumed.

use crate::bookmark::FileSetPosition;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::marker::PhantomData;
use std::path::Path;
use tracing::warn;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Result of one [`PayloadReader::read_payload`] call.
#[derive(Debug)]
pub struct PayloadRead<T> {
    pub payload: T,
    /// Position immediately after the last consumed line.
    pub position: FileSetPosition,
    /// Number of lines added to the payload.
    pub count: usize,
}

pub trait PayloadReader: Send + 'static {
    type Payload: Send;

    /// The canonical empty payload, used when there is no file to read.
    fn no_payload(&self) -> Self::Payload;

    fn init_payload(&mut self, filename: &Path);

    fn add_to_payload(&mut self, line: &str);

    fn finish_payload(&mut self) -> Self::Payload;

    /// Reads up to `batch_limit` lines from `filename` starting at
    /// `position.next_line_start`.
    ///
    /// When `byte_limit` is set, reading stops before a line that would take the
    /// accumulated size over the limit. The first line is always included, however
    /// large, so an oversized line can never stall the stream.
    ///
    /// A file shorter than the recorded position yields zero lines.
    fn read_payload(
        &mut self,
        batch_limit: usize,
        byte_limit: Option<u64>,
        position: &FileSetPosition,
        filename: &Path,
    ) -> io::Result<PayloadRead<Self::Payload>> {
        let mut next_line_start = position.next_line_start;
        let mut count = 0;
        let mut accumulated_bytes: u64 = 0;

        self.init_payload(filename);

        let file = File::open(filename)?;
        let length = file.metadata()?.len();
        if length > next_line_start {
            let mut reader = BufReader::new(file);
            reader.seek(SeekFrom::Start(next_line_start))?;

            if next_line_start == 0 && reader.fill_buf()?.starts_with(UTF8_BOM) {
                reader.consume(UTF8_BOM.len());
                next_line_start = UTF8_BOM.len() as u64;
            }

            let mut line = Vec::new();
            while count < batch_limit {
                line.clear();
                let read = reader.read_until(b'\n', &mut line)?;
                if read == 0 || line.last() != Some(&b'\n') {
                    break;
                }

                let content = trim_line_ending(&line);
                if content.iter().all(u8::is_ascii_whitespace) {
                    next_line_start += read as u64;
                    continue;
                }

                let content_bytes = content.len() as u64;
                if let Some(limit) = byte_limit {
                    if count > 0 && accumulated_bytes.saturating_add(content_bytes) > limit {
                        break;
                    }
                }

                self.add_to_payload(&String::from_utf8_lossy(content));
                accumulated_bytes = accumulated_bytes.saturating_add(content_bytes);
                next_line_start += read as u64;
                count += 1;
            }
        }

        Ok(PayloadRead {
            payload: self.finish_payload(),
            position: FileSetPosition::new(next_line_start, Some(filename.to_path_buf())),
            count,
        })
    }
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Reads buffer files holding one JSON document per line into a `Vec<T>`.
///
/// Lines that do not parse as `T` are dropped with a warning; they still count as
/// consumed so the bookmark moves past them.
pub struct JsonLinesPayloadReader<T> {
    events: Vec<T>,
    current_file: Option<String>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Default for JsonLinesPayloadReader<T> {
    fn default() -> Self {
        JsonLinesPayloadReader {
            events: Vec::new(),
            current_file: None,
            _marker: PhantomData,
        }
    }
}

impl<T> JsonLinesPayloadReader<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T> PayloadReader for JsonLinesPayloadReader<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Payload = Vec<T>;

    fn no_payload(&self) -> Vec<T> {
        Vec::new()
    }

    fn init_payload(&mut self, filename: &Path) {
        self.events.clear();
        self.current_file = Some(filename.display().to_string());
    }

    fn add_to_payload(&mut self, line: &str) {
        match serde_json::from_str::<T>(line) {
            Ok(event) => self.events.push(event),
            Err(e) => warn!(
                "LOG SHIPPER | Dropping unparseable event from {}: {e}",
                self.current_file.as_deref().unwrap_or("<unknown>")
            ),
        }
    }

    fn finish_payload(&mut self) -> Vec<T> {
        self.current_file = None;
        std::mem::take(&mut self.events)
    }
}
