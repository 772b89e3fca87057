// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Discovery, ordering and retirement of rolling buffer files.
//!
//! Buffer files for one logical stream share a base name and are named
//! `<base>-<dateToken>[_<sequence>].<ext>`. The width of the date token depends on
//! the rolling interval the writer uses. Files sort oldest first by date token and
//! then by sequence number.

use crate::errors::{Result, ShipperError};
use derive_more::Display;
use regex::Regex;
use std::cmp::Reverse;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::SystemTime;
use tracing::{debug, warn};
use uuid::Uuid;

const BOOKMARK_SUFFIX: &str = ".bookmark";
const INVALID_PAYLOAD_PREFIX: &str = "invalid";

/// How often the upstream writer rolls over to a new buffer file.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Default)]
pub enum RollingInterval {
    #[display("infinite")]
    Infinite,
    #[display("year")]
    Year,
    #[display("month")]
    Month,
    #[default]
    #[display("day")]
    Day,
    #[display("hour")]
    Hour,
    #[display("minute")]
    Minute,
}

impl RollingInterval {
    /// Regex fragment matching the date token written for this interval.
    pub fn date_token_regex(self) -> &'static str {
        match self {
            RollingInterval::Infinite => "",
            RollingInterval::Year => "[0-9]{4}",
            RollingInterval::Month => "[0-9]{6}",
            RollingInterval::Day => "[0-9]{8}",
            RollingInterval::Hour => "[0-9]{10}",
            RollingInterval::Minute => "[0-9]{12}",
        }
    }
}

impl FromStr for RollingInterval {
    type Err = ShipperError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "infinite" => Ok(RollingInterval::Infinite),
            "year" => Ok(RollingInterval::Year),
            "month" => Ok(RollingInterval::Month),
            "day" => Ok(RollingInterval::Day),
            "hour" => Ok(RollingInterval::Hour),
            "minute" => Ok(RollingInterval::Minute),
            other => Err(ShipperError::InvalidConfig(format!(
                "Unknown rolling interval '{other}'. Must be one of: infinite, year, month, day, hour, minute"
            ))),
        }
    }
}

/// The set of buffer files belonging to one stream, plus its quarantine files.
#[derive(Debug, Clone)]
pub struct FileSet {
    directory: PathBuf,
    bookmark_path: PathBuf,
    buffer_file_pattern: Regex,
    invalid_payload_pattern: Regex,
}

impl FileSet {
    pub fn new(
        buffer_base_name: impl Into<PathBuf>,
        rolling_interval: RollingInterval,
    ) -> Result<Self> {
        let base: PathBuf = buffer_base_name.into();
        let prefix = base
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| {
                ShipperError::InvalidConfig(format!(
                    "Buffer base name '{}' must end in a non-empty UTF-8 file name",
                    base.display()
                ))
            })?;

        let directory = match base.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut bookmark_path = OsString::from(base.as_os_str());
        bookmark_path.push(BOOKMARK_SUFFIX);

        let buffer_file_pattern = Regex::new(&format!(
            r"^{}-(?P<date>{})(?P<sequence>_[0-9]{{3,}})?\.[A-Za-z0-9]+$",
            regex::escape(prefix),
            rolling_interval.date_token_regex()
        ))
        .map_err(|e| ShipperError::InvalidConfig(format!("Invalid buffer file pattern: {e}")))?;

        let invalid_payload_pattern = Regex::new(&format!(
            r"^{INVALID_PAYLOAD_PREFIX}-[0-9]+-[0-9a-f]+\.json$"
        ))
        .map_err(|e| ShipperError::InvalidConfig(format!("Invalid quarantine pattern: {e}")))?;

        Ok(FileSet {
            directory,
            bookmark_path: PathBuf::from(bookmark_path),
            buffer_file_pattern,
            invalid_payload_pattern,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn bookmark_path(&self) -> &Path {
        &self.bookmark_path
    }

    /// Buffer files currently on disk, oldest first.
    pub fn get_buffer_files(&self) -> io::Result<Vec<PathBuf>> {
        let mut matches: Vec<(String, u64, PathBuf)> = Vec::new();
        for entry in read_dir_or_empty(&self.directory)? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(captures) = self.buffer_file_pattern.captures(name) else {
                continue;
            };
            let date = captures
                .name("date")
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            let sequence = captures
                .name("sequence")
                .and_then(|m| m.as_str().trim_start_matches('_').parse::<u64>().ok())
                .unwrap_or(0);
            matches.push((date, sequence, entry.path()));
        }

        matches.sort_by(|a, b| (&a.0, a.1).cmp(&(&b.0, b.1)));
        Ok(matches.into_iter().map(|(_, _, path)| path).collect())
    }

    /// Deletes the oldest buffer files once the newest ones add up to more than
    /// `max_cumulative_bytes`. The newest `always_retain_count` files are kept
    /// regardless of size.
    ///
    /// Failures are logged and skipped.
    pub fn clean_up_buffer_files(&self, max_cumulative_bytes: u64, always_retain_count: usize) {
        match self.get_buffer_files() {
            Ok(files) => delete_beyond_retention(
                files.into_iter().rev(),
                max_cumulative_bytes,
                always_retain_count,
            ),
            Err(e) => warn!("LOG SHIPPER | Unable to enumerate buffer files for cleanup: {e}"),
        }
    }

    /// A fresh, unique path for quarantining a payload the remote rejected.
    pub fn make_invalid_payload_filename(&self, status_code: u16) -> PathBuf {
        self.directory.join(format!(
            "{INVALID_PAYLOAD_PREFIX}-{status_code}-{}.json",
            Uuid::new_v4().simple()
        ))
    }

    /// Applies the cumulative size retention to quarantine files, newest first.
    pub fn clean_up_invalid_payload_files(&self, max_bytes_to_retain: u64) {
        let entries = match read_dir_or_empty(&self.directory) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("LOG SHIPPER | Unable to enumerate invalid payload files for cleanup: {e}");
                return;
            }
        };

        let mut candidates: Vec<(SystemTime, PathBuf)> = entries
            .into_iter()
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| self.invalid_payload_pattern.is_match(name))
            })
            .map(|entry| {
                let modified = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                (modified, entry.path())
            })
            .collect();
        candidates.sort_by_key(|(modified, path)| (Reverse(*modified), Reverse(path.clone())));

        delete_beyond_retention(
            candidates.into_iter().map(|(_, path)| path),
            max_bytes_to_retain,
            0,
        );
    }
}

fn read_dir_or_empty(directory: &Path) -> io::Result<Vec<fs::DirEntry>> {
    match fs::read_dir(directory) {
        Ok(entries) => entries.collect(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

fn delete_beyond_retention(
    newest_first: impl Iterator<Item = PathBuf>,
    max_cumulative_bytes: u64,
    always_retain_count: usize,
) {
    let mut cumulative: u64 = 0;
    for (index, path) in newest_first.enumerate() {
        let length = match fs::metadata(&path) {
            Ok(metadata) => metadata.len(),
            // Already gone.
            Err(_) => continue,
        };
        cumulative = cumulative.saturating_add(length);

        if index < always_retain_count || cumulative <= max_cumulative_bytes {
            continue;
        }

        debug!(
            "LOG SHIPPER | Deleting {} to keep retained files under {max_cumulative_bytes} bytes",
            path.display()
        );
        if let Err(e) = fs::remove_file(&path) {
            warn!("LOG SHIPPER | Failed to delete {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tracing_test::traced_test;

    fn touch(dir: &TempDir, name: &str, size: usize) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, vec![b'x'; size]).unwrap();
        path
    }

    fn names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_derives_bookmark_path() {
        let dir = TempDir::new().unwrap();
        let file_set = FileSet::new(dir.path().join("buffer"), RollingInterval::Day).unwrap();
        assert_eq!(file_set.bookmark_path(), dir.path().join("buffer.bookmark"));
        assert_eq!(file_set.directory(), dir.path());
    }

    #[test]
    fn test_relative_base_uses_current_directory() {
        let file_set = FileSet::new("buffer", RollingInterval::Day).unwrap();
        assert_eq!(file_set.directory(), Path::new("."));
        assert_eq!(file_set.bookmark_path(), Path::new("buffer.bookmark"));
    }

    #[test]
    fn test_rejects_empty_base_name() {
        assert!(matches!(
            FileSet::new("", RollingInterval::Day),
            Err(ShipperError::InvalidConfig(_))
        ));
        assert!(matches!(
            FileSet::new("/", RollingInterval::Day),
            Err(ShipperError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_missing_directory_has_no_files() {
        let dir = TempDir::new().unwrap();
        let file_set =
            FileSet::new(dir.path().join("nope").join("buffer"), RollingInterval::Day).unwrap();
        assert!(file_set.get_buffer_files().unwrap().is_empty());
    }

    #[test]
    fn test_orders_by_date_then_sequence() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "buffer-20240102.json", 1);
        touch(&dir, "buffer-20240101_010.json", 1);
        touch(&dir, "buffer-20240101.json", 1);
        touch(&dir, "buffer-20240101_002.json", 1);
        touch(&dir, "buffer-20231231_1000.json", 1);

        let file_set = FileSet::new(dir.path().join("buffer"), RollingInterval::Day).unwrap();
        assert_eq!(
            names(&file_set.get_buffer_files().unwrap()),
            vec![
                "buffer-20231231_1000.json",
                "buffer-20240101.json",
                "buffer-20240101_002.json",
                "buffer-20240101_010.json",
                "buffer-20240102.json",
            ]
        );
    }

    #[test]
    fn test_matches_only_configured_interval_shape() {
        let dir = TempDir::new().unwrap();
        let shapes = [
            (RollingInterval::Infinite, "buffer-.json"),
            (RollingInterval::Year, "buffer-2024.json"),
            (RollingInterval::Month, "buffer-202401.json"),
            (RollingInterval::Day, "buffer-20240101.json"),
            (RollingInterval::Hour, "buffer-2024010112.json"),
            (RollingInterval::Minute, "buffer-202401011230.json"),
        ];
        for (_, name) in shapes {
            touch(&dir, name, 1);
        }
        // Noise that never matches.
        touch(&dir, "buffer.bookmark", 1);
        touch(&dir, "other-20240101.json", 1);
        touch(&dir, "buffer-20240101_01.json", 1);
        touch(&dir, "invalid-400-abcdef.json", 1);

        for (interval, expected) in shapes {
            let file_set = FileSet::new(dir.path().join("buffer"), interval).unwrap();
            assert_eq!(
                names(&file_set.get_buffer_files().unwrap()),
                vec![expected],
                "interval {interval}"
            );
        }
    }

    #[test]
    fn test_base_name_is_escaped() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "app.log-20240101.json", 1);
        touch(&dir, "appXlog-20240101.json", 1);

        let file_set = FileSet::new(dir.path().join("app.log"), RollingInterval::Day).unwrap();
        assert_eq!(
            names(&file_set.get_buffer_files().unwrap()),
            vec!["app.log-20240101.json"]
        );
    }

    #[test]
    fn test_cleanup_retains_newest_within_limit() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "buffer-20240101.json", 100);
        touch(&dir, "buffer-20240102.json", 100);
        touch(&dir, "buffer-20240103.json", 100);
        touch(&dir, "buffer-20240104.json", 100);

        let file_set = FileSet::new(dir.path().join("buffer"), RollingInterval::Day).unwrap();
        file_set.clean_up_buffer_files(250, 0);

        assert_eq!(
            names(&file_set.get_buffer_files().unwrap()),
            vec!["buffer-20240103.json", "buffer-20240104.json"]
        );
    }

    #[test]
    fn test_cleanup_always_retains_count() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "buffer-20240101.json", 100);
        touch(&dir, "buffer-20240102.json", 100);
        touch(&dir, "buffer-20240103.json", 100);

        let file_set = FileSet::new(dir.path().join("buffer"), RollingInterval::Day).unwrap();
        file_set.clean_up_buffer_files(0, 2);

        assert_eq!(
            names(&file_set.get_buffer_files().unwrap()),
            vec!["buffer-20240102.json", "buffer-20240103.json"]
        );
    }

    #[test]
    #[traced_test]
    fn test_cleanup_logs_deletions() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "buffer-20240101.json", 10);
        touch(&dir, "buffer-20240102.json", 10);

        let file_set = FileSet::new(dir.path().join("buffer"), RollingInterval::Day).unwrap();
        file_set.clean_up_buffer_files(10, 0);

        assert!(logs_contain("Deleting"));
        assert!(logs_contain("buffer-20240101.json"));
    }

    #[test]
    fn test_invalid_payload_filenames_are_unique() {
        let dir = TempDir::new().unwrap();
        let file_set = FileSet::new(dir.path().join("buffer"), RollingInterval::Day).unwrap();

        let first = file_set.make_invalid_payload_filename(400);
        let second = file_set.make_invalid_payload_filename(400);
        assert_ne!(first, second);
        assert_eq!(first.parent().unwrap(), dir.path());

        let name = first.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("invalid-400-"));
        assert!(name.ends_with(".json"));
        assert!(file_set.invalid_payload_pattern.is_match(name));
    }

    #[test]
    fn test_invalid_payload_cleanup_keeps_newest() {
        let dir = TempDir::new().unwrap();
        let file_set = FileSet::new(dir.path().join("buffer"), RollingInterval::Day).unwrap();

        let old = file_set.make_invalid_payload_filename(400);
        fs::write(&old, vec![b'x'; 100]).unwrap();
        let old_time = SystemTime::now() - std::time::Duration::from_secs(3600);
        fs::File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(old_time)
            .unwrap();

        let new = file_set.make_invalid_payload_filename(413);
        fs::write(&new, vec![b'x'; 100]).unwrap();
        let buffer = touch(&dir, "buffer-20240101.json", 500);

        file_set.clean_up_invalid_payload_files(150);

        assert!(!old.exists());
        assert!(new.exists());
        // Buffer files are never touched by quarantine retention.
        assert!(buffer.exists());
    }

    #[test]
    fn test_rolling_interval_parses() {
        assert_eq!("Hour".parse::<RollingInterval>().unwrap(), RollingInterval::Hour);
        assert_eq!(
            " infinite ".parse::<RollingInterval>().unwrap(),
            RollingInterval::Infinite
        );
        assert!("weekly".parse::<RollingInterval>().is_err());
        assert_eq!(RollingInterval::default().to_string(), "day");
    }
}
