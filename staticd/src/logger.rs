// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A buffered Common Log Format access logger with single-generation
//! rotation.
//!
//! Each worker owns one [`AccessLogger`]; writes are batched through a
//! `BufWriter` and only hit disk on a full buffer or an explicit
//! [`AccessLogger::flush`] (a worker runs a background thread that calls
//! `flush` on a timer so log lines aren't stuck in the buffer indefinitely
//! during a quiet period). When the file would grow past the rotation
//! threshold, it is renamed to `<path>.old` — overwriting whatever `.old`
//! generation already existed — and a fresh file is opened in its place.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Rotate once the log file would exceed this size.
pub const DEFAULT_ROTATE_BYTES: u64 = 10 * 1024 * 1024;

/// A buffered writer over a Common Log Format access log file.
pub struct AccessLogger {
    path: PathBuf,
    writer: BufWriter<File>,
    bytes_written: u64,
    rotate_at: u64,
}

impl AccessLogger {
    /// Opens (creating if necessary) the access log at `path`, appending to
    /// any existing content, with the default rotation threshold.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        Self::with_rotate_at(path, DEFAULT_ROTATE_BYTES)
    }

    /// As [`open`](Self::open), with an explicit rotation threshold. Mainly
    /// useful for tests that want rotation to trigger quickly.
    pub fn with_rotate_at(path: impl Into<PathBuf>, rotate_at: u64) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        let bytes_written = file.metadata()?.len();
        Ok(AccessLogger {
            path,
            writer: BufWriter::new(file),
            bytes_written,
            rotate_at,
        })
    }

    /// Appends `line` (which should already end in `\n`), rotating first if
    /// writing it would cross the rotation threshold.
    pub fn log(&mut self, line: &str) -> io::Result<()> {
        if self.bytes_written + line.len() as u64 > self.rotate_at {
            self.rotate()?;
        }
        self.writer.write_all(line.as_bytes())?;
        self.bytes_written += line.len() as u64;
        Ok(())
    }

    /// Flushes any buffered lines to disk without rotating.
    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        let old_path = sibling_old_path(&self.path);
        fs::rename(&self.path, &old_path)?;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.bytes_written = 0;
        Ok(())
    }
}

fn sibling_old_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".old");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_path(name: &str) -> PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("staticd-logger-test-{name}-{n}.log"))
    }

    #[test]
    fn log_then_flush_writes_the_line_to_disk() {
        let path = temp_path("basic");
        let mut logger = AccessLogger::open(&path).unwrap();
        logger.log("line one\n").unwrap();
        logger.flush().unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!("line one\n", contents);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn appends_across_repeated_opens() {
        let path = temp_path("append");
        {
            let mut logger = AccessLogger::open(&path).unwrap();
            logger.log("first\n").unwrap();
            logger.flush().unwrap();
        }
        {
            let mut logger = AccessLogger::open(&path).unwrap();
            logger.log("second\n").unwrap();
            logger.flush().unwrap();
        }
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!("first\nsecond\n", contents);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn rotation_moves_old_content_aside_and_starts_fresh() {
        let path = temp_path("rotate");
        let mut logger = AccessLogger::with_rotate_at(&path, 10).unwrap();
        logger.log("0123456789\n").unwrap();
        logger.flush().unwrap();
        // Next line would cross the 10-byte threshold, triggering rotation.
        logger.log("next\n").unwrap();
        logger.flush().unwrap();

        let old_path = sibling_old_path(&path);
        let old_contents = fs::read_to_string(&old_path).unwrap();
        assert_eq!("0123456789\n", old_contents);

        let fresh_contents = fs::read_to_string(&path).unwrap();
        assert_eq!("next\n", fresh_contents);

        fs::remove_file(&path).unwrap();
        fs::remove_file(&old_path).unwrap();
    }

    #[test]
    fn a_second_rotation_overwrites_the_first_old_generation() {
        let path = temp_path("rotate-twice");
        let old_path = sibling_old_path(&path);
        let mut logger = AccessLogger::with_rotate_at(&path, 5).unwrap();

        logger.log("aaaaaa\n").unwrap();
        logger.flush().unwrap();
        logger.log("bbbbbb\n").unwrap();
        logger.flush().unwrap();
        logger.log("cccccc\n").unwrap();
        logger.flush().unwrap();

        let old_contents = fs::read_to_string(&old_path).unwrap();
        assert_eq!("bbbbbb\n", old_contents);

        fs::remove_file(&path).unwrap();
        fs::remove_file(&old_path).unwrap();
    }
}
