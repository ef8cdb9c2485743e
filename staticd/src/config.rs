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

//! Loads the `key=value` server configuration file.

use std::fmt::Display;
use std::fs;
use std::path::Path;

/// Server configuration, immutable once loaded, shared (by value, since it's
/// `Copy`-free but cheap to clone) across the acceptor and every worker.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP port the acceptor listens on.
    pub port: u16,
    /// Number of worker processes forked by the acceptor.
    pub num_workers: usize,
    /// Handler threads spawned inside each worker process.
    pub threads_per_worker: usize,
    /// Usable capacity of each worker's local queue (one slot is reserved to
    /// distinguish empty from full).
    pub max_queue_size: usize,
    /// Root directory files are served out of.
    pub document_root: String,
    /// Path the access log is appended to.
    pub log_file: String,
    /// Byte budget of each worker's file cache, in MiB.
    pub cache_size_mb: usize,
    /// Socket recv/send timeout, and statistics dashboard interval, in seconds.
    pub timeout_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 8080,
            num_workers: 4,
            threads_per_worker: 4,
            max_queue_size: 64,
            document_root: "./www".to_string(),
            log_file: "access.log".to_string(),
            cache_size_mb: 16,
            timeout_seconds: 30,
        }
    }
}

/// Failures loading or parsing the configuration file.
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be opened.
    NotFound(std::io::Error),
}

impl ConfigError {
    fn description_str(&self) -> String {
        match self {
            ConfigError::NotFound(e) => format!("could not open configuration file: {e}"),
        }
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.description_str())
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Loads configuration from `path`. Unknown keys are ignored silently;
    /// malformed lines (no `=`, or a value that doesn't parse as the expected
    /// type) are also ignored, leaving the corresponding field at its
    /// [`Default`] value, to match the original `sscanf`-based loader's
    /// forgiving behavior.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(ConfigError::NotFound)?;
        let mut config = Config::default();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            match key {
                "PORT" => {
                    if let Ok(v) = value.parse() {
                        config.port = v;
                    }
                }
                "NUM_WORKERS" => {
                    if let Ok(v) = value.parse() {
                        config.num_workers = v;
                    }
                }
                "THREADS_PER_WORKER" => {
                    if let Ok(v) = value.parse() {
                        config.threads_per_worker = v;
                    }
                }
                "MAX_QUEUE_SIZE" => {
                    if let Ok(v) = value.parse() {
                        config.max_queue_size = v;
                    }
                }
                "DOCUMENT_ROOT" => config.document_root = value.to_string(),
                "LOG_FILE" => config.log_file = value.to_string(),
                "CACHE_SIZE_MB" => {
                    if let Ok(v) = value.parse() {
                        config.cache_size_mb = v;
                    }
                }
                "TIMEOUT_SECONDS" => {
                    if let Ok(v) = value.parse() {
                        config.timeout_seconds = v;
                    }
                }
                // Unknown keys are ignored silently.
                _ => {}
            }
        }

        Ok(config)
    }

    /// Cache byte budget, converted from the configured MiB value.
    pub fn cache_bytes(&self) -> usize {
        self.cache_size_mb * 1024 * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("staticd-config-test-{}.conf", std::process::id()));
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn parses_recognized_keys() {
        let path = write_temp(
            "# comment\n\nPORT=9090\nNUM_WORKERS=2\nTHREADS_PER_WORKER=3\nMAX_QUEUE_SIZE=16\n\
             DOCUMENT_ROOT=/srv/www\nLOG_FILE=/var/log/staticd.log\nCACHE_SIZE_MB=32\n\
             TIMEOUT_SECONDS=5\n",
        );
        let config = Config::load(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(9090, config.port);
        assert_eq!(2, config.num_workers);
        assert_eq!(3, config.threads_per_worker);
        assert_eq!(16, config.max_queue_size);
        assert_eq!("/srv/www", config.document_root);
        assert_eq!("/var/log/staticd.log", config.log_file);
        assert_eq!(32, config.cache_size_mb);
        assert_eq!(5, config.timeout_seconds);
        assert_eq!(32 * 1024 * 1024, config.cache_bytes());
    }

    #[test]
    fn ignores_unknown_keys_and_malformed_lines() {
        let path = write_temp("PORT=1234\nTOTALLY_UNKNOWN=yes\nnoequalsign\n");
        let config = Config::load(&path).unwrap();
        fs::remove_file(&path).ok();
        assert_eq!(1234, config.port);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Config::load("/nonexistent/path/server.conf").is_err());
    }
}
