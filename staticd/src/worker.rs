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

//! The worker process: one per `fork()`'d child, each running a receive
//! loop that pulls accepted-connection descriptors off the acceptor's
//! channel and fans them out to a fixed pool of handler threads through a
//! [`LocalQueue`].

use std::io::Read;
use std::net::TcpStream;
use std::os::unix::io::{FromRawFd, IntoRawFd};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use staticd_parser::{HttpMethod, RequestLine};

use crate::cache::Cache;
use crate::config::Config;
use crate::http;
use crate::ipc::{self, RecvOutcome};
use crate::logger::AccessLogger;
use crate::queue::{DequeueOutcome, EnqueueError, LocalQueue};
use crate::stats::SharedStats;

/// A single `recv` reads at most this many bytes of the request line; a
/// request that doesn't carry `\r\n` within that first read is malformed.
const RECV_BYTES: usize = 2048;
/// Below this size, a served file is eligible for the cache; at or above
/// it, it is read and sent directly.
const CACHE_ELIGIBLE_BYTES: u64 = 1024 * 1024;
const LOGGER_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Everything a worker needs, already constructed by the acceptor before
/// `fork()` (the document root, queue sizing, and cache budget) or handed to
/// it immediately after (its half of the descriptor-passing channel).
pub struct Worker {
    id: usize,
    channel: UnixStream,
    config: Arc<Config>,
    stats: SharedStats,
}

impl Worker {
    /// Builds a worker around its channel endpoint. Call [`Worker::run`]
    /// after `fork()` returns in the child.
    pub fn new(id: usize, channel: UnixStream, config: Arc<Config>, stats: SharedStats) -> Self {
        Worker {
            id,
            channel,
            config,
            stats,
        }
    }

    /// Runs the worker until its channel is closed by the acceptor — the
    /// sole shutdown signal a worker ever observes — and every in-flight
    /// request has drained. Returns once it is safe for the process to
    /// exit.
    pub fn run(self) {
        // A worker's shutdown is channel-EOF-driven, not signal-driven; it
        // only needs to survive a terminal's Ctrl-C reaching the whole
        // foreground process group.
        crate::shutdown::ignore_sigint();

        let cache = Arc::new(Cache::new(self.config.cache_bytes()));
        let queue = Arc::new(LocalQueue::new(self.config.max_queue_size));
        let logger = Arc::new(Mutex::new(
            AccessLogger::open(&self.config.log_file).unwrap_or_else(|e| {
                error!("worker {}: failed to open access log, continuing without rotation safety: {e}", self.id);
                AccessLogger::open(&self.config.log_file).expect("log file must be openable")
            }),
        ));

        let mut handles = Vec::with_capacity(self.config.threads_per_worker);
        for handler_id in 0..self.config.threads_per_worker {
            let queue = queue.clone();
            let cache = cache.clone();
            let config = self.config.clone();
            let logger = logger.clone();
            let stats = self.stats.clone_handle();
            let worker_id = self.id;
            handles.push(thread::spawn(move || {
                handler_loop(worker_id, handler_id, &queue, &cache, &config, &logger, &stats);
            }));
        }

        let flush_logger = logger.clone();
        let flush_queue = queue.clone();
        let flush_handle = thread::spawn(move || loop {
            thread::sleep(LOGGER_FLUSH_INTERVAL);
            if let Ok(mut l) = flush_logger.lock() {
                let _ = l.flush();
            }
            if flush_queue.is_terminated() {
                return;
            }
        });

        info!("worker {} ready with {} handler thread(s)", self.id, self.config.threads_per_worker);
        loop {
            match ipc::recv(&self.channel) {
                Ok(RecvOutcome::Descriptor(fd)) => {
                    let raw = fd.into_raw_fd();
                    if let Err(EnqueueError::Full) = queue.enqueue(raw) {
                        warn!("worker {}: local queue full, rejecting connection", self.id);
                        reject_with_503(raw);
                    }
                }
                Ok(RecvOutcome::EndOfStream) => {
                    debug!("worker {}: channel closed, draining", self.id);
                    break;
                }
                Err(e) => {
                    error!("worker {}: transport error receiving descriptor: {e}", self.id);
                    break;
                }
            }
        }

        queue.terminate();
        for handle in handles {
            let _ = handle.join();
        }
        if let Ok(mut l) = logger.lock() {
            let _ = l.flush();
        }
        let _ = flush_handle.join();
        cache.destroy();
        info!("worker {} exiting", self.id);
    }
}

/// A descriptor that arrived after the local queue was already full never
/// becomes an active connection; this is a direct synthesis, not a handled
/// request.
fn reject_with_503(raw_fd: std::os::unix::io::RawFd) {
    let mut stream = unsafe { TcpStream::from_raw_fd(raw_fd) };
    let _ = http::write_error(&mut stream, 503);
}

fn handler_loop(
    worker_id: usize,
    handler_id: usize,
    queue: &LocalQueue,
    cache: &Cache,
    config: &Config,
    logger: &Mutex<AccessLogger>,
    stats: &SharedStats,
) {
    loop {
        match queue.dequeue() {
            DequeueOutcome::Fd(raw_fd) => {
                stats.connection_opened();
                let mut stream = unsafe { TcpStream::from_raw_fd(raw_fd) };
                let _ = stream.set_read_timeout(Some(Duration::from_secs(config.timeout_seconds)));
                let _ = stream.set_write_timeout(Some(Duration::from_secs(config.timeout_seconds)));
                let client_ip = stream
                    .peer_addr()
                    .map(|a| a.ip().to_string())
                    .unwrap_or_else(|_| "-".to_string());
                let started = Instant::now();
                let outcome = serve_one(&mut stream, cache, config);
                stats.connection_closed();
                match outcome {
                    Some(entry) => {
                        let elapsed_ms = started.elapsed().as_millis() as u64;
                        record(logger, stats, &client_ip, entry, elapsed_ms);
                    }
                    None => {
                        // Zero-byte or erroring recv before a complete
                        // request line: close silently, no log line, no
                        // status counter.
                    }
                }
            }
            DequeueOutcome::Shutdown => {
                debug!("worker {} handler {} exiting", worker_id, handler_id);
                return;
            }
        }
    }
}

fn record(logger: &Mutex<AccessLogger>, stats: &SharedStats, client_ip: &str, entry: RequestOutcome, elapsed_ms: u64) {
    let line = http::common_log_format(client_ip, &entry.method, &entry.path, entry.status, entry.bytes);
    if let Ok(mut l) = logger.lock() {
        let _ = l.log(&line);
    }
    stats.record_request(entry.status, entry.bytes as u64, elapsed_ms);
}

struct RequestOutcome {
    method: String,
    path: String,
    status: u16,
    bytes: usize,
}

/// Serves one connection end to end. Returns `None` for the silent-close
/// case (a zero-byte or erroring initial `recv`, before any request line
/// existed to log); otherwise returns the accounting the caller logs and
/// counts. The connection is always closed afterward regardless of outcome.
fn serve_one(stream: &mut TcpStream, cache: &Cache, config: &Config) -> Option<RequestOutcome> {
    let outcome = read_and_respond(stream, cache, config);
    let _ = stream.shutdown(std::net::Shutdown::Both);
    outcome
}

fn read_and_respond(stream: &mut TcpStream, cache: &Cache, config: &Config) -> Option<RequestOutcome> {
    let mut buf = [0u8; RECV_BYTES];
    let n = match stream.read(&mut buf) {
        Ok(0) => return None,
        Ok(n) => n,
        Err(_) => return None,
    };

    let line = match RequestLine::parse(&buf[..n]) {
        Ok(line) => line,
        Err(_) => {
            let bytes = http::write_error(stream, 400).unwrap_or(0);
            return Some(RequestOutcome { method: "-".into(), path: "-".into(), status: 400, bytes });
        }
    };

    let method = line.method.to_string();
    let path = line.target.to_string();

    if !matches!(line.method, HttpMethod::Get | HttpMethod::Head) {
        let bytes = http::write_error(stream, 405).unwrap_or(0);
        return Some(RequestOutcome { method, path, status: 405, bytes });
    }

    if path.contains("..") {
        let bytes = http::write_error(stream, 403).unwrap_or(0);
        return Some(RequestOutcome { method, path, status: 403, bytes });
    }

    let built = build_path(&config.document_root, &path);

    let (resolved, body) = match load(cache, &built) {
        Ok(loaded) => loaded,
        Err(LoadError::NotFound) => {
            let bytes = http::write_error(stream, 404).unwrap_or(0);
            return Some(RequestOutcome { method, path, status: 404, bytes });
        }
        Err(LoadError::Io) => {
            let bytes = http::write_error(stream, 500).unwrap_or(0);
            return Some(RequestOutcome { method, path, status: 500, bytes });
        }
    };

    let content_type = crate::mime::lookup(&resolved.to_string_lossy());
    let send_body = matches!(line.method, HttpMethod::Get);
    let result = http::write_response(
        stream,
        200,
        content_type,
        body.len(),
        if send_body { Some(&body) } else { None },
    );
    match result {
        Ok(()) => Some(RequestOutcome { method, path, status: 200, bytes: body.len() }),
        Err(_) => Some(RequestOutcome { method, path, status: 500, bytes: 0 }),
    }
}

enum LoadError {
    NotFound,
    Io,
}

/// Loads the body at `path`, consulting the cache only for files under
/// [`CACHE_ELIGIBLE_BYTES`]. A directory is served as its `index.html`.
/// Returns the resolved filesystem path alongside the body so the caller can
/// derive the `Content-Type` from what was actually read, not the request
/// path that led to it (the two differ whenever a directory is served).
fn load(cache: &Cache, path: &Path) -> Result<(PathBuf, Vec<u8>), LoadError> {
    let meta = std::fs::metadata(path).map_err(classify)?;
    let is_dir = meta.is_dir();
    let target = if is_dir { path.join("index.html") } else { path.to_path_buf() };
    let size = if is_dir {
        std::fs::metadata(&target).map_err(classify)?.len()
    } else {
        meta.len()
    };

    let bytes = if size < CACHE_ELIGIBLE_BYTES {
        let key = target.to_string_lossy().into_owned();
        if let Some(bytes) = cache.get(&key) {
            bytes
        } else {
            let bytes = std::fs::read(&target).map_err(classify)?;
            let _ = cache.put(&key, &bytes);
            bytes
        }
    } else {
        std::fs::read(&target).map_err(classify)?
    };
    Ok((target, bytes))
}

fn classify(e: std::io::Error) -> LoadError {
    if e.kind() == std::io::ErrorKind::NotFound {
        LoadError::NotFound
    } else {
        LoadError::Io
    }
}

/// Builds a filesystem path by plain string concatenation of the document
/// root and the request path, exactly as a minimal static file server would
/// — no normalization beyond what the caller already rejected (`..`).
fn build_path(document_root: &str, request_path: &str) -> PathBuf {
    let mut joined = String::with_capacity(document_root.len() + request_path.len());
    joined.push_str(document_root);
    joined.push_str(request_path);
    PathBuf::from(joined)
}
