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

//! Process-shared request counters.
//!
//! The acceptor and every forked worker need to add to the same counters.
//! `fork()` copies the parent's address space, so a region mapped
//! `MAP_SHARED | MAP_ANONYMOUS` *before* forking is backed by the same
//! physical pages in every descendant; atomic operations on it are visible
//! across all of them without any further IPC. The region is created by the
//! acceptor and must outlive every worker, so it is never unmapped until the
//! acceptor itself exits.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

#[repr(C)]
struct RawCounters {
    total_requests: AtomicU64,
    bytes_transferred: AtomicU64,
    status_200: AtomicU64,
    status_404: AtomicU64,
    status_500: AtomicU64,
    active_connections: AtomicU64,
    total_response_time_ms: AtomicU64,
}

/// A handle to the process-shared counters block.
///
/// Cloning via [`SharedStats::clone_handle`] before `fork()` is how a worker
/// obtains its own handle onto the same mapping; the pointer stays valid
/// because the mapping itself, not the handle, owns the memory, and the
/// mapping is never unmapped by a worker.
pub struct SharedStats {
    ptr: *mut RawCounters,
    owns_mapping: bool,
}

unsafe impl Send for SharedStats {}
unsafe impl Sync for SharedStats {}

impl SharedStats {
    /// Maps a fresh, zeroed counters block. Must be called before `fork()`
    /// so every worker inherits the same mapping.
    pub fn create() -> io::Result<Self> {
        let len = std::mem::size_of::<RawCounters>();
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let ptr = addr as *mut RawCounters;
        unsafe {
            ptr.write(RawCounters {
                total_requests: AtomicU64::new(0),
                bytes_transferred: AtomicU64::new(0),
                status_200: AtomicU64::new(0),
                status_404: AtomicU64::new(0),
                status_500: AtomicU64::new(0),
                active_connections: AtomicU64::new(0),
                total_response_time_ms: AtomicU64::new(0),
            });
        }
        Ok(SharedStats {
            ptr,
            owns_mapping: true,
        })
    }

    /// Returns another handle to the same mapping, for handing to a worker
    /// before it forks. The returned handle does not unmap on drop — only
    /// the acceptor's original handle does.
    pub fn clone_handle(&self) -> SharedStats {
        SharedStats {
            ptr: self.ptr,
            owns_mapping: false,
        }
    }

    fn counters(&self) -> &RawCounters {
        unsafe { &*self.ptr }
    }

    /// Records one completed request: increments the total, the matching
    /// status bucket, the byte counter, and the elapsed-time accumulator
    /// the dashboard averages over.
    pub fn record_request(&self, status: u16, bytes: u64, elapsed_ms: u64) {
        let c = self.counters();
        c.total_requests.fetch_add(1, Ordering::Relaxed);
        c.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
        c.total_response_time_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
        match status {
            200 => {
                c.status_200.fetch_add(1, Ordering::Relaxed);
            }
            404 => {
                c.status_404.fetch_add(1, Ordering::Relaxed);
            }
            500 => {
                c.status_500.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    /// Marks the start of a handled connection.
    pub fn connection_opened(&self) {
        self.counters()
            .active_connections
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Marks the end of a handled connection.
    pub fn connection_closed(&self) {
        self.counters()
            .active_connections
            .fetch_sub(1, Ordering::Relaxed);
    }

    /// Takes an instantaneous, non-atomic-as-a-whole snapshot of every
    /// counter. Individual fields are each read atomically; the set of
    /// fields together is not a consistent point-in-time transaction, which
    /// is acceptable for a dashboard display.
    pub fn snapshot(&self) -> Snapshot {
        let c = self.counters();
        let total_requests = c.total_requests.load(Ordering::Relaxed);
        let total_response_time_ms = c.total_response_time_ms.load(Ordering::Relaxed);
        let avg_response_time_ms = if total_requests == 0 {
            0
        } else {
            total_response_time_ms / total_requests
        };
        Snapshot {
            total_requests,
            bytes_transferred: c.bytes_transferred.load(Ordering::Relaxed),
            status_200: c.status_200.load(Ordering::Relaxed),
            status_404: c.status_404.load(Ordering::Relaxed),
            status_500: c.status_500.load(Ordering::Relaxed),
            active_connections: c.active_connections.load(Ordering::Relaxed),
            avg_response_time_ms,
        }
    }
}

impl Drop for SharedStats {
    fn drop(&mut self) {
        if self.owns_mapping {
            unsafe {
                libc::munmap(self.ptr as *mut libc::c_void, std::mem::size_of::<RawCounters>());
            }
        }
    }
}

impl fmt::Debug for SharedStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedStats").field("snapshot", &self.snapshot()).finish()
    }
}

/// A point-in-time read of [`SharedStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    /// Connections currently being serviced.
    pub active_connections: u64,
    /// Total requests completed across every worker.
    pub total_requests: u64,
    /// Total response bytes sent across every worker.
    pub bytes_transferred: u64,
    /// Mean wall-clock time to serve a request, in milliseconds.
    pub avg_response_time_ms: u64,
    /// Count of 200 responses.
    pub status_200: u64,
    /// Count of 404 responses.
    pub status_404: u64,
    /// Count of 500 responses.
    pub status_500: u64,
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Active Connections: {}\nTotal Requests: {}\nBytes Transferred: {}\n\
             Avg Response Time ms: {}\nStatus 200: {}\nStatus 404: {}\nStatus 500: {}",
            self.active_connections,
            self.total_requests,
            self.bytes_transferred,
            self.avg_response_time_ms,
            self.status_200,
            self.status_404,
            self.status_500,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freshly_created_stats_are_zeroed() {
        let stats = SharedStats::create().unwrap();
        let snap = stats.snapshot();
        assert_eq!(0, snap.total_requests);
        assert_eq!(0, snap.active_connections);
    }

    #[test]
    fn record_request_updates_total_and_bucket() {
        let stats = SharedStats::create().unwrap();
        stats.record_request(200, 128, 10);
        stats.record_request(404, 64, 20);
        let snap = stats.snapshot();
        assert_eq!(2, snap.total_requests);
        assert_eq!(192, snap.bytes_transferred);
        assert_eq!(1, snap.status_200);
        assert_eq!(1, snap.status_404);
        assert_eq!(0, snap.status_500);
        assert_eq!(15, snap.avg_response_time_ms);
    }

    #[test]
    fn connection_open_and_close_are_tracked() {
        let stats = SharedStats::create().unwrap();
        stats.connection_opened();
        stats.connection_opened();
        assert_eq!(2, stats.snapshot().active_connections);
        stats.connection_closed();
        assert_eq!(1, stats.snapshot().active_connections);
    }

    #[test]
    fn clone_handle_shares_the_same_mapping() {
        let stats = SharedStats::create().unwrap();
        let handle = stats.clone_handle();
        handle.record_request(200, 10, 1);
        assert_eq!(1, stats.snapshot().total_requests);
    }

    #[test]
    fn snapshot_display_includes_every_dashboard_field() {
        let stats = SharedStats::create().unwrap();
        stats.record_request(200, 5, 3);
        let text = format!("{}", stats.snapshot());
        assert!(text.starts_with("Active Connections: 0\nTotal Requests: 1"));
        assert!(text.contains("Avg Response Time ms: 3"));
        assert!(text.contains("Status 200: 1"));
    }
}
