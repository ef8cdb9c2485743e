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

//! The acceptor process: owns the listening socket, `fork()`s the worker
//! pool, and round-robins accepted connections to workers by passing each
//! one's descriptor over a `UnixStream`.
//!
//! The fork loop runs before any other thread is spawned in this process —
//! `fork()` only duplicates the calling thread, so any thread started
//! earlier would simply vanish from the child's point of view, leaving its
//! locks forever unlocked. Once every worker exists, the stats dashboard
//! thread and the accept loop run in the (now single-threaded-at-fork-time)
//! parent without that hazard.

use std::net::TcpListener;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{error, info, warn};

use crate::config::Config;
use crate::ipc;
use crate::shutdown;
use crate::stats::SharedStats;
use crate::worker::Worker;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);
const STATS_DASHBOARD_INTERVAL: Duration = Duration::from_secs(10);
/// Pending-connection backlog passed to `listen(2)`.
const LISTEN_BACKLOG: libc::c_int = 128;

struct WorkerHandle {
    pid: libc::pid_t,
    channel: UnixStream,
}

/// Runs the acceptor until a shutdown signal is observed, at which point it
/// drains the worker pool and returns.
pub fn run(config: Config) -> std::io::Result<()> {
    shutdown::install_handlers();

    let listener = bind_listener(config.port, LISTEN_BACKLOG)?;
    listener.set_nonblocking(true)?;
    info!("listening on 0.0.0.0:{}", config.port);

    let stats = SharedStats::create()?;
    let config = Arc::new(config);

    let mut workers = fork_workers(&listener, &config, &stats)?;

    let dashboard_stats = stats.clone_handle();
    let dashboard = thread::spawn(move || loop {
        thread::sleep(STATS_DASHBOARD_INTERVAL);
        // Never hold any lock across this sleep; the snapshot below only
        // touches the shared atomics, each read independently.
        info!("dashboard: {}", dashboard_stats.snapshot());
        if shutdown::requested() {
            return;
        }
    });

    let mut next_worker = 0usize;
    loop {
        match listener.accept() {
            Ok((stream, _addr)) => {
                let fd = stream.into_raw_fd();
                dispatch(&mut workers, &mut next_worker, fd);
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if shutdown::requested() {
                    break;
                }
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                error!("accept failed: {e}");
            }
        }
    }

    info!("shutdown requested, draining {} worker(s)", workers.len());
    for handle in workers {
        drop(handle.channel);
        reap(handle.pid);
    }
    let _ = dashboard.join();
    info!("acceptor exiting");
    Ok(())
}

/// Builds the listening socket by hand rather than through
/// `TcpListener::bind`, which offers no way to control the `listen(2)`
/// backlog: `SO_REUSEADDR` lets the acceptor restart promptly without
/// waiting out `TIME_WAIT`, and the explicit backlog matches the pending-
/// connection queue depth the original server is sized around.
fn bind_listener(port: u16, backlog: libc::c_int) -> std::io::Result<TcpListener> {
    unsafe {
        let fd = libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0);
        if fd < 0 {
            return Err(std::io::Error::last_os_error());
        }

        let reuse: libc::c_int = 1;
        if libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &reuse as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        ) < 0
        {
            let e = std::io::Error::last_os_error();
            libc::close(fd);
            return Err(e);
        }

        let mut addr: libc::sockaddr_in = std::mem::zeroed();
        addr.sin_family = libc::AF_INET as libc::sa_family_t;
        addr.sin_port = port.to_be();
        addr.sin_addr.s_addr = libc::INADDR_ANY.to_be();

        if libc::bind(
            fd,
            &addr as *const _ as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        ) < 0
        {
            let e = std::io::Error::last_os_error();
            libc::close(fd);
            return Err(e);
        }

        if libc::listen(fd, backlog) < 0 {
            let e = std::io::Error::last_os_error();
            libc::close(fd);
            return Err(e);
        }

        Ok(TcpListener::from_raw_fd(fd))
    }
}

fn dispatch(workers: &mut [WorkerHandle], next_worker: &mut usize, fd: std::os::unix::io::RawFd) {
    if workers.is_empty() {
        unsafe { libc::close(fd) };
        return;
    }
    let idx = *next_worker % workers.len();
    *next_worker = next_worker.wrapping_add(1);
    if let Err(e) = ipc::send(&workers[idx].channel, fd) {
        warn!("failed handing connection to worker {idx}: {e}");
    }
    unsafe { libc::close(fd) };
}

fn fork_workers(
    listener: &TcpListener,
    config: &Arc<Config>,
    stats: &SharedStats,
) -> std::io::Result<Vec<WorkerHandle>> {
    let mut workers = Vec::with_capacity(config.num_workers);
    for id in 0..config.num_workers {
        let (parent_half, child_half) = UnixStream::pair()?;
        match unsafe { libc::fork() } {
            -1 => return Err(std::io::Error::last_os_error()),
            0 => {
                drop(parent_half);
                // fork() duplicates the whole descriptor table, so this
                // child also holds the listen socket and the acceptor-side
                // channel end of every sibling forked before it. Left open,
                // the listener's port never fully frees up when the real
                // acceptor closes its own copy, and an earlier sibling's
                // channel never sees EOF on shutdown because this process
                // still references its peer open-file-description — its
                // receive loop would then block in `ipc::recv` forever and
                // the acceptor's `reap` for it would never return.
                unsafe { libc::close(listener.as_raw_fd()) };
                for sibling in &workers {
                    unsafe { libc::close(sibling.channel.as_raw_fd()) };
                }
                let worker = Worker::new(id, child_half, config.clone(), stats.clone_handle());
                worker.run();
                std::process::exit(0);
            }
            pid => {
                drop(child_half);
                workers.push(WorkerHandle {
                    pid,
                    channel: parent_half,
                });
            }
        }
    }
    Ok(workers)
}

fn reap(pid: libc::pid_t) {
    let mut status: libc::c_int = 0;
    loop {
        let r = unsafe { libc::waitpid(pid, &mut status, 0) };
        if r >= 0 || std::io::Error::last_os_error().raw_os_error() != Some(libc::EINTR) {
            break;
        }
    }
}
