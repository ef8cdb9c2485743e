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

//! Cooperative shutdown signaling.
//!
//! Only the acceptor process reacts to `SIGINT`/`SIGTERM` directly: it flips
//! a process-local atomic flag from the signal handler, and its accept loop
//! and stats dashboard thread re-check the flag at their natural wakeup
//! points instead of being torn down from inside signal context. A worker's
//! shutdown is never signal-driven — it is triggered solely by observing
//! end-of-stream on its channel to the acceptor (see [`crate::worker`]) — but
//! a worker still ignores `SIGINT` so that a terminal's Ctrl-C, which is
//! delivered to the whole foreground process group, doesn't kill it out from
//! under an in-flight request.

use std::sync::atomic::{AtomicBool, Ordering};

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_signal(_signum: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

/// Installs the acceptor's `SIGINT`/`SIGTERM` handler. Call once, before
/// forking any workers.
pub fn install_handlers() {
    unsafe {
        libc::signal(libc::SIGINT, handle_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_signal as libc::sighandler_t);
    }
}

/// Sets `SIGINT` to be ignored by the calling process. Called by each
/// worker immediately after `fork()`.
pub fn ignore_sigint() {
    unsafe {
        libc::signal(libc::SIGINT, libc::SIG_IGN);
    }
}

/// `true` once the acceptor has observed a shutdown signal.
pub fn requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

/// Test-only hook to simulate a signal without sending a real one.
#[cfg(test)]
pub fn simulate() {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}
