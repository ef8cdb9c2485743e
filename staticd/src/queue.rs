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

//! A fixed-capacity FIFO of socket descriptors connecting a worker's receive
//! loop (the producer) to its handler threads (the consumers).

use std::collections::VecDeque;
use std::fmt::Display;
use std::os::unix::io::RawFd;
use std::sync::{Condvar, Mutex};

/// Failure returned by [`LocalQueue::enqueue`].
#[derive(Debug, PartialEq, Eq)]
pub enum EnqueueError {
    /// The queue was at capacity.
    Full,
}

impl Display for EnqueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("queue is full")
    }
}

impl std::error::Error for EnqueueError {}

/// Outcome of [`LocalQueue::dequeue`].
#[derive(Debug, PartialEq, Eq)]
pub enum DequeueOutcome {
    /// A descriptor was waiting (or arrived while blocked).
    Fd(RawFd),
    /// The queue was terminated and is now empty; no further descriptors
    /// will ever arrive.
    Shutdown,
}

struct Inner {
    ring: VecDeque<RawFd>,
    capacity: usize,
    terminated: bool,
}

/// A bounded, multi-consumer, single-producer FIFO of socket descriptors.
///
/// Capacity is fixed at construction. `enqueue` never blocks; `dequeue`
/// blocks until either a descriptor is available or the queue has been
/// terminated and drained.
#[derive(Debug)]
pub struct LocalQueue {
    inner: Mutex<Inner>,
    not_empty: Condvar,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("len", &self.ring.len())
            .field("capacity", &self.capacity)
            .field("terminated", &self.terminated)
            .finish()
    }
}

impl LocalQueue {
    /// Creates a queue with room for `capacity` descriptors.
    pub fn new(capacity: usize) -> Self {
        LocalQueue {
            inner: Mutex::new(Inner {
                ring: VecDeque::with_capacity(capacity),
                capacity,
                terminated: false,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Pushes `fd` onto the queue. Never blocks. Returns `Err(Full)` without
    /// mutating the queue if it is already at capacity.
    pub fn enqueue(&self, fd: RawFd) -> Result<(), EnqueueError> {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        if inner.ring.len() >= inner.capacity {
            return Err(EnqueueError::Full);
        }
        inner.ring.push_back(fd);
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Blocks until a descriptor is available or the queue is terminated and
    /// drained.
    pub fn dequeue(&self) -> DequeueOutcome {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        loop {
            if let Some(fd) = inner.ring.pop_front() {
                return DequeueOutcome::Fd(fd);
            }
            if inner.terminated {
                return DequeueOutcome::Shutdown;
            }
            inner = self.not_empty.wait(inner).expect("queue mutex poisoned");
        }
    }

    /// Sets the monotonic terminate flag and wakes every waiter. Idempotent.
    pub fn terminate(&self) {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        inner.terminated = true;
        drop(inner);
        self.not_empty.notify_all();
    }

    /// `true` once [`terminate`](Self::terminate) has been called.
    pub fn is_terminated(&self) -> bool {
        self.inner.lock().expect("queue mutex poisoned").terminated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn enqueue_then_dequeue_round_trips_one_fd() {
        let q = LocalQueue::new(4);
        q.enqueue(42).unwrap();
        assert_eq!(DequeueOutcome::Fd(42), q.dequeue());
    }

    #[test]
    fn enqueue_past_capacity_returns_full_without_blocking() {
        let q = LocalQueue::new(2);
        q.enqueue(1).unwrap();
        assert_eq!(Err(EnqueueError::Full), q.enqueue(2));
    }

    #[test]
    fn dequeue_blocks_until_a_matching_enqueue() {
        let q = Arc::new(LocalQueue::new(4));
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.dequeue());

        thread::sleep(Duration::from_millis(50));
        q.enqueue(7).unwrap();

        assert_eq!(DequeueOutcome::Fd(7), handle.join().unwrap());
    }

    #[test]
    fn terminate_then_drain_then_shutdown_forever() {
        let q = LocalQueue::new(4);
        q.enqueue(1).unwrap();
        q.enqueue(2).unwrap();
        q.terminate();

        assert_eq!(DequeueOutcome::Fd(1), q.dequeue());
        assert_eq!(DequeueOutcome::Fd(2), q.dequeue());
        assert_eq!(DequeueOutcome::Shutdown, q.dequeue());
        assert_eq!(DequeueOutcome::Shutdown, q.dequeue());
    }

    #[test]
    fn terminate_wakes_a_blocked_dequeue() {
        let q = Arc::new(LocalQueue::new(4));
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.dequeue());

        thread::sleep(Duration::from_millis(50));
        q.terminate();

        assert_eq!(DequeueOutcome::Shutdown, handle.join().unwrap());
    }

    #[test]
    fn fifo_order_is_preserved() {
        let q = LocalQueue::new(8);
        for fd in 0..5 {
            q.enqueue(fd).unwrap();
        }
        for fd in 0..5 {
            assert_eq!(DequeueOutcome::Fd(fd), q.dequeue());
        }
    }
}
