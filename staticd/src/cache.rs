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

//! An in-process LRU cache, content-addressed by path, bounded by total byte
//! size, shared by every handler thread in a worker.
//!
//! Nodes live in a [`slab::Slab`] and participate in two intrusive
//! structures addressed by slab key rather than raw pointers: a per-bucket
//! hash chain (`Node::hnext`) and a doubly-linked recency list
//! (`Node::prev`/`Node::next`), exactly as described for the original
//! pointer-based design, but leak-free.

use std::fmt::Display;

use slab::Slab;
use std::sync::RwLock;

/// One entry in the cache.
struct Node {
    path: String,
    payload: Vec<u8>,
    prev: Option<usize>,
    next: Option<usize>,
    hnext: Option<usize>,
}

const DEFAULT_BUCKETS: usize = 4096;
const MAX_ENTRY_BYTES: usize = 1024 * 1024;

/// djb2: a small, stable, non-cryptographic string hash.
fn hash_path(path: &str) -> u64 {
    let mut h: u64 = 5381;
    for b in path.bytes() {
        h = h.wrapping_shl(5).wrapping_add(h).wrapping_add(b as u64);
    }
    h
}

struct Inner {
    nodes: Slab<Node>,
    buckets: Vec<Option<usize>>,
    head: Option<usize>,
    tail: Option<usize>,
    current_bytes: usize,
    max_bytes: usize,
}

impl Inner {
    fn bucket_of(&self, path: &str) -> usize {
        (hash_path(path) as usize) % self.buckets.len()
    }

    fn find(&self, path: &str) -> Option<usize> {
        let mut cur = self.buckets[self.bucket_of(path)];
        while let Some(idx) = cur {
            let node = &self.nodes[idx];
            if node.path == path {
                return Some(idx);
            }
            cur = node.hnext;
        }
        None
    }

    fn unlink_from_list(&mut self, idx: usize) {
        let (prev, next) = {
            let n = &self.nodes[idx];
            (n.prev, n.next)
        };
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }
        let n = &mut self.nodes[idx];
        n.prev = None;
        n.next = None;
    }

    fn insert_at_head(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let n = &mut self.nodes[idx];
            n.prev = None;
            n.next = old_head;
        }
        if let Some(h) = old_head {
            self.nodes[h].prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn unlink_from_bucket(&mut self, idx: usize) {
        let bucket = self.bucket_of(&self.nodes[idx].path);
        let mut cur = self.buckets[bucket];
        let mut prev: Option<usize> = None;
        while let Some(cur_idx) = cur {
            if cur_idx == idx {
                let next = self.nodes[cur_idx].hnext;
                match prev {
                    Some(p) => self.nodes[p].hnext = next,
                    None => self.buckets[bucket] = next,
                }
                return;
            }
            prev = Some(cur_idx);
            cur = self.nodes[cur_idx].hnext;
        }
    }

    fn evict_node(&mut self, idx: usize) {
        self.unlink_from_bucket(idx);
        self.unlink_from_list(idx);
        let node = self.nodes.remove(idx);
        self.current_bytes -= node.payload.len();
    }

    fn evict_until_within_budget(&mut self) {
        while self.current_bytes > self.max_bytes {
            let Some(tail) = self.tail else { break };
            self.evict_node(tail);
        }
    }
}

/// Failures returned by [`Cache::put`].
#[derive(Debug, PartialEq, Eq)]
pub enum PutError {
    /// `bytes` was empty.
    Empty,
    /// `bytes` exceeded the 1 MiB per-entry limit.
    TooLarge,
}

impl Display for PutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PutError::Empty => "payload is empty",
            PutError::TooLarge => "payload exceeds the 1 MiB per-entry limit",
        })
    }
}

impl std::error::Error for PutError {}

/// A concurrent, byte-bounded LRU cache keyed by path.
pub struct Cache {
    inner: RwLock<Inner>,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read().expect("cache lock poisoned");
        f.debug_struct("Cache")
            .field("entries", &inner.nodes.len())
            .field("current_bytes", &inner.current_bytes)
            .field("max_bytes", &inner.max_bytes)
            .finish()
    }
}

impl Cache {
    /// Creates an empty cache bounded to `max_bytes` total live payload
    /// bytes, with the default bucket count.
    pub fn new(max_bytes: usize) -> Self {
        Self::with_buckets(max_bytes, DEFAULT_BUCKETS)
    }

    /// Creates an empty cache with an explicit bucket count (exposed for
    /// tests that want to force collisions).
    pub fn with_buckets(max_bytes: usize, buckets: usize) -> Self {
        Cache {
            inner: RwLock::new(Inner {
                nodes: Slab::new(),
                buckets: vec![None; buckets.max(1)],
                head: None,
                tail: None,
                current_bytes: 0,
                max_bytes,
            }),
        }
    }

    /// Returns a fresh copy of the cached payload for `path`, promoting it to
    /// most-recently-used. Returns `None` on a miss, including the case
    /// where the entry existed during the initial shared-mode lookup but was
    /// evicted before the lock could be upgraded for promotion.
    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        {
            let inner = self.inner.read().expect("cache lock poisoned");
            inner.find(path)?;
        }

        let mut inner = self.inner.write().expect("cache lock poisoned");
        let idx = inner.find(path)?;
        inner.unlink_from_list(idx);
        inner.insert_at_head(idx);
        Some(inner.nodes[idx].payload.clone())
    }

    /// Inserts or replaces the entry for `path`, then evicts from the tail
    /// until the cache is back within its byte budget.
    pub fn put(&self, path: &str, bytes: &[u8]) -> Result<(), PutError> {
        if bytes.is_empty() {
            return Err(PutError::Empty);
        }
        if bytes.len() > MAX_ENTRY_BYTES {
            return Err(PutError::TooLarge);
        }

        let mut inner = self.inner.write().expect("cache lock poisoned");

        if let Some(idx) = inner.find(path) {
            let old_len = inner.nodes[idx].payload.len();
            inner.nodes[idx].payload = bytes.to_vec();
            inner.current_bytes = inner.current_bytes - old_len + bytes.len();
            inner.unlink_from_list(idx);
            inner.insert_at_head(idx);
        } else {
            let bucket = inner.bucket_of(path);
            let node = Node {
                path: path.to_string(),
                payload: bytes.to_vec(),
                prev: None,
                next: None,
                hnext: inner.buckets[bucket],
            };
            let idx = inner.nodes.insert(node);
            inner.buckets[bucket] = Some(idx);
            inner.insert_at_head(idx);
            inner.current_bytes += bytes.len();
        }

        inner.evict_until_within_budget();
        Ok(())
    }

    /// Frees every entry and resets all accounting to empty.
    pub fn destroy(&self) {
        let mut inner = self.inner.write().expect("cache lock poisoned");
        inner.nodes.clear();
        for b in inner.buckets.iter_mut() {
            *b = None;
        }
        inner.head = None;
        inner.tail = None;
        inner.current_bytes = 0;
    }

    /// Current total live payload bytes. Exposed for invariant testing.
    pub fn current_bytes(&self) -> usize {
        self.inner.read().expect("cache lock poisoned").current_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_returns_identical_bytes() {
        let cache = Cache::new(1024);
        cache.put("/a.txt", b"hello").unwrap();
        assert_eq!(Some(b"hello".to_vec()), cache.get("/a.txt"));
    }

    #[test]
    fn last_write_wins() {
        let cache = Cache::new(1024);
        cache.put("/a.txt", b"one").unwrap();
        cache.put("/a.txt", b"two").unwrap();
        assert_eq!(Some(b"two".to_vec()), cache.get("/a.txt"));
    }

    #[test]
    fn miss_returns_none() {
        let cache = Cache::new(1024);
        assert_eq!(None, cache.get("/nope.txt"));
    }

    #[test]
    fn empty_payload_is_rejected_and_cache_unchanged() {
        let cache = Cache::new(1024);
        assert_eq!(Err(PutError::Empty), cache.put("/a.txt", b""));
        assert_eq!(0, cache.current_bytes());
        assert_eq!(None, cache.get("/a.txt"));
    }

    #[test]
    fn oversized_payload_is_rejected_and_cache_unchanged() {
        let cache = Cache::new(8 * 1024 * 1024);
        let big = vec![0u8; 1024 * 1024 + 1];
        assert_eq!(Err(PutError::TooLarge), cache.put("/big.bin", &big));
        assert_eq!(0, cache.current_bytes());
    }

    #[test]
    fn current_bytes_never_exceeds_max_and_equals_live_sum() {
        let cache = Cache::new(30);
        for i in 0..10 {
            cache.put(&format!("/f{i}"), b"0123456789").unwrap();
            assert!(cache.current_bytes() <= 30);
        }
    }

    #[test]
    fn eviction_keeps_the_k_most_recently_touched_of_n() {
        // N=5 distinct paths of size S=10, max_bytes = k*S with k=3.
        let cache = Cache::new(30);
        for i in 0..5 {
            cache.put(&format!("/f{i}"), b"0123456789").unwrap();
        }
        // f0 and f1 should have been evicted; f2, f3, f4 remain (insertion
        // order is also recency order here, since nothing was re-touched).
        assert_eq!(None, cache.get("/f0"));
        assert_eq!(None, cache.get("/f1"));
        assert!(cache.get("/f2").is_some());
        assert!(cache.get("/f3").is_some());
        assert!(cache.get("/f4").is_some());
    }

    #[test]
    fn get_promotes_so_it_survives_a_later_eviction_wave() {
        let cache = Cache::new(20);
        cache.put("/a", b"0123456789").unwrap();
        cache.put("/b", b"0123456789").unwrap();
        // Touch /a so it becomes most-recently-used, ahead of /b.
        assert!(cache.get("/a").is_some());
        // Inserting /c must evict /b (the actual LRU), not /a.
        cache.put("/c", b"0123456789").unwrap();
        assert!(cache.get("/a").is_some());
        assert_eq!(None, cache.get("/b"));
        assert!(cache.get("/c").is_some());
    }

    #[test]
    fn destroy_clears_everything() {
        let cache = Cache::new(1024);
        cache.put("/a", b"hello").unwrap();
        cache.destroy();
        assert_eq!(0, cache.current_bytes());
        assert_eq!(None, cache.get("/a"));
    }

    #[test]
    fn collisions_within_one_bucket_are_each_independently_addressable() {
        // Force every path into the same bucket; chain traversal must still
        // find the right node.
        let cache = Cache::with_buckets(1024, 1);
        cache.put("/a", b"aaaa").unwrap();
        cache.put("/b", b"bbbb").unwrap();
        cache.put("/c", b"cccc").unwrap();
        assert_eq!(Some(b"aaaa".to_vec()), cache.get("/a"));
        assert_eq!(Some(b"bbbb".to_vec()), cache.get("/b"));
        assert_eq!(Some(b"cccc".to_vec()), cache.get("/c"));
    }

    #[test]
    fn concurrent_readers_and_writers_preserve_byte_accounting() {
        use std::sync::Arc;
        use std::thread;

        let cache = Arc::new(Cache::new(256));
        let mut handles = Vec::new();
        for t in 0..8 {
            let cache = cache.clone();
            handles.push(thread::spawn(move || {
                for i in 0..200 {
                    let path = format!("/t{t}/{i}");
                    let _ = cache.put(&path, b"0123456789");
                    let _ = cache.get(&path);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(cache.current_bytes() <= 256);
    }
}
