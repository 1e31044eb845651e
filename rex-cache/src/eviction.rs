//  Copyright 2025 Rex Project Authors
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

use std::time::Duration;

use rex_engine::Engine;
use tracing::debug;

use crate::{cache::Inner, config::CacheConfig, key::PatternKey};

pub(crate) enum EvictReason {
    Lru,
    Idle,
}

struct Candidate {
    key: PatternKey,
    last_access: u64,
}

/// Keep the `n` oldest candidates: select the cut-off in linear time, then
/// sort just the batch.
fn oldest(mut pool: Vec<Candidate>, n: usize) -> Vec<Candidate> {
    if n == 0 {
        pool.clear();
        return pool;
    }
    if pool.len() > n {
        pool.select_nth_unstable_by_key(n - 1, |candidate| candidate.last_access);
        pool.truncate(n);
    }
    pool.sort_unstable_by_key(|candidate| candidate.last_access);
    pool
}

impl<E: Engine> Inner<E> {
    /// One LRU governor cycle. Runs on insert-pressure wakeups and on the
    /// periodic fallback tick; the inserting caller never blocks on it.
    pub(crate) fn lru_sweep(&self) {
        let config = self.config();
        loop {
            let excess = self.excess(&config);
            if excess == 0 {
                return;
            }
            let now = self.clock.now_nanos();
            let target = excess.min(config.lru_batch_size).max(1);
            let protection = config.eviction_protection.as_nanos() as u64;

            let (unreferenced, referenced) = self.collect_candidates(now, config.eviction_protection);
            let mut selected = oldest(unreferenced, target);
            if selected.len() < target {
                // Not enough unpinned entries to relieve the pressure; fall
                // back to referenced ones, which retire into the deferred
                // queue instead of being destroyed.
                let deficit = target - selected.len();
                selected.extend(oldest(referenced, deficit));
            }
            if selected.is_empty() {
                debug!("lru sweep found no evictable candidates");
                return;
            }

            let mut progressed = false;
            for candidate in selected {
                if self.excess(&config) == 0 {
                    return;
                }
                if self
                    .evict_entry(&candidate.key, protection, EvictReason::Lru, now)
                    .is_some()
                {
                    progressed = true;
                }
            }
            if !progressed {
                return;
            }
        }
    }

    /// One idle-scanner cycle: expire everything older than the threshold.
    pub(crate) fn idle_sweep(&self) {
        let config = self.config();
        let now = self.clock.now_nanos();
        let threshold = config.idle_threshold.as_nanos() as u64;

        let mut expired = Vec::new();
        self.map.for_each(|key, entry| {
            if now.saturating_sub(entry.last_access()) >= threshold {
                expired.push(key.clone());
            }
        });
        for key in expired {
            self.evict_entry(&key, threshold, EvictReason::Idle, now);
        }
    }

    /// Entries (or an entry-count equivalent, for the byte cap) that must go
    /// before the soft caps are satisfied again.
    fn excess(&self, config: &CacheConfig) -> usize {
        let len = self.map.len();
        let over_entries = len.saturating_sub(config.max_entries);
        let over_bytes = match config.max_live_bytes {
            Some(cap) if self.accounting.live_bytes() > cap => config.lru_batch_size.min(len),
            _ => 0,
        };
        over_entries.max(over_bytes)
    }

    fn collect_candidates(
        &self,
        now: u64,
        protection: Duration,
    ) -> (Vec<Candidate>, Vec<Candidate>) {
        let protection = protection.as_nanos() as u64;
        let mut unreferenced = Vec::new();
        let mut referenced = Vec::new();
        self.map.for_each(|key, entry| {
            let last_access = entry.last_access();
            if now.saturating_sub(last_access) < protection {
                return;
            }
            let candidate = Candidate {
                key: key.clone(),
                last_access,
            };
            if entry.handle.refs() == 0 {
                unreferenced.push(candidate);
            } else {
                referenced.push(candidate);
            }
        });
        (unreferenced, referenced)
    }

    /// Remove one entry and retire its handle. Returns `Some(true)` when the
    /// handle was destroyed immediately, `Some(false)` when it moved to the
    /// deferred queue, and `None` when the entry was already gone or has
    /// been touched since it was selected.
    fn evict_entry(
        &self,
        key: &PatternKey,
        min_age: u64,
        reason: EvictReason,
        now: u64,
    ) -> Option<bool> {
        let entry = {
            let mut shard = self.map.shard(key);
            let fresh = match shard.entries.get(key) {
                Some(entry) => now.saturating_sub(entry.last_access()) < min_age,
                None => return None,
            };
            if fresh {
                return None;
            }
            self.map.remove(&mut shard, key)
        }?;
        let destroyed = self.retire_removed(entry.handle, now);
        if destroyed {
            match reason {
                EvictReason::Lru => self.accounting.lru_eviction(),
                EvictReason::Idle => self.accounting.idle_eviction(),
            }
        }
        Some(destroyed)
    }
}
