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

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::error::{Error, ResourceKind, Result};

/// Atomic resource accounting for one cache instance.
///
/// Every mutating cache path records here before the effect becomes
/// externally observable. Each counter is individually atomic; a snapshot is
/// causally consistent per counter, not a global instantaneous total.
#[derive(Debug, Default)]
pub struct Accounting {
    active_patterns: AtomicU64,
    active_matchers: AtomicU64,
    live_bytes: AtomicU64,
    live_bytes_peak: AtomicU64,
    deferred_count: AtomicU64,
    deferred_bytes: AtomicU64,
    deferred_peak_count: AtomicU64,
    deferred_peak_bytes: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions_lru: AtomicU64,
    evictions_idle: AtomicU64,
    evictions_deferred: AtomicU64,
    invalid_recompiled: AtomicU64,
    compilation_failures: AtomicU64,
    resource_rejections: AtomicU64,
}

impl Accounting {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve one active-pattern slot. The increment is rolled back when
    /// the cap is hit, so no externally visible state reflects the overrun.
    pub fn try_reserve_pattern(&self, cap: u64) -> Result<()> {
        let prev = self.active_patterns.fetch_add(1, Ordering::AcqRel);
        if prev >= cap {
            self.active_patterns.fetch_sub(1, Ordering::AcqRel);
            self.resource_rejections.fetch_add(1, Ordering::Relaxed);
            return Err(Error::ResourceExhausted(ResourceKind::ActivePatterns));
        }
        Ok(())
    }

    pub fn release_pattern(&self) {
        let prev = self.active_patterns.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev >= 1);
    }

    pub fn inc_matchers(&self) {
        self.active_matchers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_matchers(&self) {
        self.active_matchers.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_rejection(&self) {
        self.resource_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_insert(&self, bytes: u64) {
        let current = self.live_bytes.fetch_add(bytes, Ordering::AcqRel) + bytes;
        update_peak(&self.live_bytes_peak, current);
    }

    pub fn on_remove(&self, bytes: u64) {
        self.live_bytes.fetch_sub(bytes, Ordering::AcqRel);
    }

    pub fn on_defer(&self, bytes: u64) {
        let count = self.deferred_count.fetch_add(1, Ordering::AcqRel) + 1;
        update_peak(&self.deferred_peak_count, count);
        let total = self.deferred_bytes.fetch_add(bytes, Ordering::AcqRel) + bytes;
        update_peak(&self.deferred_peak_bytes, total);
    }

    pub fn on_deferred_destroyed(&self, bytes: u64) {
        self.deferred_count.fetch_sub(1, Ordering::AcqRel);
        self.deferred_bytes.fetch_sub(bytes, Ordering::AcqRel);
        self.evictions_deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lru_eviction(&self) {
        self.evictions_lru.fetch_add(1, Ordering::Relaxed);
    }

    pub fn idle_eviction(&self) {
        self.evictions_idle.fetch_add(1, Ordering::Relaxed);
    }

    pub fn invalid_recompile(&self) {
        self.invalid_recompiled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn compile_failure(&self) {
        self.compilation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn live_bytes(&self) -> u64 {
        self.live_bytes.load(Ordering::Acquire)
    }

    pub fn active_patterns(&self) -> u64 {
        self.active_patterns.load(Ordering::Acquire)
    }

    pub fn deferred_count(&self) -> u64 {
        self.deferred_count.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> AccountingSnapshot {
        AccountingSnapshot {
            active_patterns: self.active_patterns.load(Ordering::Relaxed),
            active_matchers: self.active_matchers.load(Ordering::Relaxed),
            live_bytes: self.live_bytes.load(Ordering::Relaxed),
            live_bytes_peak: self.live_bytes_peak.load(Ordering::Relaxed),
            deferred_count: self.deferred_count.load(Ordering::Relaxed),
            deferred_bytes: self.deferred_bytes.load(Ordering::Relaxed),
            deferred_peak_count: self.deferred_peak_count.load(Ordering::Relaxed),
            deferred_peak_bytes: self.deferred_peak_bytes.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions_lru: self.evictions_lru.load(Ordering::Relaxed),
            evictions_idle: self.evictions_idle.load(Ordering::Relaxed),
            evictions_deferred: self.evictions_deferred.load(Ordering::Relaxed),
            invalid_recompiled: self.invalid_recompiled.load(Ordering::Relaxed),
            compilation_failures: self.compilation_failures.load(Ordering::Relaxed),
            resource_rejections: self.resource_rejections.load(Ordering::Relaxed),
        }
    }
}

fn update_peak(peak: &AtomicU64, current: u64) {
    let mut seen = peak.load(Ordering::Relaxed);
    while current > seen {
        match peak.compare_exchange_weak(seen, current, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => break,
            Err(now) => seen = now,
        }
    }
}

/// Point-in-time view of the accounting counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccountingSnapshot {
    pub active_patterns: u64,
    pub active_matchers: u64,
    pub live_bytes: u64,
    pub live_bytes_peak: u64,
    pub deferred_count: u64,
    pub deferred_bytes: u64,
    pub deferred_peak_count: u64,
    pub deferred_peak_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions_lru: u64,
    pub evictions_idle: u64,
    pub evictions_deferred: u64,
    pub invalid_recompiled: u64,
    pub compilation_failures: u64,
    pub resource_rejections: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_cap_rolls_back() {
        let accounting = Accounting::new();
        accounting.try_reserve_pattern(2).unwrap();
        accounting.try_reserve_pattern(2).unwrap();

        let err = accounting.try_reserve_pattern(2).unwrap_err();
        assert!(matches!(
            err,
            Error::ResourceExhausted(ResourceKind::ActivePatterns)
        ));
        assert_eq!(accounting.active_patterns(), 2);
        assert_eq!(accounting.snapshot().resource_rejections, 1);

        accounting.release_pattern();
        accounting.try_reserve_pattern(2).unwrap();
    }

    #[test]
    fn test_live_bytes_peak() {
        let accounting = Accounting::new();
        accounting.on_insert(100);
        accounting.on_insert(50);
        accounting.on_remove(120);
        accounting.on_insert(10);

        let snapshot = accounting.snapshot();
        assert_eq!(snapshot.live_bytes, 40);
        assert_eq!(snapshot.live_bytes_peak, 150);
    }

    #[test]
    fn test_deferred_lifecycle() {
        let accounting = Accounting::new();
        accounting.on_defer(64);
        accounting.on_defer(32);
        accounting.on_deferred_destroyed(64);

        let snapshot = accounting.snapshot();
        assert_eq!(snapshot.deferred_count, 1);
        assert_eq!(snapshot.deferred_bytes, 32);
        assert_eq!(snapshot.deferred_peak_count, 2);
        assert_eq!(snapshot.deferred_peak_bytes, 96);
        assert_eq!(snapshot.evictions_deferred, 1);
    }

    #[test]
    fn test_peak_update_concurrent() {
        let accounting = std::sync::Arc::new(Accounting::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let accounting = accounting.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        accounting.on_insert(3);
                        accounting.on_remove(3);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        let snapshot = accounting.snapshot();
        assert_eq!(snapshot.live_bytes, 0);
        assert!(snapshot.live_bytes_peak >= 3);
        assert!(snapshot.live_bytes_peak <= 24);
    }
}
