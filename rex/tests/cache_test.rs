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

use std::{
    sync::{Arc, Barrier},
    time::Duration,
};

use rex::{CacheConfig, Error, ManualClock, PatternCache, RegexCache, ResourceKind};
use rex_cache::test_utils::CountingEngine;

fn manual_cache(
    config: CacheConfig,
) -> (
    PatternCache<CountingEngine>,
    Arc<CountingEngine>,
    Arc<ManualClock>,
) {
    let engine = Arc::new(CountingEngine::new());
    let clock = Arc::new(ManualClock::new());
    let cache = PatternCache::builder()
        .with_config(config)
        .with_clock(clock.clone())
        .with_shared_engine(engine.clone())
        .build()
        .unwrap();
    (cache, engine, clock)
}

#[test]
fn test_compile_and_match() {
    let cache = RegexCache::builder().build().unwrap();

    let grant = cache.get_or_compile(b"test\\d+", true).unwrap();
    assert!(grant.full_match("test123"));
    assert!(!grant.full_match("test"));
    cache.release(grant);

    let stats = cache.snapshot_stats();
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.active_patterns, 0);
}

#[test]
fn test_concurrent_deduplication() {
    const CALLERS: usize = 100;

    let (cache, engine, _clock) = manual_cache(CacheConfig {
        max_matchers_per_pattern: CALLERS as u64 + 1,
        ..CacheConfig::default()
    });
    let cache = Arc::new(cache);
    let barrier = Arc::new(Barrier::new(CALLERS));

    let threads: Vec<_> = (0..CALLERS)
        .map(|_| {
            let cache = cache.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                cache.get_or_compile(b"same", true).unwrap()
            })
        })
        .collect();
    let grants: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();

    let stats = cache.snapshot_stats();
    assert_eq!(stats.active_patterns, 1);
    assert_eq!(cache.len(), 1);
    assert_eq!(stats.hits + stats.misses, CALLERS as u64);
    assert!(stats.misses >= 1);
    assert_eq!(engine.compiles(), 1);

    drop(grants);
    assert_eq!(cache.snapshot_stats().active_patterns, 0);
}

#[test]
fn test_lru_eviction_under_insert_pressure() {
    const CAP: usize = 1000;
    const INSERTS: usize = 1100;

    let (cache, engine, clock) = manual_cache(CacheConfig {
        max_entries: CAP,
        max_active_patterns: 10 * CAP as u64,
        ..CacheConfig::default()
    });

    for i in 0..INSERTS {
        let pattern = format!("key{i}\\d*");
        drop(cache.get_or_compile(pattern.as_bytes(), true).unwrap());
    }
    assert_eq!(engine.compiles(), INSERTS);

    // Quiesce: age everything past the protection window, then let the
    // governor settle.
    clock.advance_millis(1100);
    cache.maintain();

    assert!(cache.len() <= CAP * 12 / 10);
    let stats = cache.snapshot_stats();
    assert!(stats.evictions_lru + stats.evictions_deferred >= (INSERTS - CAP) as u64);
}

#[test]
fn test_deferred_reclamation() {
    let (cache, engine, clock) = manual_cache(CacheConfig {
        max_entries: 1,
        ..CacheConfig::default()
    });

    let matcher = cache.get_or_compile(b"deferred", true).unwrap();
    clock.advance_millis(10);
    let _newer = cache.get_or_compile(b"pressure", true).unwrap();

    // Both entries are pinned by grants; pressure retires the older one
    // into the deferred queue instead of destroying it.
    clock.advance_millis(1100);
    cache.maintain();
    let stats = cache.snapshot_stats();
    assert_eq!(stats.deferred_count, 1);
    assert_eq!(engine.destroys(), 0);
    assert!(matcher.is_match("deferred"));

    // Closing the matcher lets the next sweep reclaim it.
    drop(matcher);
    cache.maintain();
    let stats = cache.snapshot_stats();
    assert_eq!(stats.deferred_count, 0);
    assert_eq!(stats.evictions_deferred, 1);
    assert_eq!(engine.destroys(), 1);
}

#[test]
fn test_active_pattern_cap() {
    let (cache, _engine, _clock) = manual_cache(CacheConfig {
        max_entries: 10,
        max_active_patterns: 10,
        ..CacheConfig::default()
    });

    let mut grants = Vec::new();
    for i in 0..10 {
        let pattern = format!("held{i}");
        grants.push(cache.get_or_compile(pattern.as_bytes(), true).unwrap());
    }

    let err = cache.get_or_compile(b"one-too-many", true).unwrap_err();
    assert!(matches!(
        err,
        Error::ResourceExhausted(ResourceKind::ActivePatterns)
    ));

    drop(grants.pop());
    cache.get_or_compile(b"one-too-many", true).unwrap();
}

#[test]
fn test_invalid_handle_recompiled() {
    let (cache, engine, _clock) = manual_cache(CacheConfig::default());

    drop(cache.get_or_compile(b"volatile", true).unwrap());
    assert_eq!(engine.compiles(), 1);

    engine.set_live(false);
    let grant = cache.get_or_compile(b"volatile", true).unwrap();
    engine.set_live(true);
    assert!(grant.is_match("volatile"));

    let stats = cache.snapshot_stats();
    assert_eq!(stats.invalid_recompiled, 1);
    assert_eq!(engine.compiles(), 2);
    assert_eq!(engine.destroys(), 1);
}

#[test]
fn test_capture_and_replace_surface() -> anyhow::Result<()> {
    let cache = RegexCache::builder().build()?;

    let grant = cache.get_or_compile(b"(?<key>\\w+)=(\\d+)", true)?;

    let groups = grant.captures("retries=3").unwrap();
    assert_eq!(groups.len(), 3);

    let (rewritten, count) = grant.replace_all("a=1 b=2", "${key}:$2");
    assert_eq!(rewritten, b"a:1 b:2");
    assert_eq!(count, 2);

    let spans = grant.find_all("x=1 y=2 z=3");
    assert_eq!(spans.len(), 3);

    assert_eq!(
        grant.is_match_bulk(&["a=1", "nope", "b=2"]),
        vec![true, false, true]
    );
    Ok(())
}

#[test]
fn test_config_document_drives_cache() {
    let document = serde_json::json!({
        "max_entries": 2,
        "idle_threshold_seconds": 300,
        "idle_scan_interval_seconds": 60,
        "deferred_cleanup_interval_seconds": 5,
        "eviction_protection_ms": 1000,
        "max_active_patterns": 100,
    });
    let config: CacheConfig = serde_json::from_value(document).unwrap();

    let (cache, _engine, clock) = manual_cache(config);
    for i in 0..5 {
        let pattern = format!("doc{i}");
        drop(cache.get_or_compile(pattern.as_bytes(), true).unwrap());
    }
    clock.advance_millis(1100);
    cache.maintain();
    assert_eq!(cache.len(), 2);
}

#[test]
fn test_config_document_rejected() {
    let document = serde_json::json!({
        "idle_threshold_seconds": 10,
        "idle_scan_interval_seconds": 60,
    });
    let config: CacheConfig = serde_json::from_value(document).unwrap();
    assert!(matches!(
        RegexCache::builder().with_config(config).build(),
        Err(Error::Config(_))
    ));
}

#[test]
fn test_background_workers_evict_without_help() {
    let engine = Arc::new(CountingEngine::new());
    let cache = PatternCache::builder()
        .with_config(CacheConfig {
            max_entries: 100,
            idle_threshold: Duration::from_millis(200),
            idle_scan_interval: Duration::from_millis(50),
            deferred_cleanup_interval: Duration::from_millis(25),
            eviction_protection: Duration::from_millis(10),
            ..CacheConfig::default()
        })
        .with_shared_engine(engine.clone())
        .build()
        .unwrap();

    drop(cache.get_or_compile(b"short-lived", true).unwrap());
    assert_eq!(cache.len(), 1);

    // The idle scanner should expire the entry on its own.
    std::thread::sleep(Duration::from_millis(700));
    assert_eq!(cache.len(), 0);
    assert_eq!(cache.snapshot_stats().evictions_idle, 1);
    assert_eq!(engine.destroys(), 1);
}

#[test]
fn test_shutdown_bounds_and_grant_survival() {
    let (cache, engine, _clock) = manual_cache(CacheConfig::default());

    let held = cache.get_or_compile(b"survivor", true).unwrap();
    cache.shutdown();

    assert!(matches!(
        cache.get_or_compile(b"refused", true),
        Err(Error::ShuttingDown)
    ));
    assert!(held.full_match("survivor"));
    assert_eq!(engine.destroys(), 0);

    drop(held);
    assert_eq!(engine.destroys(), 1);
}
