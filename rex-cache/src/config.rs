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

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Cache configuration.
///
/// The serialized document uses whole seconds (milliseconds for the eviction
/// protection window); finer-grained intervals are available through the
/// builder for tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// When false every call compiles a one-shot handle that is destroyed on
    /// release. Accounting limits still apply.
    pub cache_enabled: bool,

    /// Soft cap on the number of cached entries.
    pub max_entries: usize,

    /// Optional soft cap on the summed byte footprint of cached programs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_live_bytes: Option<u64>,

    /// Age at which an entry becomes evictable by the idle scanner.
    #[serde(rename = "idle_threshold_seconds", with = "duration_secs")]
    pub idle_threshold: Duration,

    /// Idle-scanner period. Must not exceed the idle threshold.
    #[serde(rename = "idle_scan_interval_seconds", with = "duration_secs")]
    pub idle_scan_interval: Duration,

    /// Deferred-queue sweeper period. Must not exceed the idle-scan
    /// interval.
    #[serde(rename = "deferred_cleanup_interval_seconds", with = "duration_secs")]
    pub deferred_cleanup_interval: Duration,

    /// Minimum age before the LRU governor may evict a fresh entry, so an
    /// acquirer gets to use what it just compiled.
    #[serde(rename = "eviction_protection_ms", with = "duration_millis")]
    pub eviction_protection: Duration,

    /// Maximum entries evicted per LRU cycle.
    pub lru_batch_size: usize,

    /// Cap on simultaneously active patterns (patterns with at least one
    /// outstanding grant), not a cumulative count.
    pub max_active_patterns: u64,

    /// Cap on concurrent grants per compiled program. A recompiled pattern
    /// starts a fresh budget.
    pub max_matchers_per_pattern: u64,

    /// Revalidate cached programs against the engine on every hit.
    pub validate_cached_handles: bool,

    /// Age at which a lingering retired handle is reported. Diagnostic
    /// only; a referenced handle is never force-destroyed.
    #[serde(rename = "forced_deferred_deadline_seconds", with = "duration_secs")]
    pub forced_deferred_deadline: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            max_entries: 50_000,
            max_live_bytes: None,
            idle_threshold: Duration::from_secs(300),
            idle_scan_interval: Duration::from_secs(60),
            deferred_cleanup_interval: Duration::from_secs(5),
            eviction_protection: Duration::from_millis(1000),
            lru_batch_size: 100,
            max_active_patterns: 100_000,
            max_matchers_per_pattern: 10_000,
            validate_cached_handles: true,
            forced_deferred_deadline: Duration::from_secs(600),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(Error::Config("max_entries must be positive".into()));
        }
        if self.max_live_bytes == Some(0) {
            return Err(Error::Config("max_live_bytes must be positive".into()));
        }
        if self.lru_batch_size == 0 {
            return Err(Error::Config("lru_batch_size must be positive".into()));
        }
        if self.max_active_patterns == 0 {
            return Err(Error::Config("max_active_patterns must be positive".into()));
        }
        if self.max_matchers_per_pattern == 0 {
            return Err(Error::Config(
                "max_matchers_per_pattern must be positive".into(),
            ));
        }
        for (name, duration) in [
            ("idle_threshold_seconds", self.idle_threshold),
            ("idle_scan_interval_seconds", self.idle_scan_interval),
            (
                "deferred_cleanup_interval_seconds",
                self.deferred_cleanup_interval,
            ),
            ("eviction_protection_ms", self.eviction_protection),
            (
                "forced_deferred_deadline_seconds",
                self.forced_deferred_deadline,
            ),
        ] {
            if duration.is_zero() {
                return Err(Error::Config(format!("{name} must be positive")));
            }
        }
        if self.deferred_cleanup_interval > self.idle_scan_interval {
            return Err(Error::Config(
                "deferred_cleanup_interval_seconds must not exceed idle_scan_interval_seconds"
                    .into(),
            ));
        }
        if self.idle_scan_interval > self.idle_threshold {
            return Err(Error::Config(
                "idle_scan_interval_seconds must not exceed idle_threshold_seconds".into(),
            ));
        }
        if self.max_entries as u64 > self.max_active_patterns {
            return Err(Error::Config(
                "max_entries must not exceed max_active_patterns".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn limits(&self) -> Limits {
        Limits {
            max_matchers: self.max_matchers_per_pattern,
            max_patterns: self.max_active_patterns,
        }
    }
}

/// Acquire-time caps, copied out of the config so grants can re-acquire
/// without touching the config lock.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Limits {
    pub max_matchers: u64,
    pub max_patterns: u64,
}
