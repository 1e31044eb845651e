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

//! rex - linear-time regular expressions with a process-wide compiled
//! pattern cache.
//!
//! ```
//! let cache = rex::RegexCache::builder().build().unwrap();
//!
//! let grant = cache.get_or_compile(b"test\\d+", true).unwrap();
//! assert!(grant.full_match("test123"));
//! assert!(!grant.full_match("test"));
//! drop(grant);
//!
//! assert_eq!(cache.snapshot_stats().misses, 1);
//! ```

mod haystack;

use std::sync::OnceLock;

pub use rex_cache::{
    AccountingSnapshot, CacheConfig, Error, Grant, PatternCache, PatternCacheBuilder, PatternKey,
    ResourceKind, Result,
};
pub use rex_common::clock::{Clock, ManualClock, SystemClock};
pub use rex_engine::{
    Compiled, CompileError, CompileErrorKind, Engine, Program, RegexEngine, RegexProgram, Span,
};

pub use crate::haystack::Haystack;

/// The default cache over the default engine.
pub type RegexCache = PatternCache<RegexEngine>;

/// Process-wide cache instance with the default configuration.
///
/// The cache type stays instantiable; use [`RegexCache::builder`] for
/// isolated instances, which tests should prefer.
pub fn global() -> &'static RegexCache {
    static GLOBAL: OnceLock<RegexCache> = OnceLock::new();
    GLOBAL.get_or_init(|| {
        RegexCache::builder()
            .build()
            .expect("default configuration is valid")
    })
}
