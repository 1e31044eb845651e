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

//! The pattern cache core: a concurrent map from `(pattern, case flag)` to
//! reference-counted compiled programs, with LRU and idle eviction, deferred
//! reclamation for handles still held by in-flight matchers, and atomic
//! resource accounting.

pub mod accounting;
pub mod cache;
pub mod config;
pub mod deferred;
pub mod error;
mod eviction;
pub mod handle;
pub mod key;
pub mod map;
pub mod test_utils;

pub use crate::{
    accounting::AccountingSnapshot,
    cache::{PatternCache, PatternCacheBuilder},
    config::CacheConfig,
    error::{Error, ResourceKind, Result},
    handle::Grant,
    key::PatternKey,
};
