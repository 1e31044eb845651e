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

use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use ahash::RandomState;
use crossbeam::channel::Sender;
use hashbrown::HashMap;
use itertools::Itertools;
use parking_lot::{Mutex, MutexGuard};
use rex_engine::Engine;

use crate::{
    error::Result,
    handle::{Grant, PatternHandle},
    key::PatternKey,
};

/// One cached pattern: the shared handle plus its last-access instant.
///
/// `last_access` is written with relaxed ordering on every hit; concurrent
/// writers may leave a stale-but-bounded value, which is fine for the
/// approximate LRU the governor implements.
pub struct CacheEntry<E: Engine> {
    pub handle: Arc<PatternHandle<E>>,
    last_access: AtomicU64,
}

impl<E: Engine> CacheEntry<E> {
    pub fn new(handle: Arc<PatternHandle<E>>, now_nanos: u64) -> Self {
        Self {
            handle,
            last_access: AtomicU64::new(now_nanos),
        }
    }

    pub fn touch(&self, now_nanos: u64) {
        self.last_access.store(now_nanos, Ordering::Relaxed);
    }

    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }
}

pub(crate) type WaiterTx<E> = Sender<Result<Grant<E>>>;

/// One shard: the entries it owns plus the waiter lists of in-flight
/// compilations keyed here.
pub struct Shard<E: Engine> {
    pub entries: HashMap<PatternKey, CacheEntry<E>>,
    pub(crate) waiters: HashMap<PatternKey, Vec<WaiterTx<E>>>,
}

impl<E: Engine> Default for Shard<E> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            waiters: HashMap::new(),
        }
    }
}

/// Sharded pattern map. Writes on distinct keys proceed in parallel and no
/// operation ever holds more than one shard lock at a time.
pub struct PatternMap<E: Engine> {
    shards: Vec<Mutex<Shard<E>>>,
    hash_builder: RandomState,
    len: AtomicUsize,
}

impl<E: Engine> PatternMap<E> {
    pub fn new(shards: usize) -> Self {
        Self {
            shards: (0..shards).map(|_| Mutex::new(Shard::default())).collect(),
            hash_builder: RandomState::default(),
            len: AtomicUsize::new(0),
        }
    }

    pub fn shard(&self, key: &PatternKey) -> MutexGuard<'_, Shard<E>> {
        let hash = self.hash_builder.hash_one(key);
        self.shards[hash as usize % self.shards.len()].lock()
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shard_at(&self, index: usize) -> MutexGuard<'_, Shard<E>> {
        self.shards[index].lock()
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert(
        &self,
        shard: &mut Shard<E>,
        key: PatternKey,
        entry: CacheEntry<E>,
    ) -> Option<CacheEntry<E>> {
        let old = shard.entries.insert(key, entry);
        if old.is_none() {
            self.len.fetch_add(1, Ordering::Relaxed);
        }
        old
    }

    pub fn remove(&self, shard: &mut Shard<E>, key: &PatternKey) -> Option<CacheEntry<E>> {
        let entry = shard.entries.remove(key);
        if entry.is_some() {
            self.len.fetch_sub(1, Ordering::Relaxed);
        }
        entry
    }

    pub fn drain(&self, shard: &mut Shard<E>) -> Vec<(PatternKey, CacheEntry<E>)> {
        let drained = shard.entries.drain().collect_vec();
        self.len.fetch_sub(drained.len(), Ordering::Relaxed);
        drained
    }

    /// Visit every entry, one shard lock at a time. Readers of other shards
    /// are never blocked.
    pub fn for_each(&self, mut f: impl FnMut(&PatternKey, &CacheEntry<E>)) {
        for shard in &self.shards {
            let guard = shard.lock();
            for (key, entry) in guard.entries.iter() {
                f(key, entry);
            }
        }
    }
}
