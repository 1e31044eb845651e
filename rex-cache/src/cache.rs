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
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use bytes::Bytes;
use crossbeam::channel::{bounded, Receiver};
use hashbrown::hash_map::Entry as HashMapEntry;
use parking_lot::{Mutex, RwLock};
use rex_common::{
    clock::{Clock, SystemClock},
    worker::{Waker, Worker},
};
use rex_engine::{Compiled, Engine, RegexEngine};
use tracing::{debug, error, warn};

use crate::{
    accounting::{Accounting, AccountingSnapshot},
    config::{CacheConfig, Limits},
    deferred::DeferredQueue,
    error::{Error, Result},
    handle::{Grant, PatternHandle},
    key::PatternKey,
    map::{CacheEntry, PatternMap, Shard},
};

const SHARD_COUNT: usize = 16;
const SHUTDOWN_DRAIN_WINDOW: Duration = Duration::from_secs(1);
const SHUTDOWN_DRAIN_POLL: Duration = Duration::from_millis(10);

pub(crate) struct Inner<E: Engine> {
    pub(crate) engine: Arc<E>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) accounting: Arc<Accounting>,
    pub(crate) map: PatternMap<E>,
    pub(crate) deferred: DeferredQueue<E>,
    pub(crate) config: RwLock<Arc<CacheConfig>>,
    pub(crate) lru_waker: Mutex<Option<Waker>>,
    pub(crate) shutdown: AtomicBool,
}

enum Lookup<E: Engine> {
    Hit(Grant<E>),
    Wait(Receiver<Result<Grant<E>>>),
    MustCompile,
    Poisoned,
}

impl<E: Engine> Inner<E> {
    pub(crate) fn config(&self) -> Arc<CacheConfig> {
        self.config.read().clone()
    }

    fn get_or_compile(self: &Arc<Self>, pattern: &[u8], case_sensitive: bool) -> Result<Grant<E>> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(Error::ShuttingDown);
        }
        let config = self.config();
        let key = PatternKey::new(Bytes::copy_from_slice(pattern), case_sensitive);
        if !config.cache_enabled {
            return self.compile_one_shot(&key, &config);
        }
        let limits = config.limits();

        let mut retried = false;
        loop {
            match self.lookup_or_begin(&key, &config, limits)? {
                Lookup::Hit(grant) => return Ok(grant),
                Lookup::Wait(rx) => {
                    self.accounting.miss();
                    match rx.recv() {
                        Ok(result) => return result,
                        // The compiling thread went away without answering;
                        // retake the miss path.
                        Err(_) => {}
                    }
                }
                Lookup::MustCompile => {
                    self.accounting.miss();
                    return self.compile_and_insert(&key, &config, limits);
                }
                Lookup::Poisoned => {}
            }
            if retried {
                error!(
                    "pattern {:016x} poisoned twice; giving up",
                    key.fingerprint()
                );
                return Err(Error::Poisoned);
            }
            retried = true;
        }
    }

    fn lookup_or_begin(
        &self,
        key: &PatternKey,
        config: &CacheConfig,
        limits: Limits,
    ) -> Result<Lookup<E>> {
        let mut shard = self.map.shard(key);
        if let Some(entry) = shard.entries.get(key) {
            entry.touch(self.clock.now_nanos());
            let handle = entry.handle.clone();
            if config.validate_cached_handles && !self.engine.is_live(handle.program()) {
                // The engine no longer vouches for the program; drop the
                // entry and retake the miss path.
                self.map.remove(&mut shard, key);
                drop(shard);
                self.accounting.invalid_recompile();
                debug!(
                    "pattern {:016x} reported dead; recompiling",
                    key.fingerprint()
                );
                self.retire_removed(handle, self.clock.now_nanos());
                let mut shard = self.map.shard(key);
                return Ok(self.join_or_begin(&mut shard, key));
            }
            return match handle.acquire(limits) {
                Ok(grant) => {
                    self.accounting.hit();
                    Ok(Lookup::Hit(grant))
                }
                Err(Error::Poisoned) => Ok(Lookup::Poisoned),
                Err(err) => Err(err),
            };
        }
        Ok(self.join_or_begin(&mut shard, key))
    }

    /// Join the in-flight compilation of `key` or claim it for this caller.
    fn join_or_begin(&self, shard: &mut Shard<E>, key: &PatternKey) -> Lookup<E> {
        match shard.waiters.entry(key.clone()) {
            HashMapEntry::Occupied(mut occupied) => {
                let (tx, rx) = bounded(1);
                occupied.get_mut().push(tx);
                Lookup::Wait(rx)
            }
            HashMapEntry::Vacant(vacant) => {
                vacant.insert(Vec::new());
                Lookup::MustCompile
            }
        }
    }

    fn compile_and_insert(
        self: &Arc<Self>,
        key: &PatternKey,
        config: &CacheConfig,
        limits: Limits,
    ) -> Result<Grant<E>> {
        let result = self.try_compile_and_insert(key, config, limits);
        if let Err(err) = &result {
            // Leave no entry behind and fail every waiter with the same
            // error.
            let waiters = {
                let mut shard = self.map.shard(key);
                shard.waiters.remove(key)
            };
            for tx in waiters.into_iter().flatten() {
                let _ = tx.send(Err(err.clone()));
            }
        }
        result
    }

    fn try_compile_and_insert(
        self: &Arc<Self>,
        key: &PatternKey,
        config: &CacheConfig,
        limits: Limits,
    ) -> Result<Grant<E>> {
        // No lock is held while the engine compiles; concurrent callers for
        // the same key are parked on the waiter list.
        let Compiled { program, footprint } = self
            .engine
            .compile(key.pattern(), key.case_sensitive())
            .map_err(|err| {
                self.accounting.compile_failure();
                Error::compile(err, key.pattern())
            })?;

        let handle = PatternHandle::new(
            self.engine.clone(),
            self.accounting.clone(),
            program,
            footprint as u64,
            key.fingerprint(),
        );
        let grant = match handle.acquire(limits) {
            Ok(grant) => grant,
            Err(err) => {
                // Over a cap before the entry ever became visible; tear the
                // program down on the spot.
                let now = self.clock.now_nanos();
                handle.retire(now);
                handle.destroy_if_zero();
                return Err(err);
            }
        };
        if self.shutdown.load(Ordering::Acquire) {
            return Err(Error::ShuttingDown);
        }

        let now = self.clock.now_nanos();
        // Accounting lands before the grant becomes observable.
        self.accounting.on_insert(handle.footprint());
        let (old, waiters) = {
            let mut shard = self.map.shard(key);
            let old = self
                .map
                .insert(&mut shard, key.clone(), CacheEntry::new(handle.clone(), now));
            let waiters = shard.waiters.remove(key);
            (old, waiters)
        };
        if let Some(old) = old {
            // Single-compiler-per-key makes a replaced entry unexpected;
            // retire it like any other removal.
            self.retire_removed(old.handle, now);
        }
        for tx in waiters.into_iter().flatten() {
            let _ = tx.send(handle.acquire(limits));
        }

        self.maybe_wake_lru(config);
        Ok(grant)
    }

    fn compile_one_shot(&self, key: &PatternKey, config: &CacheConfig) -> Result<Grant<E>> {
        self.accounting.miss();
        let Compiled { program, footprint } = self
            .engine
            .compile(key.pattern(), key.case_sensitive())
            .map_err(|err| {
                self.accounting.compile_failure();
                Error::compile(err, key.pattern())
            })?;
        let handle = PatternHandle::new(
            self.engine.clone(),
            self.accounting.clone(),
            program,
            footprint as u64,
            key.fingerprint(),
        );
        let grant = handle.acquire(config.limits())?;
        // Retired straight away: the last release destroys the program.
        handle.retire(self.clock.now_nanos());
        Ok(grant)
    }

    /// Retire a handle that just left the map: destroy it right away at
    /// refcount zero, otherwise park it on the deferred queue. Returns
    /// whether it was destroyed immediately.
    pub(crate) fn retire_removed(&self, handle: Arc<PatternHandle<E>>, now: u64) -> bool {
        self.accounting.on_remove(handle.footprint());
        handle.retire(now);
        if handle.destroy_if_zero() {
            true
        } else {
            self.deferred.push(handle);
            false
        }
    }

    pub(crate) fn clear_all(&self) {
        let now = self.clock.now_nanos();
        let mut drained = Vec::new();
        for index in 0..self.map.shard_count() {
            let mut shard = self.map.shard_at(index);
            drained.extend(self.map.drain(&mut shard));
        }
        for (_, entry) in drained {
            self.retire_removed(entry.handle, now);
        }
    }

    pub(crate) fn deferred_sweep(&self) -> usize {
        let config = self.config();
        self.deferred
            .sweep(self.clock.now_nanos(), config.forced_deferred_deadline)
    }

    fn over_caps(&self, config: &CacheConfig) -> bool {
        if self.map.len() > config.max_entries {
            return true;
        }
        match config.max_live_bytes {
            Some(cap) => self.accounting.live_bytes() > cap,
            None => false,
        }
    }

    fn maybe_wake_lru(&self, config: &CacheConfig) {
        if self.over_caps(config) {
            if let Some(waker) = self.lru_waker.lock().as_ref() {
                waker.wake();
            }
        }
    }
}

/// Cache of compiled patterns keyed by `(pattern bytes, case sensitivity)`.
///
/// A hit returns a [`Grant`] on the shared compiled program. A miss compiles
/// at most once per key regardless of how many callers raced into it; the
/// rest block until that compilation resolves. Entry lifetime is governed by
/// three background workers: the LRU governor (entry/byte soft caps), the
/// idle scanner (last-access age), and the deferred sweeper (retired handles
/// waiting for their last grant).
///
/// Dropping the cache shuts it down; in-flight grants stay valid until their
/// holders release them.
pub struct PatternCache<E: Engine = RegexEngine> {
    inner: Arc<Inner<E>>,
    workers: Mutex<Vec<Worker>>,
}

impl PatternCache<RegexEngine> {
    /// Build a cache over the default engine.
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::builder().with_config(config).build()
    }

    pub fn builder() -> PatternCacheBuilder<RegexEngine> {
        PatternCacheBuilder::new()
    }
}

impl<E: Engine> PatternCache<E> {
    /// Look the pattern up, compiling it on a miss.
    pub fn get_or_compile(&self, pattern: &[u8], case_sensitive: bool) -> Result<Grant<E>> {
        self.inner.get_or_compile(pattern, case_sensitive)
    }

    /// Release a grant. Equivalent to dropping it.
    pub fn release(&self, grant: Grant<E>) {
        drop(grant);
    }

    /// Retire every cached entry. Handles still referenced move to the
    /// deferred queue; the rest are destroyed.
    pub fn clear(&self) {
        self.inner.clear_all();
    }

    /// Swap the configuration. Workers are restarted and the cache is
    /// cleared as part of the swap.
    pub fn reconfigure(&self, config: CacheConfig) -> Result<()> {
        config.validate()?;
        self.stop_workers();
        self.inner.clear_all();
        *self.inner.config.write() = Arc::new(config);
        self.start_workers();
        Ok(())
    }

    pub fn snapshot_stats(&self) -> AccountingSnapshot {
        self.inner.accounting.snapshot()
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.inner.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.map.is_empty()
    }

    pub fn config(&self) -> CacheConfig {
        self.inner.config.read().as_ref().clone()
    }

    /// Run one cycle of every background maintenance task inline. Handy for
    /// deterministic tests; production callers can rely on the workers.
    pub fn maintain(&self) {
        self.inner.lru_sweep();
        self.inner.idle_sweep();
        self.inner.deferred_sweep();
    }

    /// Stop the workers, clear the cache, and drain the deferred queue for a
    /// bounded window. Grants already handed out keep their program alive
    /// until released; only new acquires fail afterwards.
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop_workers();
        self.inner.clear_all();
        let deadline = Instant::now() + SHUTDOWN_DRAIN_WINDOW;
        loop {
            if self.inner.deferred_sweep() == 0 {
                break;
            }
            if Instant::now() >= deadline {
                warn!(
                    "shutdown leaving {} retired patterns for their holders",
                    self.inner.deferred.len()
                );
                break;
            }
            std::thread::sleep(SHUTDOWN_DRAIN_POLL);
        }
    }

    fn start_workers(&self) {
        let config = self.inner.config();
        let mut workers = self.workers.lock();

        let inner = self.inner.clone();
        let governor = Worker::spawn("rex-lru-governor", config.idle_scan_interval, move || {
            inner.lru_sweep()
        });
        *self.inner.lru_waker.lock() = Some(governor.waker());

        let inner = self.inner.clone();
        let scanner = Worker::spawn("rex-idle-scanner", config.idle_scan_interval, move || {
            inner.idle_sweep()
        });

        let inner = self.inner.clone();
        let sweeper = Worker::spawn(
            "rex-deferred-sweeper",
            config.deferred_cleanup_interval,
            move || {
                inner.deferred_sweep();
            },
        );

        workers.extend([governor, scanner, sweeper]);
    }

    fn stop_workers(&self) {
        *self.inner.lru_waker.lock() = None;
        for worker in self.workers.lock().drain(..) {
            worker.shutdown();
        }
    }
}

impl<E: Engine> Drop for PatternCache<E> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Builder for [`PatternCache`]. The engine, clock, and configuration are
/// capabilities selected once, at construction time.
pub struct PatternCacheBuilder<E: Engine = RegexEngine> {
    config: CacheConfig,
    engine: Arc<E>,
    clock: Arc<dyn Clock>,
}

impl PatternCacheBuilder<RegexEngine> {
    pub fn new() -> Self {
        Self {
            config: CacheConfig::default(),
            engine: Arc::new(RegexEngine::new()),
            clock: Arc::new(SystemClock::new()),
        }
    }
}

impl Default for PatternCacheBuilder<RegexEngine> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Engine> PatternCacheBuilder<E> {
    pub fn with_config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_engine<E2: Engine>(self, engine: E2) -> PatternCacheBuilder<E2> {
        self.with_shared_engine(Arc::new(engine))
    }

    pub fn with_shared_engine<E2: Engine>(self, engine: Arc<E2>) -> PatternCacheBuilder<E2> {
        PatternCacheBuilder {
            config: self.config,
            engine,
            clock: self.clock,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<PatternCache<E>> {
        self.config.validate()?;
        let accounting = Arc::new(Accounting::new());
        let inner = Arc::new(Inner {
            engine: self.engine,
            clock: self.clock,
            accounting: accounting.clone(),
            map: PatternMap::new(SHARD_COUNT),
            deferred: DeferredQueue::new(accounting),
            config: RwLock::new(Arc::new(self.config)),
            lru_waker: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        });
        let cache = PatternCache {
            inner,
            workers: Mutex::new(Vec::new()),
        };
        cache.start_workers();
        Ok(cache)
    }
}
