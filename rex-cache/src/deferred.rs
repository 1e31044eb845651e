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

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use rex_engine::Engine;
use tracing::warn;

use crate::{accounting::Accounting, handle::PatternHandle};

/// Retired handles whose refcount had not reached zero at eviction time.
///
/// A handle entered here never re-enters the cache map; it waits for its
/// last releaser and is then destroyed by whoever observes refcount zero
/// first, the sweeper or the releaser itself. The queue also settles the
/// deferred accounting: a record leaves exactly once, and that is when
/// `evictions_deferred` is counted.
pub struct DeferredQueue<E: Engine> {
    accounting: Arc<Accounting>,
    records: Mutex<Vec<Arc<PatternHandle<E>>>>,
}

impl<E: Engine> DeferredQueue<E> {
    pub fn new(accounting: Arc<Accounting>) -> Self {
        Self {
            accounting,
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, handle: Arc<PatternHandle<E>>) {
        debug_assert!(!handle.is_live());
        self.accounting.on_defer(handle.footprint());
        self.records.lock().push(handle);
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// One sweep cycle: snapshot the queue, destroy every record whose
    /// refcount reached zero, drop records the last releaser already
    /// destroyed, and report handles lingering past the forced deadline.
    /// Returns the number of records left behind.
    pub fn sweep(&self, now_nanos: u64, forced_deadline: Duration) -> usize {
        let snapshot: Vec<_> = self.records.lock().clone();
        for handle in &snapshot {
            handle.destroy_if_zero();
        }

        let deadline_nanos = forced_deadline.as_nanos() as u64;
        let mut records = self.records.lock();
        records.retain(|handle| {
            if handle.is_destroyed() {
                self.accounting.on_deferred_destroyed(handle.footprint());
                return false;
            }
            let age = now_nanos.saturating_sub(handle.retired_at());
            if age >= deadline_nanos && handle.mark_warned() {
                // Diagnostic only. Destroying while referenced would free a
                // program that in-flight matchers still run against.
                warn!(
                    "retired pattern {:016x} still referenced after {:?} (refs={})",
                    handle.fingerprint(),
                    forced_deadline,
                    handle.refs(),
                );
            }
            true
        });
        records.len()
    }
}
