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
    cell::UnsafeCell,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use rex_engine::{Engine, Program, Span};

use crate::{
    accounting::Accounting,
    config::Limits,
    error::{Error, ResourceKind, Result},
};

const STATE_LIVE: u64 = 0;
const STATE_RETIRED: u64 = 1;
const STATE_DESTROYED: u64 = 2;

const STATE_SHIFT: u32 = 62;
const REFS_MASK: u64 = (1 << STATE_SHIFT) - 1;

fn pack(state: u64, refs: u64) -> u64 {
    (state << STATE_SHIFT) | refs
}

fn state_of(word: u64) -> u64 {
    word >> STATE_SHIFT
}

fn refs_of(word: u64) -> u64 {
    word & REFS_MASK
}

/// Reference-counted owner of one compiled program.
///
/// State advances Live → Retired → Destroyed, never backwards. State and
/// refcount share one atomic word so every transition is a single CAS: an
/// acquire cannot slip in behind a retire, and the destroy transition only
/// succeeds at refcount zero. Whichever thread wins the Destroyed transition
/// (the deferred sweeper or the last releaser) takes the program and invokes
/// the engine's destroy; the release decrement synchronizes-with the
/// acquire-ordered CAS, so everything a grant holder did happens-before the
/// destroy.
pub struct PatternHandle<E: Engine> {
    engine: Arc<E>,
    accounting: Arc<Accounting>,
    program: UnsafeCell<Option<E::Program>>,
    footprint: u64,
    fingerprint: u64,
    ctrl: AtomicU64,
    retired_at: AtomicU64,
    warned: AtomicBool,
}

// The program cell is only accessed immutably while a grant or the owning
// shard pins the handle out of the Destroyed state, and mutably by the
// unique winner of the Destroyed CAS.
unsafe impl<E: Engine> Send for PatternHandle<E> {}
unsafe impl<E: Engine> Sync for PatternHandle<E> {}

impl<E: Engine> PatternHandle<E> {
    pub fn new(
        engine: Arc<E>,
        accounting: Arc<Accounting>,
        program: E::Program,
        footprint: u64,
        fingerprint: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            engine,
            accounting,
            program: UnsafeCell::new(Some(program)),
            footprint,
            fingerprint,
            ctrl: AtomicU64::new(pack(STATE_LIVE, 0)),
            retired_at: AtomicU64::new(0),
            warned: AtomicBool::new(false),
        })
    }

    pub fn footprint(&self) -> u64 {
        self.footprint
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn refs(&self) -> u64 {
        refs_of(self.ctrl.load(Ordering::Acquire))
    }

    pub fn is_live(&self) -> bool {
        state_of(self.ctrl.load(Ordering::Acquire)) == STATE_LIVE
    }

    pub fn is_retired(&self) -> bool {
        state_of(self.ctrl.load(Ordering::Acquire)) == STATE_RETIRED
    }

    pub fn is_destroyed(&self) -> bool {
        state_of(self.ctrl.load(Ordering::Acquire)) == STATE_DESTROYED
    }

    /// Instant the handle left the cache map. Meaningful while Retired.
    pub fn retired_at(&self) -> u64 {
        self.retired_at.load(Ordering::Acquire)
    }

    /// First caller gets `true`; used to report a lingering handle once.
    pub(crate) fn mark_warned(&self) -> bool {
        !self.warned.swap(true, Ordering::AcqRel)
    }

    /// Take a scoped grant on the handle, failing when the handle is no
    /// longer Live or a cap is hit. The active-pattern slot is reserved
    /// before the 0→1 transition so the cap never overshoots observably.
    pub(crate) fn acquire(self: &Arc<Self>, limits: Limits) -> Result<Grant<E>> {
        let max_refs = limits.max_matchers.min(REFS_MASK - 1);
        loop {
            let word = self.ctrl.load(Ordering::Acquire);
            if state_of(word) != STATE_LIVE {
                return Err(Error::Poisoned);
            }
            let refs = refs_of(word);
            if refs >= max_refs {
                self.accounting.record_rejection();
                return Err(Error::ResourceExhausted(ResourceKind::MatchersPerPattern));
            }
            if refs == 0 {
                self.accounting.try_reserve_pattern(limits.max_patterns)?;
                if self
                    .ctrl
                    .compare_exchange(word, word + 1, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    break;
                }
                self.accounting.release_pattern();
            } else if self
                .ctrl
                .compare_exchange(word, word + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
        self.accounting.inc_matchers();
        Ok(Grant {
            handle: self.clone(),
            limits,
        })
    }

    /// Drop one reference. Completes destruction when this was the last
    /// grant on a retired handle.
    fn release(&self) {
        let word = self.ctrl.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(refs_of(word) >= 1);
        self.accounting.dec_matchers();
        if refs_of(word) == 1 {
            self.accounting.release_pattern();
            if state_of(word) == STATE_RETIRED {
                self.destroy_if_zero();
            }
        }
    }

    /// Move Live → Retired, keeping the refcount. Returns `true` for the one
    /// caller that observes the transition.
    pub(crate) fn retire(&self, now_nanos: u64) -> bool {
        loop {
            let word = self.ctrl.load(Ordering::Acquire);
            if state_of(word) != STATE_LIVE {
                return false;
            }
            let next = pack(STATE_RETIRED, refs_of(word));
            if self
                .ctrl
                .compare_exchange(word, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.retired_at.store(now_nanos, Ordering::Release);
                return true;
            }
        }
    }

    /// Destroy the program when Retired with no references. At most one
    /// caller ever wins the transition; everyone else gets `false`.
    pub(crate) fn destroy_if_zero(&self) -> bool {
        if self
            .ctrl
            .compare_exchange(
                pack(STATE_RETIRED, 0),
                pack(STATE_DESTROYED, 0),
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_err()
        {
            return false;
        }
        // Sole accessor from here on: the CAS above is the unique
        // Retired→Destroyed transition.
        let program = unsafe { (*self.program.get()).take() };
        if let Some(program) = program {
            self.engine.destroy(program);
        }
        true
    }

    /// Shared program access. The caller must hold a grant or the shard
    /// lock that proves the handle is still mapped.
    pub(crate) fn program(&self) -> &E::Program {
        unsafe { (*self.program.get()).as_ref().unwrap_unchecked() }
    }
}

impl<E: Engine> Drop for PatternHandle<E> {
    fn drop(&mut self) {
        // Safety net for handles that never went through a full retirement,
        // e.g. entries alive when the cache itself is dropped.
        if state_of(*self.ctrl.get_mut()) != STATE_DESTROYED {
            if let Some(program) = self.program.get_mut().take() {
                self.engine.destroy(program);
            }
        }
    }
}

impl<E: Engine> fmt::Debug for PatternHandle<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let word = self.ctrl.load(Ordering::Acquire);
        f.debug_struct("PatternHandle")
            .field("fingerprint", &format_args!("{:016x}", self.fingerprint))
            .field("footprint", &self.footprint)
            .field("state", &state_of(word))
            .field("refs", &refs_of(word))
            .finish()
    }
}

/// Scoped acquisition of a compiled pattern.
///
/// A grant holds one refcount unit for its lifetime and releases it on drop.
/// It stays usable even after the entry is evicted from the cache; the
/// program is destroyed only when the last grant goes away.
pub struct Grant<E: Engine> {
    handle: Arc<PatternHandle<E>>,
    limits: Limits,
}

impl<E: Engine> Grant<E> {
    pub fn fingerprint(&self) -> u64 {
        self.handle.fingerprint()
    }

    /// Exact byte footprint of the compiled program.
    pub fn footprint(&self) -> u64 {
        self.handle.footprint()
    }

    /// Acquire another grant on the same program, subject to the per-pattern
    /// matcher cap.
    pub fn try_clone(&self) -> Result<Self> {
        self.handle.acquire(self.limits)
    }

    pub(crate) fn handle(&self) -> &Arc<PatternHandle<E>> {
        &self.handle
    }

    pub fn is_match(&self, haystack: impl AsRef<[u8]>) -> bool {
        self.handle.program().is_match(haystack.as_ref())
    }

    pub fn full_match(&self, haystack: impl AsRef<[u8]>) -> bool {
        self.handle.program().full_match(haystack.as_ref())
    }

    pub fn find(&self, haystack: impl AsRef<[u8]>) -> Option<Span> {
        self.handle.program().find(haystack.as_ref())
    }

    pub fn captures(&self, haystack: impl AsRef<[u8]>) -> Option<Vec<Option<Span>>> {
        self.handle.program().captures(haystack.as_ref())
    }

    pub fn find_all(&self, haystack: impl AsRef<[u8]>) -> Vec<Span> {
        self.handle.program().find_all(haystack.as_ref())
    }

    pub fn replace_first(
        &self,
        haystack: impl AsRef<[u8]>,
        replacement: impl AsRef<[u8]>,
    ) -> Option<Vec<u8>> {
        self.handle
            .program()
            .replace_first(haystack.as_ref(), replacement.as_ref())
    }

    pub fn replace_all(
        &self,
        haystack: impl AsRef<[u8]>,
        replacement: impl AsRef<[u8]>,
    ) -> (Vec<u8>, usize) {
        self.handle
            .program()
            .replace_all(haystack.as_ref(), replacement.as_ref())
    }

    pub fn is_match_bulk<H: AsRef<[u8]>>(&self, haystacks: &[H]) -> Vec<bool> {
        haystacks.iter().map(|h| self.is_match(h)).collect()
    }

    pub fn replace_all_bulk<H, R>(&self, haystacks: &[H], replacement: R) -> Vec<(Vec<u8>, usize)>
    where
        H: AsRef<[u8]>,
        R: AsRef<[u8]>,
    {
        haystacks
            .iter()
            .map(|h| self.replace_all(h, replacement.as_ref()))
            .collect()
    }
}

impl<E: Engine> Drop for Grant<E> {
    fn drop(&mut self) {
        self.handle.release();
    }
}

impl<E: Engine> fmt::Debug for Grant<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grant")
            .field(
                "fingerprint",
                &format_args!("{:016x}", self.handle.fingerprint()),
            )
            .field("refs", &self.handle.refs())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use rex_engine::Engine as _;

    use super::*;
    use crate::test_utils::CountingEngine;

    fn limits() -> Limits {
        Limits {
            max_matchers: 64,
            max_patterns: 64,
        }
    }

    fn new_handle(
        engine: &Arc<CountingEngine>,
        accounting: &Arc<Accounting>,
    ) -> Arc<PatternHandle<CountingEngine>> {
        let compiled = engine.compile(b"ab+c", true).unwrap();
        PatternHandle::new(
            engine.clone(),
            accounting.clone(),
            compiled.program,
            compiled.footprint as u64,
            42,
        )
    }

    #[test]
    fn test_acquire_release_refcount() {
        let engine = Arc::new(CountingEngine::new());
        let accounting = Arc::new(Accounting::new());
        let handle = new_handle(&engine, &accounting);

        let g1 = handle.acquire(limits()).unwrap();
        assert_eq!(handle.refs(), 1);
        assert_eq!(accounting.active_patterns(), 1);

        let g2 = g1.try_clone().unwrap();
        assert_eq!(handle.refs(), 2);
        assert_eq!(accounting.active_patterns(), 1);

        drop(g1);
        assert_eq!(handle.refs(), 1);
        drop(g2);
        assert_eq!(handle.refs(), 0);
        assert_eq!(accounting.active_patterns(), 0);
        assert_eq!(accounting.snapshot().active_matchers, 0);
    }

    #[test]
    fn test_grant_matches() {
        let engine = Arc::new(CountingEngine::new());
        let accounting = Arc::new(Accounting::new());
        let handle = new_handle(&engine, &accounting);

        let grant = handle.acquire(limits()).unwrap();
        assert!(grant.is_match("xabbcx"));
        assert!(grant.full_match("abbc"));
        assert!(!grant.full_match("xabbcx"));
        assert_eq!(grant.is_match_bulk(&["abc", "nope"]), vec![true, false]);
    }

    #[test]
    fn test_retire_observed_once() {
        let engine = Arc::new(CountingEngine::new());
        let accounting = Arc::new(Accounting::new());
        let handle = new_handle(&engine, &accounting);

        assert!(handle.retire(7));
        assert!(!handle.retire(9));
        assert!(handle.is_retired());
        assert_eq!(handle.retired_at(), 7);
    }

    #[test]
    fn test_acquire_after_retire_is_poisoned() {
        let engine = Arc::new(CountingEngine::new());
        let accounting = Arc::new(Accounting::new());
        let handle = new_handle(&engine, &accounting);

        handle.retire(1);
        assert!(matches!(handle.acquire(limits()), Err(Error::Poisoned)));
    }

    #[test]
    fn test_destroy_waits_for_refs() {
        let engine = Arc::new(CountingEngine::new());
        let accounting = Arc::new(Accounting::new());
        let handle = new_handle(&engine, &accounting);

        let grant = handle.acquire(limits()).unwrap();
        handle.retire(1);
        assert!(!handle.destroy_if_zero());
        assert_eq!(engine.destroys(), 0);

        // The grant still matches against the retired program.
        assert!(grant.is_match("abc"));

        // The last release completes destruction on the releasing thread.
        drop(grant);
        assert!(handle.is_destroyed());
        assert_eq!(engine.destroys(), 1);

        // The transition cannot be won twice.
        assert!(!handle.destroy_if_zero());
        assert_eq!(engine.destroys(), 1);
    }

    #[test]
    fn test_destroy_if_zero_without_refs() {
        let engine = Arc::new(CountingEngine::new());
        let accounting = Arc::new(Accounting::new());
        let handle = new_handle(&engine, &accounting);

        handle.retire(1);
        assert!(handle.destroy_if_zero());
        assert!(handle.is_destroyed());
        assert_eq!(engine.destroys(), 1);
    }

    #[test]
    fn test_matcher_cap() {
        let engine = Arc::new(CountingEngine::new());
        let accounting = Arc::new(Accounting::new());
        let handle = new_handle(&engine, &accounting);

        let caps = Limits {
            max_matchers: 2,
            max_patterns: 64,
        };
        let _g1 = handle.acquire(caps).unwrap();
        let _g2 = handle.acquire(caps).unwrap();
        assert!(matches!(
            handle.acquire(caps),
            Err(Error::ResourceExhausted(ResourceKind::MatchersPerPattern))
        ));
        assert_eq!(accounting.snapshot().resource_rejections, 1);
    }

    #[test]
    fn test_pattern_cap_rollback_leaves_refcount_clean() {
        let engine = Arc::new(CountingEngine::new());
        let accounting = Arc::new(Accounting::new());
        let first = new_handle(&engine, &accounting);
        let second = new_handle(&engine, &accounting);

        let caps = Limits {
            max_matchers: 64,
            max_patterns: 1,
        };
        let _g = first.acquire(caps).unwrap();
        assert!(matches!(
            second.acquire(caps),
            Err(Error::ResourceExhausted(ResourceKind::ActivePatterns))
        ));
        assert_eq!(second.refs(), 0);
        assert_eq!(accounting.active_patterns(), 1);
    }

    #[test]
    fn test_drop_without_destroy_still_frees_program() {
        let engine = Arc::new(CountingEngine::new());
        let accounting = Arc::new(Accounting::new());
        let handle = new_handle(&engine, &accounting);
        drop(handle);
        assert_eq!(engine.destroys(), 1);
    }

    #[test]
    fn test_concurrent_acquire_release() {
        let engine = Arc::new(CountingEngine::new());
        let accounting = Arc::new(Accounting::new());
        let handle = new_handle(&engine, &accounting);

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let handle = handle.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let grant = handle.acquire(limits()).unwrap();
                        assert!(grant.is_match("abc"));
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(handle.refs(), 0);
        assert_eq!(accounting.active_patterns(), 0);
        handle.retire(1);
        assert!(handle.destroy_if_zero());
        assert_eq!(engine.destroys(), 1);
    }
}
