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

//! Test support: instrumented engines for asserting on compile and destroy
//! behavior.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use rex_engine::{Compiled, CompileError, Engine, RegexEngine, RegexProgram};

/// Engine wrapper that counts compiles and destroys and can report every
/// program as dead to drive the revalidation path.
#[derive(Debug)]
pub struct CountingEngine {
    inner: RegexEngine,
    compiles: AtomicUsize,
    destroys: AtomicUsize,
    live: AtomicBool,
}

impl Default for CountingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CountingEngine {
    pub fn new() -> Self {
        Self {
            inner: RegexEngine::new(),
            compiles: AtomicUsize::new(0),
            destroys: AtomicUsize::new(0),
            live: AtomicBool::new(true),
        }
    }

    pub fn compiles(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }

    pub fn destroys(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }

    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::SeqCst);
    }
}

impl Engine for CountingEngine {
    type Program = RegexProgram;

    fn compile(
        &self,
        pattern: &[u8],
        case_sensitive: bool,
    ) -> Result<Compiled<RegexProgram>, CompileError> {
        let compiled = self.inner.compile(pattern, case_sensitive)?;
        self.compiles.fetch_add(1, Ordering::SeqCst);
        Ok(compiled)
    }

    fn is_live(&self, _program: &RegexProgram) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn destroy(&self, program: RegexProgram) {
        self.destroys.fetch_add(1, Ordering::SeqCst);
        self.inner.destroy(program);
    }
}
