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

//! The engine capability contract consumed by the pattern cache, plus its
//! default implementation over a linear-time automaton library.
//!
//! The cache treats compilation, matching, and destruction as opaque
//! operations; everything it needs to know about an engine is expressed by
//! [`Engine`] and [`Program`].

mod regex;

use std::ops::Range;

use thiserror::Error;

pub use crate::regex::{RegexEngine, RegexProgram};

/// Byte span of a match within a haystack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }
}

impl From<Span> for Range<usize> {
    fn from(span: Span) -> Self {
        span.range()
    }
}

/// Why a pattern failed to compile. The cache façade surfaces the kind to
/// callers unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorKind {
    /// The pattern is not valid syntax.
    Syntax,
    /// The compiled program would exceed the engine's size limit.
    TooLarge,
    /// The pattern bytes are not valid for the engine's expected encoding.
    InvalidEncoding,
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub message: String,
}

impl CompileError {
    pub fn new(kind: CompileErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// A compiled program and its exact byte footprint at compile time.
#[derive(Debug)]
pub struct Compiled<P> {
    pub program: P,
    pub footprint: usize,
}

/// Matching operations over one compiled program.
///
/// Every operation must be safe to call concurrently on a shared program
/// from any number of threads.
pub trait Program: Send + Sync + 'static {
    /// Whether the pattern matches anywhere in the haystack.
    fn is_match(&self, haystack: &[u8]) -> bool;

    /// Whether the pattern matches the entire haystack.
    fn full_match(&self, haystack: &[u8]) -> bool;

    /// Leftmost match, if any.
    fn find(&self, haystack: &[u8]) -> Option<Span>;

    /// Spans of every capture group for the leftmost match, index 0 being
    /// the whole match. `None` when the haystack does not match.
    fn captures(&self, haystack: &[u8]) -> Option<Vec<Option<Span>>>;

    /// Every non-overlapping match, leftmost first.
    fn find_all(&self, haystack: &[u8]) -> Vec<Span>;

    /// Replace the leftmost match, or `None` when nothing matched. The
    /// replacement may reference capture groups as `$n` or `${name}`.
    fn replace_first(&self, haystack: &[u8], replacement: &[u8]) -> Option<Vec<u8>>;

    /// Replace every match, returning the rewritten haystack and the number
    /// of replacements made.
    fn replace_all(&self, haystack: &[u8], replacement: &[u8]) -> (Vec<u8>, usize);
}

/// Compilation and lifecycle of programs.
///
/// `compile` must be thread-safe and reentrant. `destroy` is called exactly
/// once per program and never races a matching operation; the cache's
/// refcount discipline orders it after the last use.
pub trait Engine: Send + Sync + 'static {
    type Program: Program;

    fn compile(
        &self,
        pattern: &[u8],
        case_sensitive: bool,
    ) -> Result<Compiled<Self::Program>, CompileError>;

    /// Whether a cached program is still usable. The cache revalidates hits
    /// against this when configured to.
    fn is_live(&self, program: &Self::Program) -> bool {
        let _ = program;
        true
    }

    /// Tear the program down.
    fn destroy(&self, program: Self::Program) {
        drop(program);
    }
}
