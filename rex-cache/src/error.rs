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

use std::fmt;

use rex_engine::CompileError;
use thiserror::Error;

/// Which configured cap rejected the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    ActivePatterns,
    MatchersPerPattern,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ActivePatterns => write!(f, "active pattern cap"),
            Self::MatchersPerPattern => write!(f, "per-pattern matcher cap"),
        }
    }
}

/// Errors are `Clone` so a single compile failure can be broadcast to every
/// caller blocked on the same key.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The engine rejected the pattern. Carries a bounded excerpt of the
    /// input for the caller; logs only ever see the fingerprint.
    #[error("compile failed: {source} (pattern excerpt: {excerpt:?})")]
    Compile {
        #[source]
        source: CompileError,
        excerpt: String,
    },

    #[error("resource exhausted: {0}")]
    ResourceExhausted(ResourceKind),

    /// An acquire raced a retire. Recovered internally by retrying the miss
    /// path once; surfacing it means the retry failed too.
    #[error("pattern handle poisoned")]
    Poisoned,

    #[error("cache is shutting down")]
    ShuttingDown,

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

const EXCERPT_LEN: usize = 64;

impl Error {
    pub(crate) fn compile(source: CompileError, pattern: &[u8]) -> Self {
        let truncated = &pattern[..pattern.len().min(EXCERPT_LEN)];
        let mut excerpt = String::from_utf8_lossy(truncated).into_owned();
        if pattern.len() > EXCERPT_LEN {
            excerpt.push('…');
        }
        Self::Compile { source, excerpt }
    }
}
