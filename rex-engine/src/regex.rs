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

use regex_automata::{
    meta,
    util::{captures::Captures, interpolate, syntax},
    Anchored, Input, PatternID,
};

use crate::{Compiled, CompileError, CompileErrorKind, Engine, Program, Span};

/// A pattern compiled for searching plus an end-anchored sibling used for
/// whole-haystack matching. The anchored variant is required for
/// correctness: leftmost-first search may report a shorter alternative even
/// when a full-length match exists.
#[derive(Debug)]
pub struct RegexProgram {
    search: meta::Regex,
    full: meta::Regex,
}

/// Linear-time engine over `regex-automata`'s meta regex.
///
/// Patterns must be valid UTF-8; haystacks may be arbitrary bytes. The
/// reported footprint is the exact heap usage of both sibling programs.
#[derive(Debug, Default)]
pub struct RegexEngine;

impl RegexEngine {
    pub fn new() -> Self {
        Self
    }

    fn build(pattern: &str, case_sensitive: bool) -> Result<meta::Regex, CompileError> {
        meta::Regex::builder()
            .syntax(
                syntax::Config::new()
                    .case_insensitive(!case_sensitive)
                    .utf8(false),
            )
            .configure(meta::Regex::config().utf8_empty(false))
            .build(pattern)
            .map_err(|err| {
                let kind = if err.size_limit().is_some() {
                    CompileErrorKind::TooLarge
                } else {
                    CompileErrorKind::Syntax
                };
                CompileError::new(kind, err.to_string())
            })
    }
}

impl Engine for RegexEngine {
    type Program = RegexProgram;

    fn compile(
        &self,
        pattern: &[u8],
        case_sensitive: bool,
    ) -> Result<Compiled<RegexProgram>, CompileError> {
        let pattern = std::str::from_utf8(pattern).map_err(|err| {
            CompileError::new(CompileErrorKind::InvalidEncoding, err.to_string())
        })?;
        let search = Self::build(pattern, case_sensitive)?;
        let full = Self::build(&format!("(?:{pattern})\\z"), case_sensitive)?;
        let footprint =
            std::mem::size_of::<RegexProgram>() + search.memory_usage() + full.memory_usage();
        Ok(Compiled {
            program: RegexProgram { search, full },
            footprint,
        })
    }
}

impl Program for RegexProgram {
    fn is_match(&self, haystack: &[u8]) -> bool {
        self.search.is_match(haystack)
    }

    fn full_match(&self, haystack: &[u8]) -> bool {
        self.full
            .is_match(Input::new(haystack).anchored(Anchored::Yes))
    }

    fn find(&self, haystack: &[u8]) -> Option<Span> {
        self.search.find(haystack).map(|m| Span {
            start: m.start(),
            end: m.end(),
        })
    }

    fn captures(&self, haystack: &[u8]) -> Option<Vec<Option<Span>>> {
        let mut caps = self.search.create_captures();
        self.search.captures(haystack, &mut caps);
        if !caps.is_match() {
            return None;
        }
        let groups = caps.group_info().group_len(PatternID::ZERO);
        Some(
            (0..groups)
                .map(|index| {
                    caps.get_group(index).map(|span| Span {
                        start: span.start,
                        end: span.end,
                    })
                })
                .collect(),
        )
    }

    fn find_all(&self, haystack: &[u8]) -> Vec<Span> {
        self.search
            .find_iter(haystack)
            .map(|m| Span {
                start: m.start(),
                end: m.end(),
            })
            .collect()
    }

    fn replace_first(&self, haystack: &[u8], replacement: &[u8]) -> Option<Vec<u8>> {
        let mut caps = self.search.create_captures();
        self.search.captures(haystack, &mut caps);
        let m = caps.get_match()?;
        let mut out = Vec::with_capacity(haystack.len());
        out.extend_from_slice(&haystack[..m.start()]);
        append_replacement(&caps, haystack, replacement, &mut out);
        out.extend_from_slice(&haystack[m.end()..]);
        Some(out)
    }

    fn replace_all(&self, haystack: &[u8], replacement: &[u8]) -> (Vec<u8>, usize) {
        let mut out = Vec::with_capacity(haystack.len());
        let mut last = 0;
        let mut count = 0;
        for caps in self.search.captures_iter(haystack) {
            let m = match caps.get_match() {
                Some(m) => m,
                None => continue,
            };
            out.extend_from_slice(&haystack[last..m.start()]);
            append_replacement(&caps, haystack, replacement, &mut out);
            last = m.end();
            count += 1;
        }
        out.extend_from_slice(&haystack[last..]);
        (out, count)
    }
}

/// Expand `$n` / `${name}` references in the replacement against the capture
/// spans of the current match.
fn append_replacement(caps: &Captures, haystack: &[u8], replacement: &[u8], dst: &mut Vec<u8>) {
    interpolate::bytes(
        replacement,
        |index, dst| {
            if let Some(span) = caps.get_group(index) {
                dst.extend_from_slice(&haystack[span.start..span.end]);
            }
        },
        |name| caps.group_info().to_index(PatternID::ZERO, name),
        dst,
    );
}
