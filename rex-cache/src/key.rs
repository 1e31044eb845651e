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
    fmt,
    hash::{Hash, Hasher},
};

use bytes::Bytes;
use rex_common::fingerprint::fingerprint;

/// Cache key: the exact pattern bytes plus the case flag. No normalization
/// is applied; two byte-wise different spellings of the same regex are two
/// keys.
#[derive(Clone)]
pub struct PatternKey {
    pattern: Bytes,
    case_sensitive: bool,
    fingerprint: u64,
}

impl PatternKey {
    pub fn new(pattern: impl Into<Bytes>, case_sensitive: bool) -> Self {
        let pattern = pattern.into();
        let fingerprint = fingerprint(&pattern, case_sensitive);
        Self {
            pattern,
            case_sensitive,
            fingerprint,
        }
    }

    pub fn pattern(&self) -> &[u8] {
        &self.pattern
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }
}

impl PartialEq for PatternKey {
    fn eq(&self, other: &Self) -> bool {
        self.case_sensitive == other.case_sensitive && self.pattern == other.pattern
    }
}

impl Eq for PatternKey {}

impl Hash for PatternKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write(&self.pattern);
        state.write_u8(self.case_sensitive as u8);
    }
}

// Pattern bytes stay out of logs; Debug shows the fingerprint only.
impl fmt::Debug for PatternKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternKey")
            .field("fingerprint", &format_args!("{:016x}", self.fingerprint))
            .field("len", &self.pattern.len())
            .field("case_sensitive", &self.case_sensitive)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_of(key: &PatternKey) -> u64 {
        let mut hasher = std::hash::DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_key_equality() {
        let a = PatternKey::new(&b"a+b"[..], true);
        let b = PatternKey::new(&b"a+b"[..], true);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_case_flag_distinguishes_keys() {
        let a = PatternKey::new(&b"a+b"[..], true);
        let b = PatternKey::new(&b"a+b"[..], false);
        assert_ne!(a, b);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_debug_hides_pattern_bytes() {
        let key = PatternKey::new(&b"secret-pattern"[..], true);
        let rendered = format!("{key:?}");
        assert!(!rendered.contains("secret-pattern"));
        assert!(rendered.contains(&format!("{:016x}", key.fingerprint())));
    }
}
