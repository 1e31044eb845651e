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

use std::hash::Hasher;

use twox_hash::XxHash64;

const SEED: u64 = 0x5245_5845;

/// Stable 64-bit fingerprint of a pattern and its case flag.
///
/// Log lines and metric labels carry the fingerprint; pattern bytes never
/// leave the caller.
pub fn fingerprint(pattern: &[u8], case_sensitive: bool) -> u64 {
    let mut hasher = XxHash64::with_seed(SEED);
    hasher.write(pattern);
    hasher.write_u8(case_sensitive as u8);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_deterministic() {
        assert_eq!(fingerprint(b"a+b", true), fingerprint(b"a+b", true));
    }

    #[test]
    fn test_fingerprint_depends_on_flag() {
        assert_ne!(fingerprint(b"a+b", true), fingerprint(b"a+b", false));
    }

    #[test]
    fn test_fingerprint_depends_on_pattern() {
        assert_ne!(fingerprint(b"a+b", true), fingerprint(b"a+c", true));
    }
}
