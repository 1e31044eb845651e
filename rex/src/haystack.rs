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

use std::slice;

/// Match input: either borrowed heap bytes or a caller-addressed byte range
/// outside the managed heap.
///
/// The raw-range constructor is the zero-copy boundary of the library; once
/// a `Haystack` exists, matching never copies the input.
#[derive(Debug, Clone, Copy)]
pub struct Haystack<'a> {
    bytes: &'a [u8],
}

impl<'a> Haystack<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// View `len` bytes at `addr`.
    ///
    /// # Safety
    ///
    /// `addr` must point to `len` initialized bytes that stay valid and
    /// unmodified for the lifetime `'a`.
    pub unsafe fn from_raw_parts(addr: usize, len: usize) -> Self {
        Self {
            bytes: unsafe { slice::from_raw_parts(addr as *const u8, len) },
        }
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl<'a> From<&'a [u8]> for Haystack<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Self::new(bytes)
    }
}

impl<'a> From<&'a str> for Haystack<'a> {
    fn from(s: &'a str) -> Self {
        Self::new(s.as_bytes())
    }
}

impl AsRef<[u8]> for Haystack<'_> {
    fn as_ref(&self) -> &[u8] {
        self.bytes
    }
}
