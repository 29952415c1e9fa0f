// Copyright 2025 CSearch-RS Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! On-disk index: format constants, writer, reader, and merger.
//!
//! Layout of an index file (all integers big-endian):
//!
//! ```text
//! "csearch index 1\n"
//! path table      NUL-terminated root paths, then an empty name
//! name table      NUL-terminated file names, then an empty name
//! posting data    per trigram: count file-ids as delta-encoded varints
//! trigram dir     16 bytes per trigram, sorted:
//!                 trigram u24 | pad u8 | count u32 | posting offset u64
//! name index      num_names x u32 offsets into the name table
//! trailer         5 x u32 section offsets, "\ncsearch trailr\n"
//! ```

use std::path::PathBuf;

pub mod merge;
pub mod reader;
pub mod writer;
pub(crate) mod writer_utils;

pub use merge::merge;
pub use reader::{IndexReader, PostingIter};
pub use writer::{IndexOptions, IndexWriter};

pub const MAGIC: &[u8; 16] = b"csearch index 1\n";
pub const TRAILER_MAGIC: &[u8; 16] = b"\ncsearch trailr\n";

/// Bytes per trigram-directory record.
pub const DIR_ENTRY_SIZE: usize = 16;

/// Trailer: five section offsets plus the end magic.
pub const TRAILER_SIZE: usize = 5 * 4 + TRAILER_MAGIC.len();

/// The index file consulted when no explicit path is given:
/// `$CSEARCHINDEX`, else `$HOME/.csearchindex`.
pub fn default_index_path() -> PathBuf {
    if let Some(p) = std::env::var_os("CSEARCHINDEX") {
        if !p.is_empty() {
            return PathBuf::from(p);
        }
    }
    let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
    home.join(".csearchindex")
}

/// Whether `name` lies within the tree rooted at `root`.
pub(crate) fn file_is_under(root: &str, name: &str) -> bool {
    if !name.starts_with(root) {
        return false;
    }
    name.len() == root.len()
        || root.ends_with('/')
        || name.as_bytes()[root.len()] == b'/'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn under_checks_path_boundaries() {
        assert!(file_is_under("/src", "/src/a.rs"));
        assert!(file_is_under("/src", "/src"));
        assert!(file_is_under("/", "/anything"));
        assert!(!file_is_under("/src", "/srcdir/a.rs"));
        assert!(!file_is_under("/src/a", "/src"));
    }
}
