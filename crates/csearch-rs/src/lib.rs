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

//! Trigram-indexed regexp search over source trees.
//!
//! `cs-index` builds an on-disk inverted index keyed by the 3-byte
//! substrings (trigrams) of every indexed file; `cs-search` turns a regexp
//! into a boolean trigram query, evaluates it against the index to get a
//! small candidate set, and greps only those files.
//!
//! The pipeline, in library terms:
//!
//! - [`index::IndexWriter`] ingests files and writes the index;
//! - [`index::IndexReader`] memory-maps a finalized index;
//! - [`regex_analyze::regexp_query`] plans a [`query::Query`] from a parsed
//!   regexp;
//! - [`index::IndexReader::posting_query`] evaluates it to candidate
//!   file-ids;
//! - [`grep::Grep`] re-reads the candidates and prints matching lines;
//! - [`index::merge`] combines two indexes without rereading file content.

pub mod grep;
pub mod index;
pub mod query;
pub mod regex_analyze;
pub mod trigram;

pub use grep::{Grep, GrepOptions};
pub use index::{default_index_path, merge, IndexOptions, IndexReader, IndexWriter};
pub use query::{Query, QueryOp};
pub use regex_analyze::regexp_query;
pub use trigram::{trigrams_of, TextOptions, Trigram};
