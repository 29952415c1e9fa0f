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

//! Merge two finalized indexes into a new one.
//!
//! The right-hand index supersedes the left: left files that live under any
//! right root (or under an explicitly dropped root) are discarded, file-ids
//! are renumbered left-then-right, and posting lists are stream-merged per
//! trigram under that translation. File content is never reread.

use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use super::reader::IndexReader;
use super::writer::CountingWriter;
use super::writer_utils::write_var_u32;
use super::{file_is_under, DIR_ENTRY_SIZE, MAGIC, TRAILER_MAGIC};
use crate::trigram::{trigram_bytes, Trigram};

/// Write the merge of `left` and `right` to `dst`, dropping left-side files
/// under any root in `drop_roots`. `dst` is replaced atomically.
pub fn merge(
    dst: impl AsRef<Path>,
    left: &IndexReader,
    right: &IndexReader,
    drop_roots: &[String],
) -> Result<()> {
    let dst = dst.as_ref();

    // Merged root list: left roots that survive the drop filter, plus all
    // right roots, sorted and deduplicated.
    let mut roots: Vec<String> = left
        .paths()
        .iter()
        .filter(|p| !drop_roots.iter().any(|d| file_is_under(d, p)))
        .cloned()
        .collect();
    roots.extend(right.paths().iter().cloned());
    roots.sort();
    roots.dedup();

    // Renumber names: surviving left files first, then every right file.
    let mut name_data = BufWriter::new(tempfile::tempfile().context("create name scratch")?);
    let mut name_index: Vec<u32> = Vec::new();
    let mut name_data_len: u32 = 0;
    let mut push_name = |name: &str, name_index: &mut Vec<u32>| -> Result<()> {
        name_index.push(name_data_len);
        name_data.write_all(name.as_bytes())?;
        name_data.write_all(&[0])?;
        name_data_len = name_data_len
            .checked_add(name.len() as u32 + 1)
            .context("name table exceeds 4 GiB")?;
        Ok(())
    };

    let mut left_map: Vec<Option<u32>> = Vec::with_capacity(left.num_names() as usize);
    let mut next_id: u32 = 0;
    for id in 0..left.num_names() {
        let name = left.name(id)?;
        let dropped = drop_roots.iter().any(|d| file_is_under(d, name))
            || right.paths().iter().any(|r| file_is_under(r, name));
        if dropped {
            left_map.push(None);
        } else {
            push_name(name, &mut name_index)?;
            left_map.push(Some(next_id));
            next_id += 1;
        }
    }
    let right_base = next_id;
    for id in 0..right.num_names() {
        push_name(right.name(id)?, &mut name_index)?;
    }

    // Assemble the output.
    let parent = dst
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let tmp = tempfile::NamedTempFile::new_in(&parent)
        .with_context(|| format!("create temporary index in {}", parent.display()))?;
    let mut out = CountingWriter::new(BufWriter::new(tmp.as_file().try_clone()?));

    out.write_all(MAGIC)?;

    let path_off = out.pos;
    for p in &roots {
        out.write_all(p.as_bytes())?;
        out.write_all(&[0])?;
    }
    out.write_all(&[0])?;

    let name_off = out.pos;
    let mut name_file = name_data
        .into_inner()
        .map_err(|e| e.into_error())
        .context("flush name scratch")?;
    name_file.seek(SeekFrom::Start(0))?;
    io::copy(&mut name_file, &mut out)?;
    out.write_all(&[0])?;

    // Stream-merge posting lists in directory (= trigram) order.
    let post_off = out.pos;
    let mut dir: Vec<(Trigram, u32, u64)> = Vec::new();
    let (mut i, mut j) = (0usize, 0usize);
    while i < left.num_trigrams() || j < right.num_trigrams() {
        let lt = (i < left.num_trigrams()).then(|| left.dir_entry(i).0);
        let rt = (j < right.num_trigrams()).then(|| right.dir_entry(j).0);
        let t = match (lt, rt) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => unreachable!(),
        };

        let offset = out.pos - post_off;
        let mut count: u32 = 0;
        let mut prev: u32 = 0;

        if lt == Some(t) {
            for id in left.posting(t) {
                let id = id?;
                let mapped = match left_map.get(id as usize) {
                    Some(m) => *m,
                    None => bail!("corrupt index: file id {} out of range in merge", id),
                };
                if let Some(new_id) = mapped {
                    let delta = if count == 0 { new_id } else { new_id - prev };
                    write_var_u32(&mut out, delta)?;
                    prev = new_id;
                    count += 1;
                }
            }
            i += 1;
        }
        if rt == Some(t) {
            for id in right.posting(t) {
                let new_id = right_base + id?;
                let delta = if count == 0 { new_id } else { new_id - prev };
                write_var_u32(&mut out, delta)?;
                prev = new_id;
                count += 1;
            }
            j += 1;
        }

        if count > 0 {
            dir.push((t, count, offset));
        }
    }

    let dir_off = out.pos;
    for &(t, count, offset) in &dir {
        let mut rec = [0u8; DIR_ENTRY_SIZE];
        rec[0..3].copy_from_slice(&trigram_bytes(t));
        rec[4..8].copy_from_slice(&count.to_be_bytes());
        rec[8..16].copy_from_slice(&offset.to_be_bytes());
        out.write_all(&rec)?;
    }

    let name_index_off = out.pos;
    for &off in &name_index {
        out.write_all(&off.to_be_bytes())?;
    }

    for off in [path_off, name_off, post_off, dir_off, name_index_off] {
        let off32 = u32::try_from(off).context("index exceeds 4 GiB")?;
        out.write_all(&off32.to_be_bytes())?;
    }
    out.write_all(TRAILER_MAGIC)?;
    out.flush()?;

    log::info!(
        "merged index: {} names, {} trigrams",
        name_index.len(),
        dir.len()
    );

    tmp.persist(dst)
        .with_context(|| format!("rename merged index into {}", dst.display()))?;
    Ok(())
}
