//! Memory-mapped index reader and the posting-list evaluator.
//!
//! The reader validates both magics and the trailer before use; everything
//! else is decoded lazily off the map. Posting iterators borrow the map and
//! never copy list data.

use std::fs::File;
use std::path::Path;

use anyhow::{bail, Context, Result};
use memmap2::Mmap;

use super::writer_utils::read_var_u32;
use super::{DIR_ENTRY_SIZE, MAGIC, TRAILER_MAGIC, TRAILER_SIZE};
use crate::query::{Query, QueryOp};
use crate::trigram::Trigram;

#[derive(Debug)]
pub struct IndexReader {
    mmap: Mmap,
    paths: Vec<String>,
    name_off: usize,
    post_off: usize,
    dir_off: usize,
    name_index_off: usize,
    num_names: u32,
    num_trigrams: usize,
}

impl IndexReader {
    /// Open and validate an index file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).with_context(|| format!("open index {}", path.display()))?;
        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("map index {}", path.display()))?;
        Self::from_mmap(mmap).with_context(|| format!("index {}", path.display()))
    }

    fn from_mmap(mmap: Mmap) -> Result<Self> {
        let len = mmap.len();
        if len < MAGIC.len() + TRAILER_SIZE {
            bail!("corrupt index: {} bytes is too small", len);
        }
        if &mmap[..MAGIC.len()] != MAGIC {
            bail!("corrupt index: bad magic");
        }
        if &mmap[len - TRAILER_MAGIC.len()..] != TRAILER_MAGIC {
            bail!("corrupt index: bad trailer magic");
        }

        let trailer_off = len - TRAILER_SIZE;
        let mut offs = [0usize; 5];
        for (i, o) in offs.iter_mut().enumerate() {
            let at = trailer_off + 4 * i;
            *o = u32::from_be_bytes(mmap[at..at + 4].try_into().unwrap()) as usize;
        }
        let [path_off, name_off, post_off, dir_off, name_index_off] = offs;

        if path_off != MAGIC.len() {
            bail!("corrupt index: path table offset {}", path_off);
        }
        let mut prev = path_off;
        for off in [name_off, post_off, dir_off, name_index_off, trailer_off] {
            if off < prev || off > len {
                bail!("corrupt index: section offset {} out of order", off);
            }
            prev = off;
        }
        if (trailer_off - name_index_off) % 4 != 0 {
            bail!("corrupt index: name index length not a multiple of 4");
        }
        if (name_index_off - dir_off) % DIR_ENTRY_SIZE != 0 {
            bail!("corrupt index: trigram directory length not a multiple of {}", DIR_ENTRY_SIZE);
        }
        let num_names = ((trailer_off - name_index_off) / 4) as u32;
        let num_trigrams = (name_index_off - dir_off) / DIR_ENTRY_SIZE;

        let paths = parse_string_table(&mmap[path_off..name_off])
            .context("corrupt index: path table")?;

        Ok(Self {
            mmap,
            paths,
            name_off,
            post_off,
            dir_off,
            name_index_off,
            num_names,
            num_trigrams,
        })
    }

    /// The indexed root paths.
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn num_names(&self) -> u32 {
        self.num_names
    }

    pub fn num_trigrams(&self) -> usize {
        self.num_trigrams
    }

    /// The file name for a file-id, borrowed from the map.
    pub fn name(&self, file_id: u32) -> Result<&str> {
        if file_id >= self.num_names {
            bail!("file id {} out of range ({} names)", file_id, self.num_names);
        }
        let at = self.name_index_off + 4 * file_id as usize;
        let off = u32::from_be_bytes(self.mmap[at..at + 4].try_into().unwrap()) as usize;
        let table = &self.mmap[self.name_off..self.post_off];
        if off >= table.len() {
            bail!("corrupt index: name offset {} out of range", off);
        }
        let rest = &table[off..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .context("corrupt index: unterminated name")?;
        std::str::from_utf8(&rest[..end]).context("corrupt index: name is not valid UTF-8")
    }

    pub(crate) fn dir_entry(&self, i: usize) -> (Trigram, u32, u64) {
        let at = self.dir_off + i * DIR_ENTRY_SIZE;
        let rec = &self.mmap[at..at + DIR_ENTRY_SIZE];
        let t = (rec[0] as u32) << 16 | (rec[1] as u32) << 8 | rec[2] as u32;
        let count = u32::from_be_bytes(rec[4..8].try_into().unwrap());
        let off = u64::from_be_bytes(rec[8..16].try_into().unwrap());
        (t, count, off)
    }

    fn find_trigram(&self, t: Trigram) -> Option<(usize, u32, u64)> {
        let (mut lo, mut hi) = (0usize, self.num_trigrams);
        while lo < hi {
            let mid = (lo + hi) / 2;
            let (mt, count, off) = self.dir_entry(mid);
            match mt.cmp(&t) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Some((mid, count, off)),
            }
        }
        None
    }

    /// Number of files containing `t` (0 when absent).
    pub fn trigram_count(&self, t: Trigram) -> u32 {
        self.find_trigram(t).map_or(0, |(_, count, _)| count)
    }

    /// Lazy iteration over the posting list of `t`, ascending file-ids.
    /// Unknown trigrams yield an empty iterator; corrupt list data surfaces
    /// as an `Err` item.
    pub fn posting(&self, t: Trigram) -> PostingIter<'_> {
        let section_len = (self.dir_off - self.post_off) as u64;
        match self.find_trigram(t) {
            None => PostingIter::empty(),
            Some((i, count, off)) => {
                let end = if i + 1 < self.num_trigrams {
                    self.dir_entry(i + 1).2
                } else {
                    section_len
                };
                if off > end || end > section_len {
                    // Invalid range: surface the corruption on first use.
                    return PostingIter {
                        data: &[],
                        off: 0,
                        remaining: count,
                        prev: 0,
                        first: true,
                    };
                }
                PostingIter {
                    data: &self.mmap[self.post_off + off as usize..self.post_off + end as usize],
                    off: 0,
                    remaining: count,
                    prev: 0,
                    first: true,
                }
            }
        }
    }

    /// The posting list of `t`, materialized.
    pub fn posting_list(&self, t: Trigram) -> Result<Vec<u32>> {
        self.posting(t).collect()
    }

    /// Evaluate a trigram query, producing the sorted candidate file-ids.
    pub fn posting_query(&self, q: &Query) -> Result<Vec<u32>> {
        match q.op {
            QueryOp::All => Ok((0..self.num_names).collect()),
            QueryOp::None => Ok(Vec::new()),
            QueryOp::And => {
                // Intersect cheapest posting lists first.
                let mut tris: Vec<(u32, Trigram)> = q
                    .trigram
                    .iter()
                    .map(|&t| (self.trigram_count(t), t))
                    .collect();
                tris.sort_unstable();

                let mut result: Option<Vec<u32>> = None;
                for (count, t) in tris {
                    if count == 0 {
                        return Ok(Vec::new());
                    }
                    result = Some(match result {
                        None => self.posting_list(t)?,
                        Some(have) => intersect_iter(have, self.posting(t))?,
                    });
                    if result.as_ref().is_some_and(Vec::is_empty) {
                        return Ok(Vec::new());
                    }
                }

                let mut subs: Vec<&Query> = q.sub.iter().collect();
                subs.sort_by_key(|s| self.estimate(s));
                for s in subs {
                    let list = self.posting_query(s)?;
                    result = Some(match result {
                        None => list,
                        Some(have) => intersect_sorted(&have, &list),
                    });
                    if result.as_ref().is_some_and(Vec::is_empty) {
                        return Ok(Vec::new());
                    }
                }

                Ok(result.unwrap_or_else(|| (0..self.num_names).collect()))
            }
            QueryOp::Or => {
                let mut result: Vec<u32> = Vec::new();
                for &t in &q.trigram {
                    result = union_sorted(result, self.posting_list(t)?);
                }
                for s in &q.sub {
                    result = union_sorted(result, self.posting_query(s)?);
                }
                Ok(result)
            }
        }
    }

    /// Rough candidate-count estimate used to order AND operands.
    fn estimate(&self, q: &Query) -> u64 {
        match q.op {
            QueryOp::None => 0,
            QueryOp::All => self.num_names as u64,
            QueryOp::And => {
                let mut est = q
                    .trigram
                    .iter()
                    .map(|&t| self.trigram_count(t) as u64)
                    .min()
                    .unwrap_or(self.num_names as u64);
                for s in &q.sub {
                    est = est.min(self.estimate(s));
                }
                est
            }
            QueryOp::Or => {
                let mut est: u64 = q
                    .trigram
                    .iter()
                    .map(|&t| self.trigram_count(t) as u64)
                    .sum();
                for s in &q.sub {
                    est = est.saturating_add(self.estimate(s));
                }
                est.min(self.num_names as u64)
            }
        }
    }
}

fn parse_string_table(data: &[u8]) -> Result<Vec<String>> {
    let mut out = Vec::new();
    let mut pos = 0;
    loop {
        let end = data[pos..]
            .iter()
            .position(|&b| b == 0)
            .context("unterminated entry")?
            + pos;
        if end == pos {
            return Ok(out); // empty name terminates the table
        }
        out.push(
            std::str::from_utf8(&data[pos..end])
                .context("entry is not valid UTF-8")?
                .to_string(),
        );
        pos = end + 1;
    }
}

/// Lazy decoder for one delta-encoded posting list.
pub struct PostingIter<'a> {
    data: &'a [u8],
    off: usize,
    remaining: u32,
    prev: u32,
    first: bool,
}

impl PostingIter<'_> {
    fn empty() -> PostingIter<'static> {
        PostingIter {
            data: &[],
            off: 0,
            remaining: 0,
            prev: 0,
            first: true,
        }
    }
}

impl Iterator for PostingIter<'_> {
    type Item = Result<u32>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let delta = match read_var_u32(self.data, &mut self.off) {
            Ok(d) => d,
            Err(e) => {
                self.remaining = 0;
                return Some(Err(e));
            }
        };
        let id = if self.first {
            delta
        } else {
            if delta == 0 {
                self.remaining = 0;
                return Some(Err(anyhow::anyhow!(
                    "corrupt index: posting list not strictly increasing"
                )));
            }
            match self.prev.checked_add(delta) {
                Some(id) => id,
                None => {
                    self.remaining = 0;
                    return Some(Err(anyhow::anyhow!("corrupt index: file id overflow")));
                }
            }
        };
        self.first = false;
        self.prev = id;
        self.remaining -= 1;
        Some(Ok(id))
    }
}

/// Intersect a sorted list with a posting iterator.
fn intersect_iter(have: Vec<u32>, iter: PostingIter<'_>) -> Result<Vec<u32>> {
    let mut out = Vec::new();
    let mut i = 0;
    for id in iter {
        let id = id?;
        while i < have.len() && have[i] < id {
            i += 1;
        }
        if i >= have.len() {
            break;
        }
        if have[i] == id {
            out.push(id);
            i += 1;
        }
    }
    Ok(out)
}

fn intersect_sorted(a: &[u32], b: &[u32]) -> Vec<u32> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
        }
    }
    out
}

fn union_sorted(a: Vec<u32>, b: Vec<u32>) -> Vec<u32> {
    if a.is_empty() {
        return b;
    }
    if b.is_empty() {
        return a;
    }
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
            std::cmp::Ordering::Less => {
                out.push(a[i]);
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                out.push(b[j]);
                j += 1;
            }
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}
