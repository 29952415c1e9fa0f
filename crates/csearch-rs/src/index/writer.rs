//! Index writer: streams files in, spills sorted posting runs to a scratch
//! file when the in-memory buffer fills, and merges the runs into the final
//! posting section at flush time. The finished index is written through a
//! temporary file and renamed into place, so a crash never leaves a partial
//! index at the destination.

use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use memmap2::Mmap;
use rayon::slice::ParallelSliceMut;

use super::writer_utils::{write_var_u32, PostEntry};
use super::{DIR_ENTRY_SIZE, MAGIC, TRAILER_MAGIC};
use crate::trigram::{self, Scan, TextOptions, Trigram};

/// In-memory posting buffer budget, in bytes (each entry is 8 bytes).
const DEFAULT_POST_BUFFER_BYTES: usize = 1 << 30;

#[derive(Debug, Clone, Copy)]
pub struct IndexOptions {
    /// Skip files longer than this many bytes.
    pub max_file_len: u64,
    /// Text heuristic tunables.
    pub text: TextOptions,
    /// Report skipped files at warn level instead of debug.
    pub log_skip: bool,
    /// Posting buffer budget in bytes before a run is spilled to scratch.
    pub post_buffer_bytes: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            max_file_len: 1 << 30,
            text: TextOptions::default(),
            log_skip: false,
            post_buffer_bytes: DEFAULT_POST_BUFFER_BYTES,
        }
    }
}

pub struct IndexWriter {
    dest: PathBuf,
    opts: IndexOptions,
    paths: Vec<String>,
    name_data: BufWriter<File>,
    name_data_len: u32,
    name_index: Vec<u32>,
    post: Vec<PostEntry>,
    post_cap: usize,
    scratch: BufWriter<File>,
    scratch_len: u64,
    run_ends: Vec<u64>,
}

impl IndexWriter {
    pub fn create(dest: impl AsRef<Path>) -> Result<Self> {
        Self::with_options(dest, IndexOptions::default())
    }

    pub fn with_options(dest: impl AsRef<Path>, opts: IndexOptions) -> Result<Self> {
        let post_cap = (opts.post_buffer_bytes / 8).max(16);
        Ok(Self {
            dest: dest.as_ref().to_path_buf(),
            opts,
            paths: Vec::new(),
            name_data: BufWriter::new(tempfile::tempfile().context("create name scratch")?),
            name_data_len: 0,
            name_index: Vec::new(),
            post: Vec::with_capacity(post_cap.min(1 << 20)),
            post_cap,
            scratch: BufWriter::new(tempfile::tempfile().context("create posting scratch")?),
            scratch_len: 0,
            run_ends: Vec::new(),
        })
    }

    /// Record root paths. Kept sorted and deduplicated.
    pub fn add_paths<I, S>(&mut self, roots: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paths.extend(roots.into_iter().map(Into::into));
        self.paths.sort();
        self.paths.dedup();
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn num_names(&self) -> u32 {
        self.name_index.len() as u32
    }

    /// Index one file. A file that cannot be read or fails the text
    /// heuristic is dropped; only the index itself failing is an error.
    pub fn add_file(&mut self, path: &Path) -> Result<()> {
        let name = path.to_string_lossy().into_owned();

        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                self.log_skip(&name, &format!("{}", e));
                return Ok(());
            }
        };
        let len = match file.metadata() {
            Ok(m) => m.len(),
            Err(e) => {
                self.log_skip(&name, &format!("{}", e));
                return Ok(());
            }
        };
        if len > self.opts.max_file_len {
            self.log_skip(&name, &format!("longer than {} bytes", self.opts.max_file_len));
            return Ok(());
        }

        let trigrams = match trigram::scan(file, &self.opts.text) {
            Ok(Scan::Text(t)) => t,
            Ok(Scan::Skip(reason)) => {
                self.log_skip(&name, &reason.to_string());
                return Ok(());
            }
            Err(e) => {
                self.log_skip(&name, &format!("{}", e));
                return Ok(());
            }
        };

        let id = self.add_name(&name)?;
        for t in trigrams {
            if self.post.len() >= self.post_cap {
                self.flush_post()?;
            }
            self.post.push(PostEntry::new(t, id));
        }
        Ok(())
    }

    fn log_skip(&self, name: &str, why: &str) {
        if self.opts.log_skip {
            log::warn!("{}: skipped, {}", name, why);
        } else {
            log::debug!("{}: skipped, {}", name, why);
        }
    }

    fn add_name(&mut self, name: &str) -> Result<u32> {
        if name.as_bytes().contains(&0) {
            bail!("file name contains NUL: {:?}", name);
        }
        let id = self.name_index.len() as u32;
        self.name_index.push(self.name_data_len);
        self.name_data.write_all(name.as_bytes())?;
        self.name_data.write_all(&[0])?;
        self.name_data_len = self
            .name_data_len
            .checked_add(name.len() as u32 + 1)
            .context("name table exceeds 4 GiB")?;
        Ok(id)
    }

    /// Spill the in-memory posting buffer as one sorted run.
    fn flush_post(&mut self) -> Result<()> {
        if self.post.is_empty() {
            return Ok(());
        }
        self.post.par_sort_unstable();
        self.post.dedup();
        log::debug!("spilling posting run: {} entries", self.post.len());
        for e in &self.post {
            self.scratch.write_all(&e.to_u64().to_be_bytes())?;
        }
        self.scratch_len += self.post.len() as u64 * 8;
        self.run_ends.push(self.scratch_len);
        self.post.clear();
        Ok(())
    }

    /// Write all sections and atomically move the index into place.
    pub fn flush(mut self) -> Result<()> {
        self.flush_post()?;

        let parent = self
            .dest
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let tmp = tempfile::NamedTempFile::new_in(&parent)
            .with_context(|| format!("create temporary index in {}", parent.display()))?;
        let mut out = CountingWriter::new(BufWriter::new(tmp.as_file().try_clone()?));

        out.write_all(MAGIC)?;

        // Path table.
        let path_off = out.pos;
        for p in &self.paths {
            if p.as_bytes().contains(&0) {
                bail!("root path contains NUL: {:?}", p);
            }
            out.write_all(p.as_bytes())?;
            out.write_all(&[0])?;
        }
        out.write_all(&[0])?;

        // Name table, streamed from scratch.
        let name_off = out.pos;
        let mut name_file = self
            .name_data
            .into_inner()
            .map_err(|e| e.into_error())
            .context("flush name scratch")?;
        name_file.seek(SeekFrom::Start(0))?;
        io::copy(&mut name_file, &mut out)?;
        out.write_all(&[0])?;

        // Posting data: merge the sorted runs.
        let post_off = out.pos;
        let scratch_file = self
            .scratch
            .into_inner()
            .map_err(|e| e.into_error())
            .context("flush posting scratch")?;
        let dir = merge_runs(scratch_file, &self.run_ends, &mut out)?;

        // Trigram directory.
        let dir_off = out.pos;
        for e in &dir {
            let mut rec = [0u8; DIR_ENTRY_SIZE];
            rec[0..3].copy_from_slice(&crate::trigram::trigram_bytes(e.trigram));
            rec[4..8].copy_from_slice(&e.count.to_be_bytes());
            rec[8..16].copy_from_slice(&e.offset.to_be_bytes());
            out.write_all(&rec)?;
        }

        // Name index.
        let name_index_off = out.pos;
        for &off in &self.name_index {
            out.write_all(&off.to_be_bytes())?;
        }

        // Trailer.
        for off in [path_off, name_off, post_off, dir_off, name_index_off] {
            let off32 = u32::try_from(off).context("index exceeds 4 GiB")?;
            out.write_all(&off32.to_be_bytes())?;
        }
        out.write_all(TRAILER_MAGIC)?;
        out.flush()?;

        log::info!(
            "wrote index: {} names, {} trigrams, {} bytes",
            self.name_index.len(),
            dir.len(),
            out.pos
        );

        tmp.persist(&self.dest)
            .with_context(|| format!("rename index into {}", self.dest.display()))?;
        Ok(())
    }
}

pub(crate) struct DirEntry {
    pub(crate) trigram: Trigram,
    pub(crate) count: u32,
    pub(crate) offset: u64,
}

/// Streaming multiway merge of sorted posting runs. Emits delta-encoded
/// posting lists to `out` and returns the directory entries, offsets
/// relative to the start of the posting section.
fn merge_runs<W: Write>(
    mut scratch: File,
    run_ends: &[u64],
    out: &mut CountingWriter<W>,
) -> Result<Vec<DirEntry>> {
    let section_start = out.pos;
    let mut dir: Vec<DirEntry> = Vec::new();
    if run_ends.is_empty() {
        return Ok(dir);
    }
    scratch.flush().ok();
    let mmap = unsafe { Mmap::map(&scratch).context("map posting scratch")? };

    let mut runs: Vec<RunReader> = Vec::with_capacity(run_ends.len());
    let mut start = 0u64;
    for &end in run_ends {
        runs.push(RunReader {
            data: &mmap[start as usize..end as usize],
            pos: 0,
        });
        start = end;
    }

    let mut heap: BinaryHeap<std::cmp::Reverse<(PostEntry, usize)>> = BinaryHeap::new();
    for (i, r) in runs.iter_mut().enumerate() {
        if let Some(e) = r.next() {
            heap.push(std::cmp::Reverse((e, i)));
        }
    }

    let mut cur: Option<(Trigram, u64, u32, u32)> = None; // (trigram, offset, count, prev id)
    while let Some(std::cmp::Reverse((entry, run_idx))) = heap.pop() {
        if let Some(e) = runs[run_idx].next() {
            heap.push(std::cmp::Reverse((e, run_idx)));
        }

        let (t, id) = (entry.trigram(), entry.file_id());
        match cur.as_mut() {
            Some((ct, _, count, prev)) if *ct == t => {
                if id == *prev {
                    continue; // duplicate across runs
                }
                write_var_u32(out, id - *prev)?;
                *prev = id;
                *count += 1;
            }
            _ => {
                if let Some((ct, off, count, _)) = cur.take() {
                    dir.push(DirEntry {
                        trigram: ct,
                        count,
                        offset: off,
                    });
                }
                let off = out.pos - section_start;
                write_var_u32(out, id)?;
                cur = Some((t, off, 1, id));
            }
        }
    }
    if let Some((ct, off, count, _)) = cur.take() {
        dir.push(DirEntry {
            trigram: ct,
            count,
            offset: off,
        });
    }
    Ok(dir)
}

struct RunReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl RunReader<'_> {
    fn next(&mut self) -> Option<PostEntry> {
        if self.pos + 8 > self.data.len() {
            return None;
        }
        let v = u64::from_be_bytes(self.data[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        Some(PostEntry::from_u64(v))
    }
}

pub(crate) struct CountingWriter<W> {
    w: W,
    pub(crate) pos: u64,
}

impl<W: Write> CountingWriter<W> {
    pub(crate) fn new(w: W) -> Self {
        Self { w, pos: 0 }
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.w.write(buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.w.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_produces_valid_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("index");
        let mut w = IndexWriter::create(&dest).unwrap();
        w.add_paths(["/nonexistent"]);
        w.flush().unwrap();

        let data = std::fs::read(&dest).unwrap();
        assert!(data.starts_with(MAGIC));
        assert!(data.ends_with(TRAILER_MAGIC));
    }

    #[test]
    fn unreadable_file_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("index");
        let mut w = IndexWriter::create(&dest).unwrap();
        w.add_file(&dir.path().join("missing.txt")).unwrap();
        assert_eq!(w.num_names(), 0);
        w.flush().unwrap();
    }

    #[test]
    fn oversized_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let big = dir.path().join("big.txt");
        std::fs::write(&big, b"hello world, this is some content\n").unwrap();

        let dest = dir.path().join("index");
        let opts = IndexOptions {
            max_file_len: 8,
            ..Default::default()
        };
        let mut w = IndexWriter::with_options(&dest, opts).unwrap();
        w.add_file(&big).unwrap();
        assert_eq!(w.num_names(), 0);
    }

    #[test]
    fn small_post_budget_spills_runs() {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in [("a.txt", "alpha beta gamma\n"), ("b.txt", "beta gamma delta\n")] {
            std::fs::write(dir.path().join(name), content).unwrap();
        }
        let dest = dir.path().join("index");
        let opts = IndexOptions {
            post_buffer_bytes: 1, // clamped to a tiny buffer, forcing spills
            ..Default::default()
        };
        let mut w = IndexWriter::with_options(&dest, opts).unwrap();
        w.add_file(&dir.path().join("a.txt")).unwrap();
        w.add_file(&dir.path().join("b.txt")).unwrap();
        assert_eq!(w.num_names(), 2);
        w.flush().unwrap();
        assert!(dest.exists());
    }
}
