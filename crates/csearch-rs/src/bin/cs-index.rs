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

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::bounded;
use ignore::overrides::{Override, OverrideBuilder};
use ignore::WalkBuilder;

use csearch_rs::index::{default_index_path, merge, IndexOptions, IndexReader, IndexWriter};
use csearch_rs::trigram::TextOptions;

/// Build or refresh the trigram index used by cs-search.
///
/// Each PATH names a file or directory tree to add. Without PATH arguments
/// the recorded roots are reindexed, so a bare `cs-index` in a cron job
/// keeps the index fresh. By default new paths are merged with what is
/// already indexed; `--reset` discards the old index first.
#[derive(Parser, Debug)]
#[command(name = "cs-index", version)]
struct Args {
    /// Files or directory trees to index (none: reindex recorded roots)
    #[arg(value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// List indexed roots and exit
    #[arg(long)]
    list: bool,

    /// Discard the existing index (with no PATH, delete the index)
    #[arg(long)]
    reset: bool,

    /// Index file to use, overriding $CSEARCHINDEX
    #[arg(long, value_name = "FILE")]
    indexpath: Option<PathBuf>,

    /// File with one glob per line to exclude, matched against base names
    #[arg(long, value_name = "FILE")]
    exclude: Option<PathBuf>,

    /// Report each skipped file and the reason
    #[arg(long)]
    logskip: bool,

    /// Do not follow symlinked files and directories
    #[arg(long)]
    no_follow_symlinks: bool,

    /// Skip files longer than this many bytes
    #[arg(long, default_value_t = 1 << 30, value_name = "BYTES")]
    maxfilelen: u64,

    /// Skip files with a line longer than this many bytes
    #[arg(long, default_value_t = 2000, value_name = "BYTES")]
    maxlinelen: usize,

    /// Skip files with more than this many distinct trigrams
    #[arg(long, default_value_t = 30000, value_name = "COUNT")]
    maxtrigrams: usize,

    /// Skip files with a higher fraction of invalid UTF-8 bytes
    #[arg(long, default_value_t = 0.1, value_name = "RATIO")]
    maxinvalidutf8ratio: f64,

    /// Print extra information
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let master = args
        .indexpath
        .clone()
        .unwrap_or_else(default_index_path);

    if args.list {
        let ix = IndexReader::open(&master)?;
        for p in ix.paths() {
            println!("{}", p);
        }
        return Ok(());
    }

    if args.reset && args.paths.is_empty() {
        match fs::remove_file(&master) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("remove {}", master.display())),
        }
        return Ok(());
    }

    let overrides = build_excludes(&master, args.exclude.as_deref())?;

    let mut roots: Vec<PathBuf> = args.paths.clone();
    if roots.is_empty() {
        let ix = IndexReader::open(&master)
            .context("no paths given and no existing index to reindex")?;
        roots = ix.paths().iter().map(PathBuf::from).collect();
    }
    let mut abs_roots: Vec<String> = Vec::new();
    for r in roots {
        match std::path::absolute(&r) {
            Ok(a) => abs_roots.push(a.to_string_lossy().into_owned()),
            Err(e) => log::warn!("{}: {}", r.display(), e),
        }
    }
    abs_roots.sort();
    abs_roots.dedup();

    let master_ok = fs::metadata(&master).map(|m| m.is_file()).unwrap_or(false);
    let reset = args.reset || !master_ok;
    let target = if reset {
        master.clone()
    } else {
        tilde_path(&master, "~")
    };

    let opts = IndexOptions {
        max_file_len: args.maxfilelen,
        text: TextOptions {
            max_line_len: args.maxlinelen,
            max_trigrams: args.maxtrigrams,
            max_invalid_utf8_ratio: args.maxinvalidutf8ratio,
        },
        log_skip: args.logskip,
        ..Default::default()
    };
    let mut ix = IndexWriter::with_options(&target, opts)?;
    ix.add_paths(abs_roots.iter().cloned());

    // One walker thread produces paths; this thread consumes them, dedupes,
    // and feeds the writer serially. The closed channel is the done signal.
    let (tx, rx) = bounded::<PathBuf>(1024);
    let walk_roots = abs_roots.clone();
    let follow = !args.no_follow_symlinks;
    let producer = std::thread::spawn(move || {
        let mut it = walk_roots.iter();
        let first = match it.next() {
            Some(r) => r,
            None => return,
        };
        let mut builder = WalkBuilder::new(first);
        builder
            .standard_filters(false)
            .follow_links(follow)
            .overrides(overrides);
        for root in it {
            builder.add(root);
        }
        for root in &walk_roots {
            log::info!("index {}", root);
        }
        for entry in builder.build() {
            match entry {
                Ok(e) => {
                    if e.file_type().map_or(false, |t| t.is_file()) {
                        if tx.send(e.into_path()).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => log::warn!("{}", e),
            }
        }
    });

    let mut seen: HashSet<PathBuf> = HashSet::new();
    for path in rx {
        if seen.insert(path.clone()) {
            ix.add_file(&path)?;
        }
    }
    producer
        .join()
        .map_err(|_| anyhow::anyhow!("walker thread panicked"))?;

    log::info!("flush index");
    ix.flush()?;

    if !reset {
        log::info!("merge {} {}", master.display(), target.display());
        let merged = tilde_path(&master, "~~");
        {
            let left = IndexReader::open(&master)?;
            let right = IndexReader::open(&target)?;
            merge(&merged, &left, &right, &[])?;
        }
        fs::remove_file(&target)
            .with_context(|| format!("remove {}", target.display()))?;
        fs::rename(&merged, &master)
            .with_context(|| format!("rename {} into {}", merged.display(), master.display()))?;
    }
    log::info!("done");
    Ok(())
}

/// The index file's own base name (and its temporaries) are always
/// excluded; `--exclude FILE` adds one glob per line, `~/` expanding to
/// `$HOME`.
fn build_excludes(master: &Path, exclude: Option<&Path>) -> Result<Override> {
    let mut builder = OverrideBuilder::new("/");
    if let Some(base) = master.file_name().and_then(|n| n.to_str()) {
        for suffix in ["", "~", "~~"] {
            builder
                .add(&format!("!{}{}", base, suffix))
                .with_context(|| format!("bad exclude pattern for {}", base))?;
        }
    }
    if let Some(path) = exclude {
        let path = expand_home(path);
        let data = fs::read_to_string(&path)
            .with_context(|| format!("read exclude file {}", path.display()))?;
        for line in data.lines() {
            let pat = line.trim();
            if pat.is_empty() {
                continue;
            }
            builder
                .add(&format!("!{}", pat))
                .with_context(|| format!("bad exclude pattern {:?}", pat))?;
        }
    }
    Ok(builder.build()?)
}

fn expand_home(path: &Path) -> PathBuf {
    if let Some(rest) = path.to_str().and_then(|s| s.strip_prefix("~/")) {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}

fn tilde_path(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}
