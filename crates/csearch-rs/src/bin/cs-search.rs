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

use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use regex_syntax::ParserBuilder;

use csearch_rs::grep::{Grep, GrepOptions};
use csearch_rs::index::{default_index_path, IndexReader};
use csearch_rs::query::Query;
use csearch_rs::regex_analyze::regexp_query;

/// Grep over all indexed files.
///
/// cs-search turns REGEXP into a trigram query, asks the index which files
/// can possibly match, and greps only those. Build the index with cs-index
/// first; it lives at $CSEARCHINDEX or $HOME/.csearchindex.
#[derive(Parser, Debug)]
#[command(name = "cs-search", version)]
struct Args {
    /// Regular expression to search for
    #[arg(value_name = "REGEXP")]
    pattern: String,

    /// Print only a count of matching lines per file
    #[arg(short = 'c')]
    count: bool,

    /// Search only files with names matching this regexp
    #[arg(short = 'f', value_name = "PATHREGEXP")]
    file_pattern: Option<String>,

    /// Case-insensitive search
    #[arg(short = 'i')]
    ignore_case: bool,

    /// Print only the names of files containing matches
    #[arg(short = 'l')]
    list_files: bool,

    /// Limit output to this many matching lines (0 = no limit)
    #[arg(short = 'm', default_value_t = 0, value_name = "MAXCOUNT")]
    max_count: u64,

    /// Print each line with its line number in the file, starting at 1
    #[arg(short = 'n')]
    line_numbers: bool,

    /// Index file to use, overriding $CSEARCHINDEX
    #[arg(long, value_name = "FILE")]
    indexpath: Option<PathBuf>,

    /// Search every indexed file, skipping the trigram filter
    #[arg(long)]
    brute: bool,

    /// Print extra information
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let re = match regex::bytes::RegexBuilder::new(&args.pattern)
        .case_insensitive(args.ignore_case)
        .build()
    {
        Ok(re) => re,
        Err(e) => {
            eprintln!("cs-search: bad regexp: {}", e);
            return ExitCode::from(2);
        }
    };
    let hir = match ParserBuilder::new()
        .utf8(false)
        .case_insensitive(args.ignore_case)
        .build()
        .parse(&args.pattern)
    {
        Ok(hir) => hir,
        Err(e) => {
            eprintln!("cs-search: bad regexp: {}", e);
            return ExitCode::from(2);
        }
    };
    let file_re = match args.file_pattern.as_deref().map(regex::Regex::new).transpose() {
        Ok(re) => re,
        Err(e) => {
            eprintln!("cs-search: bad file regexp: {}", e);
            return ExitCode::from(2);
        }
    };

    match search(&args, re, &hir, file_re) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("cs-search: {:#}", e);
            ExitCode::from(1)
        }
    }
}

fn search(
    args: &Args,
    re: regex::bytes::Regex,
    hir: &regex_syntax::hir::Hir,
    file_re: Option<regex::Regex>,
) -> Result<bool> {
    let master = args
        .indexpath
        .clone()
        .unwrap_or_else(default_index_path);
    let ix = IndexReader::open(&master)?;

    let q = if args.brute {
        Query::all()
    } else {
        regexp_query(hir)
    };
    log::info!("query: {}", q);

    let post = ix.posting_query(&q)?;
    log::info!("identified {} possible files", post.len());

    let opts = GrepOptions {
        count: args.count,
        list_files: args.list_files,
        line_numbers: args.line_numbers,
        max_count: args.max_count,
    };
    let stdout = io::stdout().lock();
    let mut g = Grep::new(re, opts, BufWriter::new(stdout));

    for id in post {
        let name = ix.name(id)?;
        if let Some(fre) = &file_re {
            if !fre.is_match(name) {
                continue;
            }
        }
        g.file(name)?;
        if g.done() {
            break;
        }
    }
    Ok(g.matched())
}
