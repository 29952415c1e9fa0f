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

//! Line-oriented grep over candidate files.
//!
//! The driver streams each file, matching the regexp per line (lines are
//! `\n`-terminated; a final unterminated line still counts) and reporting at
//! most one hit per line. Output modes follow the usual grep precedence:
//! count, then file names, then matching lines.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};

use anyhow::Result;
use regex::bytes::Regex;

#[derive(Debug, Clone, Copy, Default)]
pub struct GrepOptions {
    /// Print `path: N` per matching file instead of lines.
    pub count: bool,
    /// Print only the names of matching files.
    pub list_files: bool,
    /// Prefix each line with its 1-based line number.
    pub line_numbers: bool,
    /// Stop after this many matched lines in total (0 = unlimited).
    pub max_count: u64,
}

pub struct Grep<W: Write> {
    re: Regex,
    opts: GrepOptions,
    out: W,
    matched: bool,
    done: bool,
    emitted: u64,
}

impl<W: Write> Grep<W> {
    pub fn new(re: Regex, opts: GrepOptions, out: W) -> Self {
        Self {
            re,
            opts,
            matched: false,
            done: false,
            emitted: 0,
            out,
        }
    }

    /// Whether any line has matched so far.
    pub fn matched(&self) -> bool {
        self.matched
    }

    /// Whether the match cap has been reached; the caller should stop
    /// feeding files.
    pub fn done(&self) -> bool {
        self.done
    }

    /// Search one file. Unreadable files are reported and skipped.
    pub fn file(&mut self, name: &str) -> Result<()> {
        if self.done {
            return Ok(());
        }
        let f = match File::open(name) {
            Ok(f) => f,
            Err(e) => {
                log::warn!("{}: {}", name, e);
                return Ok(());
            }
        };
        let mut r = BufReader::new(f);
        let mut line: Vec<u8> = Vec::new();
        let mut lineno: u64 = 0;
        let mut file_count: u64 = 0;

        loop {
            line.clear();
            let n = match r.read_until(b'\n', &mut line) {
                Ok(n) => n,
                Err(e) => {
                    log::warn!("{}: {}", name, e);
                    break;
                }
            };
            if n == 0 {
                break;
            }
            lineno += 1;
            let content = match line.last() {
                Some(b'\n') => &line[..line.len() - 1],
                _ => &line[..],
            };
            if !self.re.is_match(content) {
                continue;
            }
            self.matched = true;
            file_count += 1;
            self.bump();

            if self.opts.count {
                if self.done {
                    break;
                }
                continue;
            }
            if self.opts.list_files {
                writeln!(self.out, "{}", name)?;
                break;
            }
            if self.opts.line_numbers {
                write!(self.out, "{}:{}:", name, lineno)?;
            } else {
                write!(self.out, "{}:", name)?;
            }
            self.out.write_all(content)?;
            self.out.write_all(b"\n")?;
            if self.done {
                break;
            }
        }

        if self.opts.count && file_count > 0 {
            writeln!(self.out, "{}: {}", name, file_count)?;
        }
        Ok(())
    }

    fn bump(&mut self) {
        self.emitted += 1;
        if self.opts.max_count > 0 && self.emitted >= self.opts.max_count {
            self.done = true;
        }
    }
}
