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

//! Boolean trigram queries.
//!
//! A [`Query`] describes which indexed files *can* match a regexp: `All`
//! (every file), `None` (no file), or an `And`/`Or` node carrying a set of
//! required trigrams plus sub-queries. The planner in `regex_analyze`
//! produces these; the posting evaluator in `index::reader` consumes them.

use std::fmt;

use crate::trigram::{trigram_bytes, Trigram};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOp {
    All,
    None,
    And,
    Or,
}

/// A boolean query over trigram posting lists.
///
/// For `And`/`Or` nodes, `trigram` holds leaf operands (sorted, deduped) and
/// `sub` holds nested queries. `All`/`None` nodes carry neither.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub op: QueryOp,
    pub trigram: Vec<Trigram>,
    pub sub: Vec<Query>,
}

impl Query {
    pub fn all() -> Query {
        Query {
            op: QueryOp::All,
            trigram: Vec::new(),
            sub: Vec::new(),
        }
    }

    pub fn none() -> Query {
        Query {
            op: QueryOp::None,
            trigram: Vec::new(),
            sub: Vec::new(),
        }
    }

    /// An `op` node over a plain trigram set.
    pub fn trigram_set(op: QueryOp, mut trigram: Vec<Trigram>) -> Query {
        trigram.sort_unstable();
        trigram.dedup();
        Query {
            op,
            trigram,
            sub: Vec::new(),
        }
    }

    pub fn and(self, r: Query) -> Query {
        self.and_or(r, QueryOp::And)
    }

    pub fn or(self, r: Query) -> Query {
        self.and_or(r, QueryOp::Or)
    }

    fn is_atom(&self) -> bool {
        self.trigram.len() == 1 && self.sub.is_empty()
    }

    fn and_or(mut self, mut r: Query, op: QueryOp) -> Query {
        // Collapse single-child wrappers.
        if self.trigram.is_empty() && self.sub.len() == 1 {
            self = self.sub.pop().unwrap();
        }
        if r.trigram.is_empty() && r.sub.len() == 1 {
            r = r.sub.pop().unwrap();
        }

        // If self implies r: self AND r == self, self OR r == r.
        if self.implies(&r) {
            return if op == QueryOp::And { self } else { r };
        }
        if r.implies(&self) {
            return if op == QueryOp::And { r } else { self };
        }

        // Merge into an existing node with the same operator.
        let self_atom = self.is_atom();
        let r_atom = r.is_atom();
        if self.op == op && (r.op == op || r_atom) {
            self.trigram.extend(r.trigram);
            self.trigram.sort_unstable();
            self.trigram.dedup();
            self.sub.extend(r.sub);
            return self;
        }
        if r.op == op && self_atom {
            r.trigram.extend(self.trigram);
            r.trigram.sort_unstable();
            r.trigram.dedup();
            return r;
        }
        if self_atom && r_atom {
            self.op = op;
            self.trigram.extend(r.trigram);
            self.trigram.sort_unstable();
            self.trigram.dedup();
            return self;
        }
        if self.op == op {
            self.sub.push(r);
            return self;
        }
        if r.op == op {
            r.sub.push(self);
            return r;
        }

        // Building an AND of ORs or an OR of ANDs: factor out the trigrams
        // common to both sides first, so
        //   (abc&def&ghi) OR (abc&def&jkl)  =>  (abc&def) AND ((ghi) OR (jkl))
        //   (abc|def|ghi) AND (abc|def|jkl) =>  (abc|def) OR ((ghi) AND (jkl))
        let mut common = Vec::new();
        {
            let mut qs = Vec::new();
            let mut rs = Vec::new();
            let (mut i, mut j) = (0, 0);
            while i < self.trigram.len() && j < r.trigram.len() {
                let (qt, rt) = (self.trigram[i], r.trigram[j]);
                match qt.cmp(&rt) {
                    std::cmp::Ordering::Less => {
                        qs.push(qt);
                        i += 1;
                    }
                    std::cmp::Ordering::Greater => {
                        rs.push(rt);
                        j += 1;
                    }
                    std::cmp::Ordering::Equal => {
                        common.push(qt);
                        i += 1;
                        j += 1;
                    }
                }
            }
            qs.extend_from_slice(&self.trigram[i..]);
            rs.extend_from_slice(&r.trigram[j..]);
            self.trigram = qs;
            r.trigram = rs;
        }
        if !common.is_empty() {
            let other_op = if op == QueryOp::And {
                QueryOp::Or
            } else {
                QueryOp::And
            };
            let inner = self.and_or(r, op);
            let factored = Query {
                op: other_op,
                trigram: common,
                sub: Vec::new(),
            };
            return factored.and_or(inner, other_op);
        }

        Query {
            op,
            trigram: Vec::new(),
            sub: vec![self, r],
        }
    }

    /// Conservatively reports whether any file satisfying `self` also
    /// satisfies `r`.
    fn implies(&self, r: &Query) -> bool {
        if self.op == QueryOp::None || r.op == QueryOp::All {
            return true;
        }
        if self.op == QueryOp::All || r.op == QueryOp::None {
            return false;
        }

        if self.op == QueryOp::And || (self.op == QueryOp::Or && self.is_atom()) {
            return trigrams_imply(&self.trigram, r);
        }

        if self.op == QueryOp::Or
            && r.op == QueryOp::Or
            && !self.trigram.is_empty()
            && self.sub.is_empty()
            && is_subset(&self.trigram, &r.trigram)
        {
            return true;
        }
        false
    }
}

/// Whether requiring all of `t` implies query `q`.
fn trigrams_imply(t: &[Trigram], q: &Query) -> bool {
    match q.op {
        QueryOp::Or => {
            if q.sub.iter().any(|sub| trigrams_imply(t, sub)) {
                return true;
            }
            t.iter().any(|tt| q.trigram.binary_search(tt).is_ok())
        }
        QueryOp::And => {
            if !q.sub.iter().all(|sub| trigrams_imply(t, sub)) {
                return false;
            }
            is_subset(&q.trigram, t)
        }
        _ => false,
    }
}

/// Whether sorted list `a` is a subset of sorted list `b`.
fn is_subset(a: &[Trigram], b: &[Trigram]) -> bool {
    let mut j = 0;
    for &x in a {
        while j < b.len() && b[j] < x {
            j += 1;
        }
        if j >= b.len() || b[j] != x {
            return false;
        }
        j += 1;
    }
    true
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            QueryOp::All => return write!(f, "+"),
            QueryOp::None => return write!(f, "-"),
            _ => {}
        }
        if self.trigram.len() == 1 && self.sub.is_empty() {
            return write!(f, "{}", fmt_trigram(self.trigram[0]));
        }
        let sep = if self.op == QueryOp::And { " " } else { "|" };
        let mut first = true;
        for &t in &self.trigram {
            if !first {
                write!(f, "{}", sep)?;
            }
            first = false;
            write!(f, "{}", fmt_trigram(t))?;
        }
        for s in &self.sub {
            if !first {
                write!(f, "{}", sep)?;
            }
            first = false;
            write!(f, "({})", s)?;
        }
        Ok(())
    }
}

fn fmt_trigram(t: Trigram) -> String {
    let b = trigram_bytes(t);
    let mut s = String::new();
    for &c in &b {
        if c.is_ascii_graphic() || c == b' ' {
            s.push(c as char);
        } else {
            s.push_str(&format!("\\x{:02x}", c));
        }
    }
    s
}
