//! Regex analysis deriving trigram queries for index prefiltering.
//!
//! Each HIR node is summarized by a [`RegexInfo`]: whether the node can match
//! the empty string, the exact set of matching strings when that set is small
//! and finite, over-approximated sets of match prefixes/suffixes otherwise,
//! and a [`Query`] every matching file must satisfy. The summaries compose
//! bottom-up through concatenation and alternation; when a set overflows its
//! budget the information is folded into the query and the set truncated.
//!
//! The result is always *sound*: the derived query may be weaker than the
//! regexp, never stronger.

use regex_syntax::hir::{Class, Hir, HirKind};

use crate::query::{Query, QueryOp};
use crate::trigram::{pack, Trigram};

/// Exact-string sets larger than this are folded into match trigrams.
const MAX_EXACT: usize = 7;

/// Prefix/suffix sets larger than this are shortened until they fit.
const MAX_SET: usize = 20;

/// Character classes with more members than this degrade to "any char".
const MAX_CLASS: u64 = 100;

/// Translate a parsed regexp into a trigram query.
pub fn regexp_query(hir: &Hir) -> Query {
    let mut info = analyze(hir);
    info.simplify(true);
    info.add_exact();
    info.query
}

/// A set of byte strings. Prefix sets order lexicographically; suffix sets
/// order by reversed bytes so redundancy pruning can compare neighbors.
#[derive(Debug, Clone, Default, PartialEq)]
struct StringSet(Vec<Vec<u8>>);

impl StringSet {
    fn new() -> Self {
        StringSet(Vec::new())
    }

    fn single(s: Vec<u8>) -> Self {
        StringSet(vec![s])
    }

    fn empty_string() -> Self {
        StringSet(vec![Vec::new()])
    }

    fn add(&mut self, s: Vec<u8>) {
        self.0.push(s);
    }

    fn size(&self) -> usize {
        self.0.len()
    }

    fn iter(&self) -> impl Iterator<Item = &Vec<u8>> {
        self.0.iter()
    }

    fn min_len(&self) -> usize {
        self.0.iter().map(|s| s.len()).min().unwrap_or(0)
    }

    fn clean(&mut self, is_suffix: bool) {
        if is_suffix {
            self.0.sort_by(|a, b| a.iter().rev().cmp(b.iter().rev()));
        } else {
            self.0.sort();
        }
        self.0.dedup();
    }

    /// Pairwise concatenations of `self` and `t`.
    fn cross(&self, t: &StringSet, is_suffix: bool) -> StringSet {
        let mut out = StringSet::new();
        for a in &self.0 {
            for b in &t.0 {
                let mut s = a.clone();
                s.extend_from_slice(b);
                out.add(s);
            }
        }
        out.clean(is_suffix);
        out
    }

    fn union(mut self, t: StringSet, is_suffix: bool) -> StringSet {
        self.0.extend(t.0);
        self.clean(is_suffix);
        self
    }
}

/// Per-node analysis result.
#[derive(Debug, Clone)]
struct RegexInfo {
    /// Whether the node matches the empty string.
    can_empty: bool,
    /// The exact set of matching strings, when finite and small.
    exact: Option<StringSet>,
    /// When `exact` is gone: every match starts with one of these.
    prefix: StringSet,
    /// When `exact` is gone: every match ends with one of these.
    suffix: StringSet,
    /// Query satisfied by every file containing a match.
    query: Query,
}

fn no_match() -> RegexInfo {
    RegexInfo {
        can_empty: false,
        exact: None,
        prefix: StringSet::new(),
        suffix: StringSet::new(),
        query: Query::none(),
    }
}

fn empty_string() -> RegexInfo {
    RegexInfo {
        can_empty: true,
        exact: Some(StringSet::empty_string()),
        prefix: StringSet::new(),
        suffix: StringSet::new(),
        query: Query::all(),
    }
}

fn any_char() -> RegexInfo {
    RegexInfo {
        can_empty: false,
        exact: None,
        prefix: StringSet::empty_string(),
        suffix: StringSet::empty_string(),
        query: Query::all(),
    }
}

fn any_match() -> RegexInfo {
    RegexInfo {
        can_empty: true,
        exact: None,
        prefix: StringSet::empty_string(),
        suffix: StringSet::empty_string(),
        query: Query::all(),
    }
}

fn analyze(hir: &Hir) -> RegexInfo {
    match hir.kind() {
        // Anchors and word boundaries match the empty string at a position.
        HirKind::Empty | HirKind::Look(_) => empty_string(),
        HirKind::Capture(cap) => analyze(&cap.sub),
        HirKind::Concat(subs) => match subs.split_first() {
            None => empty_string(),
            Some((first, rest)) => {
                let mut info = analyze(first);
                for sub in rest {
                    info = concat(info, analyze(sub));
                }
                info
            }
        },
        HirKind::Alternation(subs) => match subs.split_first() {
            None => no_match(),
            Some((first, rest)) => {
                let mut info = analyze(first);
                for sub in rest {
                    info = alternate(info, analyze(sub));
                }
                info
            }
        },
        HirKind::Repetition(rep) => {
            if rep.min == 0 && rep.max == Some(1) {
                // x? is x | empty.
                return alternate(analyze(&rep.sub), empty_string());
            }
            if rep.min == 0 {
                // x* guarantees nothing.
                return any_match();
            }
            // x+ (and x{n,...}, n >= 1): at least one x, so prefixes and
            // suffixes survive, but the full match is no longer exact.
            let mut info = analyze(&rep.sub);
            if let Some(exact) = info.exact.take() {
                info.prefix = exact.clone();
                info.suffix = exact;
            }
            info.simplify(false);
            info
        }
        HirKind::Literal(lit) => {
            let s = lit.0.to_vec();
            let mut info = RegexInfo {
                can_empty: s.is_empty(),
                exact: Some(StringSet::single(s)),
                prefix: StringSet::new(),
                suffix: StringSet::new(),
                query: Query::all(),
            };
            info.simplify(false);
            info
        }
        HirKind::Class(class) => {
            let mut info = analyze_class(class);
            info.simplify(false);
            info
        }
    }
}

fn analyze_class(class: &Class) -> RegexInfo {
    let mut set = StringSet::new();
    match class {
        Class::Unicode(cls) => {
            let mut n: u64 = 0;
            for r in cls.ranges() {
                n += r.end() as u64 - r.start() as u64 + 1;
            }
            if n == 0 {
                return no_match();
            }
            if n > MAX_CLASS {
                return any_char();
            }
            let mut buf = [0u8; 4];
            for r in cls.ranges() {
                for cp in (r.start() as u32)..=(r.end() as u32) {
                    if let Some(ch) = char::from_u32(cp) {
                        set.add(ch.encode_utf8(&mut buf).as_bytes().to_vec());
                    }
                }
            }
        }
        Class::Bytes(cls) => {
            let mut n: u64 = 0;
            for r in cls.ranges() {
                n += r.end() as u64 - r.start() as u64 + 1;
            }
            if n == 0 {
                return no_match();
            }
            if n > MAX_CLASS {
                return any_char();
            }
            for r in cls.ranges() {
                for b in r.start()..=r.end() {
                    set.add(vec![b]);
                }
            }
        }
    }
    RegexInfo {
        can_empty: false,
        exact: Some(set),
        prefix: StringSet::new(),
        suffix: StringSet::new(),
        query: Query::all(),
    }
}

/// Analysis of `xy` from the analyses of `x` and `y`.
fn concat(x: RegexInfo, y: RegexInfo) -> RegexInfo {
    let mut xy = RegexInfo {
        can_empty: x.can_empty && y.can_empty,
        exact: None,
        prefix: StringSet::new(),
        suffix: StringSet::new(),
        query: x.query.and(y.query),
    };

    match (&x.exact, &y.exact) {
        (Some(xe), Some(ye)) => {
            xy.exact = Some(xe.cross(ye, false));
        }
        _ => {
            if let Some(xe) = &x.exact {
                xy.prefix = xe.cross(&y.prefix, false);
            } else {
                xy.prefix = x.prefix.clone();
                if x.can_empty {
                    xy.prefix = xy.prefix.union(y.prefix.clone(), false);
                }
            }
            if let Some(ye) = &y.exact {
                xy.suffix = x.suffix.cross(ye, true);
            } else {
                xy.suffix = y.suffix.clone();
                if y.can_empty {
                    xy.suffix = xy.suffix.union(x.suffix.clone(), true);
                }
            }
        }
    }

    // Every match contains some suffix-of-x ++ prefix-of-y seam. If all of
    // those seams are at least 3 bytes, their trigrams are required.
    if x.exact.is_none()
        && y.exact.is_none()
        && x.suffix.size() <= MAX_SET
        && y.prefix.size() <= MAX_SET
        && x.suffix.min_len() + y.prefix.min_len() >= 3
    {
        let seams = x.suffix.cross(&y.prefix, false);
        xy.query = and_trigrams(xy.query, &seams);
    }

    xy.simplify(false);
    xy
}

/// Analysis of `x|y` from the analyses of `x` and `y`.
fn alternate(mut x: RegexInfo, mut y: RegexInfo) -> RegexInfo {
    let mut xy = RegexInfo {
        can_empty: x.can_empty || y.can_empty,
        exact: None,
        prefix: StringSet::new(),
        suffix: StringSet::new(),
        query: Query::all(),
    };

    match (x.exact.take(), y.exact.take()) {
        (Some(xe), Some(ye)) => {
            xy.exact = Some(xe.union(ye, false));
        }
        (Some(xe), None) => {
            xy.prefix = xe.clone().union(y.prefix.clone(), false);
            xy.suffix = xe.clone().union(y.suffix.clone(), true);
            x.query = and_trigrams(x.query, &xe);
        }
        (None, Some(ye)) => {
            xy.prefix = x.prefix.clone().union(ye.clone(), false);
            xy.suffix = x.suffix.clone().union(ye.clone(), true);
            y.query = and_trigrams(y.query, &ye);
        }
        (None, None) => {
            xy.prefix = x.prefix.clone().union(y.prefix.clone(), false);
            xy.suffix = x.suffix.clone().union(y.suffix.clone(), true);
        }
    }

    xy.query = x.query.or(y.query);
    xy.simplify(false);
    xy
}

impl RegexInfo {
    /// Fold the exact-set trigrams into the query.
    fn add_exact(&mut self) {
        if let Some(exact) = &self.exact {
            let q = std::mem::replace(&mut self.query, Query::all());
            self.query = and_trigrams(q, exact);
        }
    }

    /// Keep the info within budget: oversized exact sets become match
    /// trigrams plus 2-byte prefix/suffix fragments; oversized prefix/suffix
    /// sets are folded into the query and shortened.
    fn simplify(&mut self, force: bool) {
        if let Some(exact) = self.exact.as_mut() {
            exact.clean(false);
        }
        let too_big = self
            .exact
            .as_ref()
            .map_or(false, |e| e.size() > MAX_EXACT);
        if too_big || (force && self.exact.is_some()) {
            self.add_exact();
            let exact = self.exact.take().unwrap();
            for s in exact.iter() {
                if s.len() < 3 {
                    self.prefix.add(s.clone());
                    self.suffix.add(s.clone());
                } else {
                    self.prefix.add(s[..2].to_vec());
                    self.suffix.add(s[s.len() - 2..].to_vec());
                }
            }
        }

        if self.exact.is_none() {
            simplify_set(&mut self.query, &mut self.prefix, false);
            simplify_set(&mut self.query, &mut self.suffix, true);
        }
    }
}

/// Move the trigram information of a prefix/suffix set into the query, then
/// shrink the set: strings are cut to 2 bytes (prefixes keep their head,
/// suffixes their tail) and shortened further while the set stays oversized.
fn simplify_set(query: &mut Query, s: &mut StringSet, is_suffix: bool) {
    s.clean(is_suffix);

    let q = std::mem::replace(query, Query::all());
    *query = and_trigrams(q, s);

    let mut n = 3usize;
    while n == 3 || s.size() > MAX_SET {
        for str in s.0.iter_mut() {
            if str.len() >= n {
                if is_suffix {
                    *str = str[str.len() - (n - 1)..].to_vec();
                } else {
                    str.truncate(n - 1);
                }
            }
        }
        s.clean(is_suffix);
        if n == 1 {
            break;
        }
        n -= 1;
    }

    // Drop entries made redundant by a shorter neighbor: knowing "ab" is a
    // possible prefix makes "abc" useless.
    let drained: Vec<Vec<u8>> = std::mem::take(&mut s.0);
    for str in drained {
        let redundant = s.0.last().map_or(false, |prev| {
            if is_suffix {
                str.ends_with(prev.as_slice())
            } else {
                str.starts_with(prev.as_slice())
            }
        });
        if !redundant {
            s.0.push(str);
        }
    }
}

/// `q` AND (the OR over `t` of the AND of each string's trigrams). If any
/// string is shorter than 3 bytes no trigram is guaranteed, so `q` is
/// returned unchanged.
fn and_trigrams(q: Query, t: &StringSet) -> Query {
    if t.min_len() < 3 {
        return q;
    }
    let mut or = Query::none();
    for s in t.iter() {
        let trigs: Vec<Trigram> = s.windows(3).map(|w| pack([w[0], w[1], w[2]])).collect();
        or = or.or(Query::trigram_set(QueryOp::And, trigs));
    }
    q.and(or)
}
