use std::path::{Path, PathBuf};

use anyhow::Result;
use regex_syntax::ParserBuilder;

use csearch_rs::grep::{Grep, GrepOptions};
use csearch_rs::regex_analyze::regexp_query;
use csearch_rs::{merge, IndexReader, IndexWriter, Query};

fn build_index(dir: &Path, files: &[(&str, &[u8])]) -> Result<PathBuf> {
    let mut names: Vec<PathBuf> = Vec::new();
    for (name, content) in files {
        let p = dir.join(name);
        std::fs::write(&p, content)?;
        names.push(p);
    }
    names.sort();

    let dest = dir.join("csearchindex");
    let mut w = IndexWriter::create(&dest)?;
    w.add_paths([dir.to_string_lossy().into_owned()]);
    for n in &names {
        w.add_file(n)?;
    }
    w.flush()?;
    Ok(dest)
}

/// Plan, evaluate, and grep: the whole search pipeline, output captured.
fn run_search(index: &Path, pattern: &str, opts: GrepOptions, brute: bool) -> Result<String> {
    let ix = IndexReader::open(index)?;
    let hir = ParserBuilder::new().utf8(false).build().parse(pattern)?;
    let q = if brute { Query::all() } else { regexp_query(&hir) };
    let post = ix.posting_query(&q)?;

    let re = regex::bytes::Regex::new(pattern)?;
    let mut out = Vec::new();
    let mut g = Grep::new(re, opts, &mut out);
    for id in post {
        g.file(ix.name(id)?)?;
        if g.done() {
            break;
        }
    }
    Ok(String::from_utf8(out)?)
}

fn strip_dir(out: &str, dir: &Path) -> String {
    out.replace(&format!("{}/", dir.display()), "")
}

const CORPUS: &[(&str, &[u8])] = &[
    ("a.txt", b"hello world\n"),
    ("b.txt", b"help me\n"),
    ("c.bin", b"\x00\x01\x02 garbage"),
];

#[test]
fn hello_finds_only_the_text_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let index = build_index(dir.path(), CORPUS)?;

    let out = run_search(&index, "hello", GrepOptions::default(), false)?;
    assert_eq!(strip_dir(&out, dir.path()), "a.txt:hello world\n");
    Ok(())
}

#[test]
fn list_and_count_modes() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let index = build_index(dir.path(), CORPUS)?;

    let list = run_search(
        &index,
        "hel",
        GrepOptions {
            list_files: true,
            ..Default::default()
        },
        false,
    )?;
    assert_eq!(strip_dir(&list, dir.path()), "a.txt\nb.txt\n");

    let count = run_search(
        &index,
        "hel",
        GrepOptions {
            count: true,
            ..Default::default()
        },
        false,
    )?;
    assert_eq!(strip_dir(&count, dir.path()), "a.txt: 1\nb.txt: 1\n");
    Ok(())
}

#[test]
fn alternation_matches_both_files() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let index = build_index(dir.path(), CORPUS)?;

    let out = run_search(&index, "world|help", GrepOptions::default(), false)?;
    assert_eq!(
        strip_dir(&out, dir.path()),
        "a.txt:hello world\nb.txt:help me\n"
    );
    Ok(())
}

#[test]
fn dotted_pattern_scans_but_matches_precisely() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let files: &[(&str, &[u8])] = &[
        ("a.txt", b"xay\n"),
        ("b.txt", b"x y\n"),
        ("c.txt", b"nothing\n"),
    ];
    let index = build_index(dir.path(), files)?;

    let out = run_search(&index, "x.y", GrepOptions::default(), false)?;
    assert_eq!(strip_dir(&out, dir.path()), "a.txt:xay\nb.txt:x y\n");
    Ok(())
}

#[test]
fn brute_output_equals_filtered_output() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let index = build_index(dir.path(), CORPUS)?;

    for pattern in ["hello", "hel", "world|help", "l.o"] {
        let filtered = run_search(&index, pattern, GrepOptions::default(), false)?;
        let brute = run_search(&index, pattern, GrepOptions::default(), true)?;
        assert_eq!(filtered, brute, "pattern {:?}", pattern);
    }
    Ok(())
}

#[test]
fn match_cap_short_circuits() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let files: &[(&str, &[u8])] = &[
        ("a.txt", b"needle one\nneedle two\n"),
        ("b.txt", b"needle three\n"),
    ];
    let index = build_index(dir.path(), files)?;

    let out = run_search(
        &index,
        "needle",
        GrepOptions {
            max_count: 2,
            ..Default::default()
        },
        false,
    )?;
    assert_eq!(
        strip_dir(&out, dir.path()),
        "a.txt:needle one\na.txt:needle two\n"
    );
    Ok(())
}

#[test]
fn repeated_roots_are_recorded_once() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let sub = dir.path().join("q");
    std::fs::create_dir_all(sub.join("r"))?;
    std::fs::write(sub.join("f.txt"), b"some text\n")?;

    let dest = dir.path().join("csearchindex");
    let mut w = IndexWriter::create(&dest)?;
    let root1 = sub.to_string_lossy().into_owned();
    let root2 = sub.join("r").to_string_lossy().into_owned();
    w.add_paths([root1.clone(), root2.clone()]);
    w.add_paths([root1.clone(), root2.clone()]);
    w.add_file(&sub.join("f.txt"))?;
    w.flush()?;

    let ix = IndexReader::open(&dest)?;
    assert_eq!(ix.paths(), &[root1, root2]);
    Ok(())
}

#[test]
fn search_spans_merged_indexes() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let src1 = dir.path().join("src1");
    let src2 = dir.path().join("src2");
    std::fs::create_dir_all(&src1)?;
    std::fs::create_dir_all(&src2)?;
    std::fs::write(src1.join("one.txt"), b"alpha needle\n")?;
    std::fs::write(src2.join("two.txt"), b"needle omega\n")?;

    let idx1 = dir.path().join("one.idx");
    let mut w = IndexWriter::create(&idx1)?;
    w.add_paths([src1.to_string_lossy().into_owned()]);
    w.add_file(&src1.join("one.txt"))?;
    w.flush()?;

    let idx2 = dir.path().join("two.idx");
    let mut w = IndexWriter::create(&idx2)?;
    w.add_paths([src2.to_string_lossy().into_owned()]);
    w.add_file(&src2.join("two.txt"))?;
    w.flush()?;

    let master = dir.path().join("csearchindex");
    {
        let left = IndexReader::open(&idx1)?;
        let right = IndexReader::open(&idx2)?;
        merge(&master, &left, &right, &[])?;
    }

    let ix = IndexReader::open(&master)?;
    assert_eq!(
        ix.paths(),
        &[
            src1.to_string_lossy().into_owned(),
            src2.to_string_lossy().into_owned()
        ]
    );

    let out = run_search(&master, "needle", GrepOptions::default(), false)?;
    assert_eq!(
        strip_dir(&out, dir.path()),
        "src1/one.txt:alpha needle\nsrc2/two.txt:needle omega\n"
    );
    Ok(())
}
