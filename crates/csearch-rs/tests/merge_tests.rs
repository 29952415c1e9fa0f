use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Result;
use csearch_rs::trigram::trigrams_of;
use csearch_rs::{merge, IndexReader, IndexWriter};

fn write_tree(root: &Path, files: &[(&str, &str)]) -> Result<Vec<String>> {
    std::fs::create_dir_all(root)?;
    let mut names = Vec::new();
    for (name, content) in files {
        let p = root.join(name);
        std::fs::write(&p, content)?;
        names.push(p.to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

fn write_index(dest: &Path, roots: &[&Path], names: &[String]) -> Result<()> {
    let mut w = IndexWriter::create(dest)?;
    w.add_paths(roots.iter().map(|r| r.to_string_lossy().into_owned()));
    for n in names {
        w.add_file(n.as_ref())?;
    }
    w.flush()?;
    Ok(())
}

fn all_names(ix: &IndexReader) -> Vec<String> {
    (0..ix.num_names())
        .map(|id| ix.name(id).unwrap().to_string())
        .collect()
}

/// All trigrams of every file in `corpus`, with the posting list implied by
/// membership, checked against `ix` under its own name order.
fn check_postings(ix: &IndexReader, corpus: &[(String, String)]) -> Result<()> {
    let names = all_names(ix);
    let mut tris: BTreeSet<u32> = BTreeSet::new();
    for (_, content) in corpus {
        tris.extend(trigrams_of(content.as_bytes()));
    }
    for t in tris {
        let want: Vec<u32> = names
            .iter()
            .enumerate()
            .filter(|(_, n)| {
                corpus
                    .iter()
                    .any(|(cn, c)| cn == *n && trigrams_of(c.as_bytes()).contains(&t))
            })
            .map(|(i, _)| i as u32)
            .collect();
        assert_eq!(ix.posting_list(t)?, want, "trigram {:#08x}", t);
    }
    Ok(())
}

#[test]
fn merge_equals_combined_build() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let root_a = dir.path().join("src1");
    let root_b = dir.path().join("src2");
    let files_a: &[(&str, &str)] = &[("a.txt", "alpha beta gamma\n"), ("b.txt", "beta delta\n")];
    let files_b: &[(&str, &str)] = &[("c.txt", "gamma epsilon\n")];
    let names_a = write_tree(&root_a, files_a)?;
    let names_b = write_tree(&root_b, files_b)?;

    let ix_a_path = dir.path().join("a.idx");
    let ix_b_path = dir.path().join("b.idx");
    write_index(&ix_a_path, &[&root_a], &names_a)?;
    write_index(&ix_b_path, &[&root_b], &names_b)?;

    let merged_path = dir.path().join("merged.idx");
    {
        let left = IndexReader::open(&ix_a_path)?;
        let right = IndexReader::open(&ix_b_path)?;
        merge(&merged_path, &left, &right, &[])?;
    }
    let merged = IndexReader::open(&merged_path)?;

    // Combined single-pass build over the same files, same order.
    let combined_path = dir.path().join("combined.idx");
    let mut all: Vec<String> = names_a.clone();
    all.extend(names_b.clone());
    write_index(&combined_path, &[&root_a, &root_b], &all)?;
    let combined = IndexReader::open(&combined_path)?;

    assert_eq!(merged.paths(), combined.paths());
    assert_eq!(all_names(&merged), all_names(&combined));

    let corpus: Vec<(String, String)> = all
        .iter()
        .map(|n| (n.clone(), std::fs::read_to_string(n).unwrap()))
        .collect();
    check_postings(&merged, &corpus)?;
    check_postings(&combined, &corpus)?;
    Ok(())
}

#[test]
fn merge_drops_requested_roots() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let root_a = dir.path().join("old");
    let root_b = dir.path().join("new");
    let names_a = write_tree(&root_a, &[("a.txt", "stale content\n")])?;
    let names_b = write_tree(&root_b, &[("b.txt", "fresh content\n")])?;

    let ix_a_path = dir.path().join("a.idx");
    let ix_b_path = dir.path().join("b.idx");
    write_index(&ix_a_path, &[&root_a], &names_a)?;
    write_index(&ix_b_path, &[&root_b], &names_b)?;

    let merged_path = dir.path().join("merged.idx");
    {
        let left = IndexReader::open(&ix_a_path)?;
        let right = IndexReader::open(&ix_b_path)?;
        merge(
            &merged_path,
            &left,
            &right,
            &[root_a.to_string_lossy().into_owned()],
        )?;
    }
    let merged = IndexReader::open(&merged_path)?;

    assert_eq!(merged.paths(), &[root_b.to_string_lossy().into_owned()]);
    let names = all_names(&merged);
    assert_eq!(names.len(), 1);
    assert!(names[0].ends_with("b.txt"));

    // No dangling ids anywhere.
    for t in trigrams_of(b"stale content\n") {
        for id in merged.posting_list(t)? {
            assert!(id < merged.num_names());
        }
    }
    Ok(())
}

#[test]
fn reindex_of_same_root_replaces_stale_files() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let root = dir.path().join("src");
    let old_names = write_tree(&root, &[("a.txt", "old text here\n"), ("gone.txt", "bye\n")])?;

    let old_idx = dir.path().join("old.idx");
    write_index(&old_idx, &[&root], &old_names)?;

    // The tree changes: one file rewritten, one removed.
    std::fs::write(root.join("a.txt"), "new text here\n")?;
    std::fs::remove_file(root.join("gone.txt"))?;
    let new_names = write_tree(&root, &[("a.txt", "new text here\n")])?;
    let new_idx = dir.path().join("new.idx");
    write_index(&new_idx, &[&root], &new_names)?;

    let merged_path = dir.path().join("merged.idx");
    {
        let left = IndexReader::open(&old_idx)?;
        let right = IndexReader::open(&new_idx)?;
        merge(&merged_path, &left, &right, &[])?;
    }
    let merged = IndexReader::open(&merged_path)?;

    // Everything under the reindexed root comes from the right side.
    let names = all_names(&merged);
    assert_eq!(names.len(), 1);
    assert!(names[0].ends_with("a.txt"));
    assert_eq!(merged.paths(), &[root.to_string_lossy().into_owned()]);

    // Stale-only trigrams are gone from the directory.
    for t in trigrams_of(b"old") {
        assert!(merged.posting_list(t)?.is_empty());
    }
    for t in trigrams_of(b"new") {
        assert_eq!(merged.posting_list(t)?, vec![0]);
    }
    Ok(())
}

#[test]
fn merged_ids_resolve_to_names(){
    let dir = tempfile::tempdir().unwrap();
    let root_a = dir.path().join("left");
    let root_b = dir.path().join("right");
    let names_a = write_tree(&root_a, &[("x.txt", "common words\n")]).unwrap();
    let names_b = write_tree(&root_b, &[("y.txt", "common words\n")]).unwrap();

    let a_idx = dir.path().join("a.idx");
    let b_idx = dir.path().join("b.idx");
    write_index(&a_idx, &[&root_a], &names_a).unwrap();
    write_index(&b_idx, &[&root_b], &names_b).unwrap();

    let merged_path: PathBuf = dir.path().join("m.idx");
    {
        let left = IndexReader::open(&a_idx).unwrap();
        let right = IndexReader::open(&b_idx).unwrap();
        merge(&merged_path, &left, &right, &[]).unwrap();
    }
    let merged = IndexReader::open(&merged_path).unwrap();
    for t in trigrams_of(b"common words\n") {
        let list = merged.posting_list(t).unwrap();
        assert_eq!(list.len(), 2);
        for id in list {
            merged.name(id).unwrap();
        }
    }
}
