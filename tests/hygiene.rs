//! Hygiene — source-level standards checked at test time
//!
//! Scans the production sources under `src/` (sibling `*_test.rs` files
//! excluded) for patterns that crash the process or swallow errors. Each
//! pattern has a budget. The budgets only go down.

use std::fs;
use std::path::Path;

struct SourceFile {
    path: String,
    content: String,
}

/// Budgeted pattern: `(needle, max hits, why it is banned)`.
type Rule = (&'static str, usize, &'static str);

// Panics.
const PANIC_RULES: [Rule; 6] = [
    (".unwrap()", 0, "panics on None/Err"),
    (".expect(", 0, "panics on None/Err"),
    ("panic!(", 0, "aborts the task"),
    ("unreachable!(", 0, "aborts the task"),
    ("todo!(", 0, "unfinished stub"),
    ("unimplemented!(", 0, "unfinished stub"),
];

// Silent loss.
const DISCARD_RULES: [Rule; 2] = [
    ("let _ =", 0, "drops a Result without inspecting it"),
    (".ok()", 0, "turns an error into None without logging it"),
];

// Structure.
const STRUCTURE_RULES: [Rule; 1] = [("#[allow(dead_code)]", 0, "hides unused code")];

fn source_files() -> Vec<SourceFile> {
    let mut files = Vec::new();
    collect_rs_files(Path::new("src"), &mut files);
    files
}

fn collect_rs_files(dir: &Path, out: &mut Vec<SourceFile>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_rs_files(&path, out);
            continue;
        }
        if !path.extension().is_some_and(|e| e == "rs") {
            continue;
        }
        let path_str = path.to_string_lossy().to_string();
        if path_str.ends_with("_test.rs") {
            continue;
        }
        if let Ok(content) = fs::read_to_string(&path) {
            out.push(SourceFile { path: path_str, content });
        }
    }
}

fn hits(files: &[SourceFile], needle: &str) -> Vec<(String, usize)> {
    files
        .iter()
        .filter_map(|file| {
            let count = file.content.lines().filter(|line| line.contains(needle)).count();
            (count > 0).then(|| (file.path.clone(), count))
        })
        .collect()
}

fn check(rules: &[Rule]) {
    let files = source_files();
    assert!(!files.is_empty(), "no sources found under src/");

    let mut failures = Vec::new();
    for (needle, budget, why) in rules {
        let found = hits(&files, needle);
        let count: usize = found.iter().map(|(_, c)| c).sum();
        if count > *budget {
            let detail = found
                .iter()
                .map(|(path, c)| format!("    {path}: {c}"))
                .collect::<Vec<_>>()
                .join("\n");
            failures.push(format!("`{needle}` ({why}): found {count}, max {budget}\n{detail}"));
        }
    }
    assert!(failures.is_empty(), "hygiene budget exceeded:\n{}", failures.join("\n"));
}

#[test]
fn panic_budget() {
    check(&PANIC_RULES);
}

#[test]
fn silent_discard_budget() {
    check(&DISCARD_RULES);
}

#[test]
fn structure_budget() {
    check(&STRUCTURE_RULES);
}

#[test]
fn every_module_test_file_is_attached() {
    // A sibling `foo_test.rs` only runs if `foo.rs` points at it.
    let mut orphans = Vec::new();
    let mut stack = vec![Path::new("src").to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            let name = path.file_name().unwrap_or_default().to_string_lossy().to_string();
            if !name.ends_with("_test.rs") {
                continue;
            }
            let attached = fs::read_dir(&dir)
                .into_iter()
                .flatten()
                .flatten()
                .filter(|e| e.path().extension().is_some_and(|x| x == "rs"))
                .filter_map(|e| fs::read_to_string(e.path()).ok())
                .any(|content| content.contains(&format!("#[path = \"{name}\"]")));
            if !attached {
                orphans.push(path.to_string_lossy().to_string());
            }
        }
    }
    assert!(orphans.is_empty(), "test files not attached with #[path]: {orphans:?}");
}
