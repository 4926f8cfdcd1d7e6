use std::collections::HashMap;
use std::fs::{self, File};
use std::path::Path;
use std::time::{Duration, SystemTime};

use logtrail_sessions::{classify, scan_directory, ScanOutcome, SessionFile, TRANSCRIPT_EXTENSION};
use tempfile::TempDir;

fn write_with_mtime(path: &Path, contents: &str, age: Duration) {
    fs::write(path, contents).unwrap();
    let file = File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - age).unwrap();
}

fn found(root: &Path) -> Vec<SessionFile> {
    match scan_directory(root, TRANSCRIPT_EXTENSION) {
        ScanOutcome::Found(files) => files,
        ScanOutcome::NoSessions => panic!("{} should exist", root.display()),
    }
}

#[test]
fn test_missing_root_reports_no_sessions() {
    let dir = TempDir::new().unwrap();
    let outcome = scan_directory(&dir.path().join("does-not-exist"), TRANSCRIPT_EXTENSION);

    assert_eq!(outcome, ScanOutcome::NoSessions);
}

#[test]
fn test_empty_root_is_found_with_no_files() {
    let dir = TempDir::new().unwrap();
    let outcome = scan_directory(dir.path(), TRANSCRIPT_EXTENSION);

    assert_eq!(outcome, ScanOutcome::Found(Vec::new()));
}

#[test]
fn test_scan_is_recursive_and_sorted_newest_first() {
    let dir = TempDir::new().unwrap();
    let alpha = dir.path().join("-home-user-alpha");
    let beta = dir.path().join("-home-user-beta").join("nested");
    fs::create_dir_all(&alpha).unwrap();
    fs::create_dir_all(&beta).unwrap();

    write_with_mtime(&alpha.join("old.jsonl"), "{}", Duration::from_secs(3600));
    write_with_mtime(&beta.join("new.jsonl"), "{}", Duration::from_secs(10));
    write_with_mtime(&alpha.join("mid.jsonl"), "{}", Duration::from_secs(600));
    write_with_mtime(&alpha.join("notes.txt"), "ignored", Duration::from_secs(1));
    // Hidden files are still transcripts.
    write_with_mtime(&alpha.join(".hidden.jsonl"), "{}", Duration::from_secs(7200));

    let files = found(dir.path());
    let names: Vec<&str> = files
        .iter()
        .map(|f| f.path.file_name().unwrap().to_str().unwrap())
        .collect();

    assert_eq!(names, vec!["new.jsonl", "mid.jsonl", "old.jsonl", ".hidden.jsonl"]);
    assert!(files.windows(2).all(|w| w[0].modified_time >= w[1].modified_time));
}

#[test]
fn test_rescan_after_change_classifies_modified() {
    let dir = TempDir::new().unwrap();
    let project = dir.path().join("project");
    fs::create_dir_all(&project).unwrap();
    let a = project.join("a.jsonl");
    let b = project.join("b.jsonl");
    write_with_mtime(&a, "{}", Duration::from_secs(120));
    write_with_mtime(&b, "{}", Duration::from_secs(120));

    let first = found(dir.path());
    let known: HashMap<_, _> = first
        .iter()
        .map(|f| (f.path.clone(), f.modified_time))
        .collect();

    write_with_mtime(&b, "{}\n{}", Duration::from_secs(5));
    let c = project.join("c.jsonl");
    write_with_mtime(&c, "{}", Duration::from_secs(5));

    let second = found(dir.path());
    let result = classify(&second, &known);

    assert_eq!(result.new_files.len(), 1);
    assert_eq!(result.new_files[0].path, c);
    assert_eq!(result.modified_files.len(), 1);
    assert_eq!(result.modified_files[0].path, b);
    assert_eq!(result.unchanged.len(), 1);
    assert_eq!(result.unchanged[0].path, a);
}
