//! Transcript discovery and change classification.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use ignore::WalkBuilder;

use crate::types::SessionFile;

/// Default transcript file extension.
pub const TRANSCRIPT_EXTENSION: &str = "jsonl";

/// Result of scanning the projects root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Transcripts found under the root, most recently modified first.
    Found(Vec<SessionFile>),
    /// The root directory does not exist.
    NoSessions,
}

/// Recursively list transcripts under `root`, sorted by modified time descending.
///
/// Unreadable entries are skipped; a missing root is reported as `NoSessions`.
pub fn scan_directory(root: &Path, extension: &str) -> ScanOutcome {
    if !root.is_dir() {
        tracing::info!(root = %root.display(), "Projects directory not found");
        return ScanOutcome::NoSessions;
    }

    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .build();

    let mut files: Vec<SessionFile> = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };

        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some(extension) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Failed to stat transcript");
                continue;
            }
        };

        match metadata.modified().ok().and_then(system_time_millis) {
            Some(modified_time) => files.push(SessionFile {
                path: path.to_path_buf(),
                modified_time,
            }),
            None => {
                tracing::debug!(path = %path.display(), "Transcript has no modified time");
            }
        }
    }

    files.sort_by(|a, b| {
        b.modified_time
            .cmp(&a.modified_time)
            .then_with(|| a.path.cmp(&b.path))
    });

    ScanOutcome::Found(files)
}

/// Scan results split against the previously ingested paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub new_files: Vec<SessionFile>,
    pub modified_files: Vec<SessionFile>,
    pub unchanged: Vec<SessionFile>,
}

impl Classification {
    /// New and modified files, in scan order.
    pub fn changed(&self) -> impl Iterator<Item = &SessionFile> {
        self.new_files.iter().chain(self.modified_files.iter())
    }
}

/// Split `files` into new, modified and unchanged by comparing modified
/// times against `known`. Never reads file contents.
pub fn classify(files: &[SessionFile], known: &HashMap<PathBuf, i64>) -> Classification {
    let mut classification = Classification::default();

    for file in files {
        match known.get(&file.path) {
            None => classification.new_files.push(file.clone()),
            Some(mtime) if *mtime != file.modified_time => {
                classification.modified_files.push(file.clone())
            }
            Some(_) => classification.unchanged.push(file.clone()),
        }
    }

    classification
}

/// Shared handle to the `path -> modified time` map of ingested transcripts.
#[derive(Debug, Clone, Default)]
pub struct KnownPaths {
    inner: Arc<Mutex<HashMap<PathBuf, i64>>>,
}

impl KnownPaths {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: HashMap<PathBuf, i64>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(map)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, i64>> {
        // The map holds plain values, so a poisoned lock is still consistent.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn replace(&self, map: HashMap<PathBuf, i64>) {
        *self.lock() = map;
    }

    pub fn insert(&self, path: PathBuf, modified_time: i64) {
        self.lock().insert(path, modified_time);
    }

    pub fn remove(&self, path: &Path) -> Option<i64> {
        self.lock().remove(path)
    }

    pub fn get(&self, path: &Path) -> Option<i64> {
        self.lock().get(path).copied()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn snapshot(&self) -> HashMap<PathBuf, i64> {
        self.lock().clone()
    }
}

/// Milliseconds since the Unix epoch.
pub fn system_time_millis(time: SystemTime) -> Option<i64> {
    time.duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| i64::try_from(d.as_millis()).ok())
}

/// Session id for a transcript: its file stem.
pub fn session_id_for(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string()
}

/// Project name for a transcript: the directory that contains it.
pub fn project_name_for(path: &Path) -> String {
    path.parent()
        .and_then(|p| p.file_name())
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, modified_time: i64) -> SessionFile {
        SessionFile {
            path: PathBuf::from(path),
            modified_time,
        }
    }

    #[test]
    fn test_classify_splits_new_modified_unchanged() {
        let known: HashMap<PathBuf, i64> =
            [(PathBuf::from("A"), 10), (PathBuf::from("B"), 20)].into_iter().collect();
        let scanned = vec![file("A", 10), file("B", 25), file("C", 5)];

        let result = classify(&scanned, &known);

        assert_eq!(result.new_files, vec![file("C", 5)]);
        assert_eq!(result.modified_files, vec![file("B", 25)]);
        assert_eq!(result.unchanged, vec![file("A", 10)]);
        assert_eq!(result.changed().count(), 2);
    }

    #[test]
    fn test_classify_empty_known_map() {
        let result = classify(&[file("A", 1)], &HashMap::new());
        assert_eq!(result.new_files.len(), 1);
        assert!(result.modified_files.is_empty());
        assert!(result.unchanged.is_empty());
    }

    #[test]
    fn test_session_and_project_names() {
        let path = Path::new("/root/projects/-home-user-app/abc-123.jsonl");
        assert_eq!(session_id_for(path), "abc-123");
        assert_eq!(project_name_for(path), "-home-user-app");
    }

    #[test]
    fn test_known_paths_shared_between_clones() {
        let known = KnownPaths::new();
        let handle = known.clone();
        handle.insert(PathBuf::from("a.jsonl"), 42);
        assert_eq!(known.get(Path::new("a.jsonl")), Some(42));
        assert_eq!(known.remove(Path::new("a.jsonl")), Some(42));
        assert!(handle.is_empty());
    }
}
