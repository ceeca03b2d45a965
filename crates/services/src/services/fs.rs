use std::{
    io::Write,
    path::{Component, Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("Io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Path escapes its root: {0}")]
    PathOutsideRoot(PathBuf),
    #[error("Deploy paths must stay under {prefix}: {path}")]
    OutsidePrefix { prefix: String, path: PathBuf },
    #[error("Atomic replace of {path} failed: {source}")]
    AtomicReplaceFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Checksum mismatch at {0}")]
    ChecksumMismatch(PathBuf),
    #[error("Malformed journal at {0}")]
    MalformedJournal(PathBuf),
}

/// Deploy target subtree; `resolve_path` enforces this prefix for deploy
/// and context operations.
pub const CLAUDE_DIR: &str = ".claude";

/// Name of the journal file written before multi-subtree renames.
pub const JOURNAL_FILE: &str = ".skillmeat-journal.json";

/// One planned rename in a multi-subtree apply. `applied` flips after the
/// rename lands, so a crashed apply is detectable and resumable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub relative_path: String,
    pub applied: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployJournal {
    pub operation: String,
    pub entries: Vec<JournalEntry>,
}

/// All filesystem I/O used by the core goes through this adapter; no other
/// component touches the disk directly.
#[derive(Debug, Clone, Default)]
pub struct FsService;

impl FsService {
    pub fn new() -> Self {
        FsService
    }

    /// Canonical content bytes: CRLF normalized to LF. Hashing and merge
    /// operate on this form so line-ending churn never reads as drift.
    pub fn canonicalize_bytes(bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'\r' && bytes.get(i + 1) == Some(&b'\n') {
                i += 1;
                continue;
            }
            out.push(bytes[i]);
            i += 1;
        }
        out
    }

    /// SHA-256 hex digest over the canonical form of `bytes`.
    pub fn compute_content_hash(bytes: &[u8]) -> String {
        let canonical = Self::canonicalize_bytes(bytes);
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        hex_digest(hasher)
    }

    pub fn read_file(&self, path: &Path) -> Result<Vec<u8>, FsError> {
        std::fs::read(path).map_err(|source| FsError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn read_file_with_hash(&self, path: &Path) -> Result<(Vec<u8>, String), FsError> {
        let bytes = self.read_file(path)?;
        let hash = Self::compute_content_hash(&bytes);
        Ok((bytes, hash))
    }

    /// Atomic single-file write: temp file in the destination directory,
    /// then rename over the target.
    pub fn write_file(&self, path: &Path, bytes: &[u8]) -> Result<(), FsError> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(|source| FsError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|source| FsError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
        tmp.write_all(bytes).map_err(|source| FsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tmp.persist(path).map_err(|err| FsError::Io {
            path: path.to_path_buf(),
            source: err.error,
        })?;
        Ok(())
    }

    /// Validate `relative` against its root: no absolute paths, no `..`.
    /// When `require_prefix` is set the first component must equal it
    /// (deploy and context operations pass `.claude`).
    pub fn resolve_path(
        &self,
        root: &Path,
        relative: &Path,
        require_prefix: Option<&str>,
    ) -> Result<PathBuf, FsError> {
        if relative.is_absolute() {
            return Err(FsError::PathOutsideRoot(relative.to_path_buf()));
        }
        let mut components = relative.components().peekable();
        if let Some(prefix) = require_prefix {
            match components.peek() {
                Some(Component::Normal(first)) if *first == std::ffi::OsStr::new(prefix) => {}
                _ => {
                    return Err(FsError::OutsidePrefix {
                        prefix: prefix.to_string(),
                        path: relative.to_path_buf(),
                    });
                }
            }
        }
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(FsError::PathOutsideRoot(relative.to_path_buf())),
            }
        }
        Ok(root.join(relative))
    }

    /// Drift probe. Missing or unreadable paths report `false` (safer
    /// default); a present path reports `true` iff its hash differs.
    /// Directories are compared by tree root hash.
    pub fn detect_changes(&self, expected_hash: &str, path: &Path) -> bool {
        let actual = if path.is_dir() {
            match self.ls_tree(path) {
                Ok(entries) => Self::tree_root_hash(&entries),
                Err(_) => return false,
            }
        } else {
            match self.read_file_with_hash(path) {
                Ok((_, hash)) => hash,
                Err(_) => return false,
            }
        };
        actual != expected_hash
    }

    /// Sorted `(relative_path, content_hash)` pairs for every file under
    /// `root`. Journal files are excluded; they are bookkeeping, not
    /// content. Paths use forward slashes.
    pub fn ls_tree(&self, root: &Path) -> Result<Vec<(String, String)>, FsError> {
        let mut entries = Vec::new();
        if !root.exists() {
            return Ok(entries);
        }
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|err| FsError::Io {
                path: root.to_path_buf(),
                source: err.into(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.file_name().to_string_lossy() == JOURNAL_FILE {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(root)
                .map_err(|_| FsError::PathOutsideRoot(entry.path().to_path_buf()))?;
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let (_, hash) = self.read_file_with_hash(entry.path())?;
            entries.push((relative, hash));
        }
        entries.sort();
        Ok(entries)
    }

    /// Merkle-style root over a sorted `(path, hash)` list. Stable across
    /// platforms because paths are slash-normalized and sorted.
    pub fn tree_root_hash(entries: &[(String, String)]) -> String {
        let mut hasher = Sha256::new();
        for (path, hash) in entries {
            hasher.update(path.as_bytes());
            hasher.update([0u8]);
            hasher.update(hash.as_bytes());
            hasher.update([b'\n']);
        }
        hex_digest(hasher)
    }

    /// Hash of a whole directory's content (root of its `ls_tree`).
    pub fn dir_content_hash(&self, root: &Path) -> Result<String, FsError> {
        let entries = self.ls_tree(root)?;
        Ok(Self::tree_root_hash(&entries))
    }

    /// Create a staging directory on the same filesystem as `destination`
    /// so the final rename cannot cross devices.
    pub fn create_staging_dir(&self, destination: &Path) -> Result<tempfile::TempDir, FsError> {
        let parent = destination.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(|source| FsError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
        tempfile::Builder::new()
            .prefix(".skillmeat-staging-")
            .tempdir_in(parent)
            .map_err(|source| FsError::Io {
                path: parent.to_path_buf(),
                source,
            })
    }

    /// Atomically replace `target_dir` with `staging_dir`. The previous
    /// tree is moved aside first and restored if the swap fails.
    pub fn atomic_replace_dir(&self, target_dir: &Path, staging_dir: &Path) -> Result<(), FsError> {
        let backup = target_dir.with_extension("skillmeat-bak");
        if backup.exists() {
            std::fs::remove_dir_all(&backup).map_err(|source| FsError::AtomicReplaceFailed {
                path: target_dir.to_path_buf(),
                source,
            })?;
        }
        let had_target = target_dir.exists();
        if had_target {
            std::fs::rename(target_dir, &backup).map_err(|source| {
                FsError::AtomicReplaceFailed {
                    path: target_dir.to_path_buf(),
                    source,
                }
            })?;
        } else if let Some(parent) = target_dir.parent() {
            std::fs::create_dir_all(parent).map_err(|source| FsError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        match std::fs::rename(staging_dir, target_dir) {
            Ok(()) => {
                if had_target {
                    let _ = std::fs::remove_dir_all(&backup);
                }
                Ok(())
            }
            Err(source) => {
                if had_target {
                    let _ = std::fs::rename(&backup, target_dir);
                }
                Err(FsError::AtomicReplaceFailed {
                    path: target_dir.to_path_buf(),
                    source,
                })
            }
        }
    }

    /// Copy a tree into `destination` (used to materialize staging dirs).
    pub fn copy_tree(&self, source: &Path, destination: &Path) -> Result<(), FsError> {
        for entry in WalkDir::new(source) {
            let entry = entry.map_err(|err| FsError::Io {
                path: source.to_path_buf(),
                source: err.into(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(source)
                .map_err(|_| FsError::PathOutsideRoot(entry.path().to_path_buf()))?;
            let bytes = self.read_file(entry.path())?;
            self.write_file(&destination.join(relative), &bytes)?;
        }
        Ok(())
    }

    /// Write the journal before an ordered multi-subtree apply.
    pub fn write_journal(&self, root: &Path, journal: &DeployJournal) -> Result<(), FsError> {
        let path = root.join(JOURNAL_FILE);
        let bytes = serde_json::to_vec_pretty(journal)
            .map_err(|_| FsError::MalformedJournal(path.clone()))?;
        self.write_file(&path, &bytes)
    }

    /// A pending journal means a previous apply did not finish.
    pub fn pending_journal(&self, root: &Path) -> Result<Option<DeployJournal>, FsError> {
        let path = root.join(JOURNAL_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = self.read_file(&path)?;
        let journal = serde_json::from_slice(&bytes)
            .map_err(|_| FsError::MalformedJournal(path.clone()))?;
        Ok(Some(journal))
    }

    pub fn clear_journal(&self, root: &Path) -> Result<(), FsError> {
        let path = root.join(JOURNAL_FILE);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(FsError::Io { path, source }),
        }
    }

    /// Canonical absolute form of a project path for identity comparisons.
    pub fn canonical_project_path(&self, path: &Path) -> Result<PathBuf, FsError> {
        dunce::canonicalize(path).map_err(|source| FsError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn hex_digest(hasher: Sha256) -> String {
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_and_crlf_insensitive() {
        let lf = b"line one\nline two\n";
        let crlf = b"line one\r\nline two\r\n";
        assert_eq!(
            FsService::compute_content_hash(lf),
            FsService::compute_content_hash(lf)
        );
        assert_eq!(
            FsService::compute_content_hash(lf),
            FsService::compute_content_hash(crlf)
        );
        assert_ne!(
            FsService::compute_content_hash(lf),
            FsService::compute_content_hash(b"line one\nline 2\n")
        );
    }

    #[test]
    fn lone_carriage_return_is_preserved() {
        assert_ne!(
            FsService::compute_content_hash(b"a\rb"),
            FsService::compute_content_hash(b"ab")
        );
    }

    #[test]
    fn resolve_path_rejects_traversal() {
        let fs = FsService::new();
        let root = Path::new("/tmp/project");
        assert!(fs.resolve_path(root, Path::new("../etc/passwd"), None).is_err());
        assert!(fs.resolve_path(root, Path::new("/etc/passwd"), None).is_err());
        assert!(
            fs.resolve_path(root, Path::new("a/../../b"), None).is_err()
        );
        let ok = fs
            .resolve_path(root, Path::new(".claude/skills/x/SKILL.md"), Some(CLAUDE_DIR))
            .unwrap();
        assert_eq!(ok, root.join(".claude/skills/x/SKILL.md"));
        assert!(
            fs.resolve_path(root, Path::new("skills/x.md"), Some(CLAUDE_DIR))
                .is_err()
        );
    }

    #[test]
    fn detect_changes_defaults_false_when_missing() {
        let fs = FsService::new();
        assert!(!fs.detect_changes("deadbeef", Path::new("/nonexistent/file.txt")));
    }

    #[test]
    fn write_read_roundtrip_and_drift() {
        let fs = FsService::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes/SKILL.md");
        fs.write_file(&path, b"hello\n").unwrap();
        let (bytes, hash) = fs.read_file_with_hash(&path).unwrap();
        assert_eq!(bytes, b"hello\n");
        assert!(!fs.detect_changes(&hash, &path));
        fs.write_file(&path, b"changed\n").unwrap();
        assert!(fs.detect_changes(&hash, &path));
    }

    #[test]
    fn ls_tree_sorted_and_root_hash_stable() {
        let fs = FsService::new();
        let dir = tempfile::tempdir().unwrap();
        fs.write_file(&dir.path().join("b.txt"), b"b").unwrap();
        fs.write_file(&dir.path().join("a/one.txt"), b"1").unwrap();
        let entries = fs.ls_tree(dir.path()).unwrap();
        let paths: Vec<_> = entries.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["a/one.txt", "b.txt"]);
        let root_a = FsService::tree_root_hash(&entries);
        let root_b = FsService::tree_root_hash(&fs.ls_tree(dir.path()).unwrap());
        assert_eq!(root_a, root_b);
    }

    #[test]
    fn atomic_replace_dir_swaps_and_cleans_up() {
        let fs = FsService::new();
        let base = tempfile::tempdir().unwrap();
        let target = base.path().join("deployed");
        fs.write_file(&target.join("old.txt"), b"old").unwrap();

        let staging = fs.create_staging_dir(&target).unwrap();
        fs.write_file(&staging.path().join("new.txt"), b"new").unwrap();
        let staging_path = staging.keep();
        fs.atomic_replace_dir(&target, &staging_path).unwrap();

        assert!(target.join("new.txt").exists());
        assert!(!target.join("old.txt").exists());
        assert!(!target.with_extension("skillmeat-bak").exists());
    }

    #[test]
    fn journal_roundtrip() {
        let fs = FsService::new();
        let dir = tempfile::tempdir().unwrap();
        assert!(fs.pending_journal(dir.path()).unwrap().is_none());
        let journal = DeployJournal {
            operation: "deploy".to_string(),
            entries: vec![JournalEntry {
                relative_path: ".claude/skills/x".to_string(),
                applied: false,
            }],
        };
        fs.write_journal(dir.path(), &journal).unwrap();
        let read = fs.pending_journal(dir.path()).unwrap().unwrap();
        assert_eq!(read.entries.len(), 1);
        assert!(!read.entries[0].applied);
        fs.clear_journal(dir.path()).unwrap();
        assert!(fs.pending_journal(dir.path()).unwrap().is_none());
    }
}
