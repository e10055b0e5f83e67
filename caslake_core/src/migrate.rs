//! Bulk import of a directory tree.

use crate::catalog::Catalog;
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::lake::Lake;
use crate::store::BlobStore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Caller fields recorded for every migrated file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Path relative to the migrated root, `/`-separated.
    pub path: String,
}

/// Statistics from a migration run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct MigrateStats {
    /// Number of files committed.
    pub files: usize,
    /// Total bytes committed.
    pub bytes: u64,
}

/// File extension in the form stored on entries: `".txt"`, or empty.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default()
}

/// Import every regular file under `source` in a single transaction.
///
/// Hidden files are included. `.gitignore` files inside `source` are
/// respected whether or not it is a git checkout; `.ignore` files, parent
/// directories and global git excludes are not consulted. Symlinks are
/// skipped. If anything fails, nothing is committed.
pub fn migrate_tree<S: BlobStore, C: Catalog>(
    lake: &Lake<S, C>,
    source: &Path,
) -> Result<MigrateStats> {
    if !source.is_dir() {
        return Err(Error::Io {
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Not a directory: {}", source.display()),
            ),
        });
    }

    let walker = ignore::WalkBuilder::new(source)
        .hidden(false) // Include hidden files
        .git_ignore(true) // Respect .gitignore
        .require_git(false)
        .ignore(false)
        .parents(false)
        .git_global(false)
        .git_exclude(false)
        .sort_by_file_path(|a, b| a.cmp(b))
        .build();

    let stats = lake.with_transaction(|tx| {
        let mut stats = MigrateStats::default();

        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }

            let path = entry.path();
            let relative = path
                .strip_prefix(source)
                .ok()
                .and_then(|p| p.to_str())
                .ok_or_else(|| {
                    Error::Io {
                        source: std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            format!("Unsupported file name: {}", path.display()),
                        ),
                    }
                })?
                .replace(std::path::MAIN_SEPARATOR, "/");

            let size = entry.metadata()?.len();
            let file = fs::File::open(path)?;
            tx.put(file, Entry::new(extension_of(path), SourceFile { path: relative.clone() }))?;
            debug!(path = %relative, size, "migrating file");

            stats.files += 1;
            stats.bytes += size;
        }

        tx.commit()?;
        Ok(stats)
    })?;

    info!(
        source = %source.display(),
        files = stats.files,
        bytes = stats.bytes,
        "migration committed"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::lake::LocalLake;
    use crate::query::{Order, Query};
    use crate::store::MemoryStore;
    use tempfile::TempDir;

    fn source_tree() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("docs/deep")).unwrap();
        fs::write(root.join("readme.md"), "# hello").unwrap();
        fs::write(root.join("docs/a.txt"), "alpha").unwrap();
        fs::write(root.join("docs/deep/b.tar.gz"), "beta").unwrap();
        fs::write(root.join(".hidden"), "secret").unwrap();
        temp_dir
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of(Path::new("a/b.txt")), ".txt");
        assert_eq!(extension_of(Path::new("b.tar.gz")), ".gz");
        assert_eq!(extension_of(Path::new("Makefile")), "");
        assert_eq!(extension_of(Path::new(".bashrc")), "");
    }

    #[test]
    fn test_migrate_tree() {
        let source = source_tree();
        let lake = Lake::new(MemoryStore::new(), MemoryCatalog::new(), "lake/store");

        let stats = migrate_tree(&lake, source.path()).unwrap();
        assert_eq!(stats.files, 4);
        assert_eq!(stats.bytes, 7 + 5 + 4 + 6);

        let entries: Vec<Entry<SourceFile>> = lake
            .select(&Query::all().order_by("path", Order::Asc))
            .unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.fields().path.as_str()).collect();
        assert_eq!(
            paths,
            vec![".hidden", "docs/a.txt", "docs/deep/b.tar.gz", "readme.md"]
        );

        let readme = &entries[3];
        assert_eq!(readme.file_extension(), ".md");
        assert_eq!(lake.read_bytes(readme).unwrap(), b"# hello");
        assert_eq!(lake.store().len(), 4);
    }

    #[test]
    fn test_migrate_only_honors_local_gitignore() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("a.txt"), "a").unwrap();
        fs::write(root.join("b.log"), "b").unwrap();
        fs::write(root.join(".ignore"), "*.txt\n").unwrap();
        fs::write(root.join(".gitignore"), "*.log\n").unwrap();

        let lake = Lake::new(MemoryStore::new(), MemoryCatalog::new(), "lake/store");
        migrate_tree(&lake, root).unwrap();

        let entries: Vec<Entry<SourceFile>> = lake
            .select(&Query::all().order_by("path", Order::Asc))
            .unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.fields().path.as_str()).collect();
        assert_eq!(paths, vec![".gitignore", ".ignore", "a.txt"]);
    }

    #[test]
    fn test_migrate_failure_commits_nothing() {
        let source = source_tree();
        let lake = Lake::new(MemoryStore::new(), MemoryCatalog::new(), "lake/store");
        lake.catalog().fail_inserts(true);

        assert!(migrate_tree(&lake, source.path()).is_err());

        // Promoted objects may remain, but nothing is staged or catalogued
        assert!(lake.catalog().is_empty());
        assert!(!lake.is_busy());
    }

    #[test]
    fn test_migrate_missing_source() {
        let temp_dir = TempDir::new().unwrap();
        let lake = LocalLake::init(temp_dir.path().join("lake")).unwrap();
        assert!(migrate_tree(&lake, &temp_dir.path().join("nope")).is_err());
    }

    #[test]
    fn test_migrate_into_local_lake() {
        let source = source_tree();
        let temp_dir = TempDir::new().unwrap();
        let lake = LocalLake::init(temp_dir.path().join("lake")).unwrap();

        migrate_tree(&lake, source.path()).unwrap();

        let entries: Vec<Entry<SourceFile>> = lake
            .select(&Query::all().where_eq("path", "docs/a.txt"))
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(lake.read_bytes(&entries[0]).unwrap(), b"alpha");
        assert!(lake.to_path(&entries[0]).unwrap().ends_with(".txt"));
    }
}
