//! Symlink projection of catalog queries onto a directory.
//!
//! Builds a browsable view of a local lake: one symlink per selected entry,
//! pointing at the stored object. The destination directory is owned by the
//! projection; it may only contain symlinks and directories.

use crate::catalog::Catalog;
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::lake::Lake;
use crate::query::Query;
use crate::store::BlobStore;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

fn invalid_input(message: String) -> Error {
    Error::Io {
        source: io::Error::new(io::ErrorKind::InvalidInput, message),
    }
}

/// Collect symlinks and directories under `dir`, failing on anything else.
fn scan(dir: &Path, links: &mut Vec<PathBuf>, dirs: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let file_type = fs::symlink_metadata(&path)?.file_type();

        if file_type.is_symlink() {
            links.push(path);
        } else if file_type.is_dir() {
            scan(&path, links, dirs)?;
            dirs.push(path);
        } else {
            return Err(Error::Io {
                source: io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} is not a symlink", path.display()),
                ),
            });
        }
    }
    Ok(())
}

/// Reject plans where two links share a path or one link sits below another.
fn check_conflicts(plan: &[(PathBuf, PathBuf)]) -> Result<()> {
    let mut seen = HashSet::with_capacity(plan.len());
    for (_, link) in plan {
        if !seen.insert(link.as_path()) {
            return Err(invalid_input(format!(
                "Two entries map to the same link {}",
                link.display()
            )));
        }
    }
    for (_, link) in plan {
        if let Some(parent) = link.ancestors().skip(1).find(|a| seen.contains(a)) {
            return Err(invalid_input(format!(
                "Link {} would be created inside link {}",
                link.display(),
                parent.display()
            )));
        }
    }
    Ok(())
}

/// Replace the contents of `dest` with one symlink per entry matching `query`.
///
/// `name_fn` gives each link's path relative to `dest`; it must not be
/// absolute or contain `..`. Every stored object must exist. Nothing under
/// `dest` is touched until all link targets have been resolved and `dest` is
/// known to hold only symlinks and directories, and no two links collide.
/// Returns the number of links.
pub fn project_links<S, C, M, F>(
    lake: &Lake<S, C>,
    dest: &Path,
    query: &Query,
    name_fn: F,
) -> Result<usize>
where
    S: BlobStore,
    C: Catalog,
    M: DeserializeOwned,
    F: Fn(&Entry<M>) -> PathBuf,
{
    let entries: Vec<Entry<M>> = lake.select(query)?;

    let mut plan = Vec::with_capacity(entries.len());
    for entry in &entries {
        let stored = lake.to_path(entry)?;
        let target = fs::canonicalize(&stored).map_err(|e| Error::storage_read(&stored, e))?;

        let name = name_fn(entry);
        if name.as_os_str().is_empty()
            || name
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(invalid_input(format!(
                "Link name {} must be a relative path without '..'",
                name.display()
            )));
        }
        plan.push((target, dest.join(name)));
    }
    check_conflicts(&plan)?;

    fs::create_dir_all(dest)?;
    let mut old_links = Vec::new();
    let mut old_dirs = Vec::new();
    scan(dest, &mut old_links, &mut old_dirs)?;

    for link in &old_links {
        fs::remove_file(link)?;
    }
    // Deepest directories were pushed first
    for dir in &old_dirs {
        fs::remove_dir(dir)?;
    }
    debug!(
        removed_links = old_links.len(),
        removed_dirs = old_dirs.len(),
        "cleared projection"
    );

    for (target, link) in &plan {
        if let Some(parent) = link.parent() {
            fs::create_dir_all(parent)?;
        }
        std::os::unix::fs::symlink(target, link)?;
    }

    info!(dest = %dest.display(), links = plan.len(), "projected links");
    Ok(plan.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lake::LocalLake;
    use crate::migrate::{SourceFile, migrate_tree};
    use tempfile::TempDir;

    fn lake_with_files(temp_dir: &TempDir) -> LocalLake {
        let source = temp_dir.path().join("source");
        fs::create_dir_all(source.join("sub")).unwrap();
        fs::write(source.join("a.txt"), "alpha").unwrap();
        fs::write(source.join("sub/b.txt"), "beta").unwrap();
        fs::write(source.join("c.md"), "gamma").unwrap();

        let lake = LocalLake::init(temp_dir.path().join("lake")).unwrap();
        migrate_tree(&lake, &source).unwrap();
        lake
    }

    fn by_path(entry: &Entry<SourceFile>) -> PathBuf {
        PathBuf::from(&entry.fields().path)
    }

    #[test]
    fn test_project_links() {
        let temp_dir = TempDir::new().unwrap();
        let lake = lake_with_files(&temp_dir);
        let dest = temp_dir.path().join("view");

        let count = project_links(
            &lake,
            &dest,
            &Query::all().where_eq("file_extension", ".txt"),
            by_path,
        )
        .unwrap();
        assert_eq!(count, 2);

        assert_eq!(fs::read_to_string(dest.join("a.txt")).unwrap(), "alpha");
        assert_eq!(fs::read_to_string(dest.join("sub/b.txt")).unwrap(), "beta");
        assert!(fs::symlink_metadata(dest.join("a.txt")).unwrap().file_type().is_symlink());
        assert!(!dest.join("c.md").exists());
    }

    #[test]
    fn test_project_links_replaces_previous_view() {
        let temp_dir = TempDir::new().unwrap();
        let lake = lake_with_files(&temp_dir);
        let dest = temp_dir.path().join("view");

        project_links(&lake, &dest, &Query::all(), by_path).unwrap();
        assert!(dest.join("sub/b.txt").exists());

        let count = project_links(
            &lake,
            &dest,
            &Query::all().where_eq("path", "c.md"),
            by_path,
        )
        .unwrap();
        assert_eq!(count, 1);
        assert!(dest.join("c.md").exists());
        assert!(!dest.join("a.txt").exists());
        assert!(!dest.join("sub").exists());
    }

    #[test]
    fn test_project_links_refuses_regular_files() {
        let temp_dir = TempDir::new().unwrap();
        let lake = lake_with_files(&temp_dir);
        let dest = temp_dir.path().join("view");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("precious"), "keep me").unwrap();

        assert!(project_links(&lake, &dest, &Query::all(), by_path).is_err());
        assert_eq!(fs::read_to_string(dest.join("precious")).unwrap(), "keep me");
    }

    #[test]
    fn test_colliding_names_keep_previous_view() {
        let temp_dir = TempDir::new().unwrap();
        let lake = lake_with_files(&temp_dir);
        let dest = temp_dir.path().join("view");
        project_links(&lake, &dest, &Query::all(), by_path).unwrap();

        let result = project_links(&lake, &dest, &Query::all(), |_: &Entry<SourceFile>| {
            PathBuf::from("same")
        });
        assert!(result.is_err());
        assert!(!dest.join("same").exists());
        assert_eq!(fs::read_to_string(dest.join("a.txt")).unwrap(), "alpha");
        assert_eq!(fs::read_to_string(dest.join("sub/b.txt")).unwrap(), "beta");
    }

    #[test]
    fn test_nested_names_are_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let lake = lake_with_files(&temp_dir);
        let dest = temp_dir.path().join("view");

        let result = project_links(&lake, &dest, &Query::all(), |entry: &Entry<SourceFile>| {
            if entry.fields().path == "a.txt" {
                PathBuf::from("x")
            } else {
                PathBuf::from("x").join(&entry.fields().path)
            }
        });
        assert!(result.is_err());
        assert!(!dest.exists());
    }

    #[test]
    fn test_project_links_rejects_escaping_names() {
        let temp_dir = TempDir::new().unwrap();
        let lake = lake_with_files(&temp_dir);
        let dest = temp_dir.path().join("view");

        let result = project_links(&lake, &dest, &Query::all(), |_: &Entry<SourceFile>| {
            PathBuf::from("../outside")
        });
        assert!(result.is_err());
        assert!(!dest.exists());
    }
}
