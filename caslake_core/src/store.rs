//! Blob store adapters.
//!
//! A [`BlobStore`] is a byte-addressed store keyed by path strings. The lake
//! only ever writes whole objects, renames them, deletes them and reads them
//! back; it never mutates an object in place.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Cursor, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Contract the lake needs from a blob backend.
///
/// Missing objects must be reported as [`Error::NotFound`] so callers can tell
/// them apart from backend failures.
pub trait BlobStore {
    /// Write everything `reader` yields to `path`, replacing any existing object.
    ///
    /// Returns the number of bytes written. A failed write must not leave a
    /// partial object behind at `path`.
    fn write(&self, path: &str, reader: &mut dyn Read) -> Result<u64>;

    /// Move the object at `from` to `to`, replacing any existing object at `to`.
    fn move_object(&self, from: &str, to: &str) -> Result<()>;

    /// Delete the object at `path`.
    fn delete(&self, path: &str) -> Result<()>;

    /// Read the whole object at `path`.
    fn read_bytes(&self, path: &str) -> Result<Vec<u8>>;

    /// Open the object at `path` for streaming reads.
    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>>;

    /// Check whether an object exists at `path`.
    fn exists(&self, path: &str) -> Result<bool>;

    /// List the objects directly under `dir`, as full paths in sorted order.
    ///
    /// A missing directory lists as empty.
    fn list(&self, dir: &str) -> Result<Vec<String>>;
}

/// Join a directory and a name with exactly one separator.
pub(crate) fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() || dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Blob store backed by the local filesystem.
///
/// Paths are filesystem paths. Parent directories are created on demand.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStore;

impl LocalStore {
    pub fn new() -> Self {
        LocalStore
    }

    fn ensure_parent(target: &Path) -> io::Result<&Path> {
        let parent = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;
        Ok(parent)
    }
}

impl BlobStore for LocalStore {
    fn write(&self, path: &str, reader: &mut dyn Read) -> Result<u64> {
        let target = Path::new(path);
        let parent = Self::ensure_parent(target).map_err(|e| Error::storage_write(path, e))?;

        // Stream into a tempfile next to the target, then persist atomically
        let mut temp_file =
            tempfile::NamedTempFile::new_in(parent).map_err(|e| Error::storage_write(path, e))?;
        let written = io::copy(reader, &mut temp_file).map_err(|e| Error::storage_write(path, e))?;
        temp_file
            .flush()
            .map_err(|e| Error::storage_write(path, e))?;
        temp_file
            .persist(target)
            .map_err(|e| Error::storage_write(path, e.error))?;

        Ok(written)
    }

    fn move_object(&self, from: &str, to: &str) -> Result<()> {
        let target = Path::new(to);
        Self::ensure_parent(target).map_err(|e| Error::storage_move(from, to, e))?;

        match fs::rename(from, target) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
                fs::copy(from, target).map_err(|e| Error::storage_move(from, to, e))?;
                fs::remove_file(from).map_err(|e| Error::storage_move(from, to, e))
            }
            Err(e) => Err(Error::storage_move(from, to, e)),
        }
    }

    fn delete(&self, path: &str) -> Result<()> {
        fs::remove_file(path).map_err(|e| Error::storage_delete(path, e))
    }

    fn read_bytes(&self, path: &str) -> Result<Vec<u8>> {
        fs::read(path).map_err(|e| Error::storage_read(path, e))
    }

    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        let file = fs::File::open(path).map_err(|e| Error::storage_read(path, e))?;
        Ok(Box::new(io::BufReader::new(file)))
    }

    fn exists(&self, path: &str) -> Result<bool> {
        Path::new(path)
            .try_exists()
            .map_err(|e| Error::storage_read(path, e))
    }

    fn list(&self, dir: &str) -> Result<Vec<String>> {
        let read_dir = match fs::read_dir(dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::storage_read(dir, e)),
        };

        let mut paths = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| Error::storage_read(dir, e))?;
            let file_type = entry.file_type().map_err(|e| Error::storage_read(dir, e))?;
            if !file_type.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                paths.push(join(dir, name));
            }
        }

        paths.sort();
        Ok(paths)
    }
}

/// Blob store held entirely in memory.
///
/// Stands in for a remote object store: paths are opaque keys and there are no
/// directories. Failures can be injected to exercise error paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
    fail_deletes: AtomicBool,
    moves_left: Mutex<Option<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent delete fail (or succeed again).
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Let `n` more moves succeed, then fail every move after that.
    pub fn fail_moves_after(&self, n: usize) {
        *lock(&self.moves_left) = Some(n);
    }

    /// Number of objects currently stored.
    pub fn len(&self) -> usize {
        lock(&self.objects).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all stored paths.
    pub fn paths(&self) -> Vec<String> {
        lock(&self.objects).keys().cloned().collect()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BlobStore for MemoryStore {
    fn write(&self, path: &str, reader: &mut dyn Read) -> Result<u64> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::storage_write(
                path,
                io::Error::other("injected write failure"),
            ));
        }

        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .map_err(|e| Error::storage_write(path, e))?;
        let written = data.len() as u64;
        lock(&self.objects).insert(path.to_string(), data);
        Ok(written)
    }

    fn move_object(&self, from: &str, to: &str) -> Result<()> {
        {
            let mut moves_left = lock(&self.moves_left);
            match moves_left.as_mut() {
                Some(0) => {
                    return Err(Error::storage_move(
                        from,
                        to,
                        io::Error::other("injected move failure"),
                    ));
                }
                Some(n) => *n -= 1,
                None => {}
            }
        }

        let mut objects = lock(&self.objects);
        let data = objects.remove(from).ok_or_else(|| Error::not_found(from))?;
        objects.insert(to.to_string(), data);
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Error::storage_delete(
                path,
                io::Error::other("injected delete failure"),
            ));
        }
        lock(&self.objects)
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(path))
    }

    fn read_bytes(&self, path: &str) -> Result<Vec<u8>> {
        lock(&self.objects)
            .get(path)
            .cloned()
            .ok_or_else(|| Error::not_found(path))
    }

    fn open(&self, path: &str) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.read_bytes(path)?)))
    }

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(lock(&self.objects).contains_key(path))
    }

    fn list(&self, dir: &str) -> Result<Vec<String>> {
        let prefix = join(dir, "");
        Ok(lock(&self.objects)
            .keys()
            .filter(|key| {
                key.strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn base(temp_dir: &TempDir) -> String {
        format!("{}/store/", temp_dir.path().display())
    }

    #[test]
    fn test_join() {
        assert_eq!(join("a", "b"), "a/b");
        assert_eq!(join("a/", "b"), "a/b");
        assert_eq!(join("", "b"), "b");
    }

    #[test]
    fn test_local_write_creates_parents() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::new();
        let path = format!("{}nested/obj", base(&temp_dir));

        let written = store.write(&path, &mut &b"hello"[..]).unwrap();
        assert_eq!(written, 5);
        assert_eq!(store.read_bytes(&path).unwrap(), b"hello");
    }

    #[test]
    fn test_local_move_and_delete() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::new();
        let from = format!("{}tmp", base(&temp_dir));
        let to = format!("{}final.txt", base(&temp_dir));

        store.write(&from, &mut &b"data"[..]).unwrap();
        store.move_object(&from, &to).unwrap();

        assert!(!store.exists(&from).unwrap());
        assert!(store.exists(&to).unwrap());

        let mut contents = String::new();
        store.open(&to).unwrap().read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "data");

        store.delete(&to).unwrap();
        assert!(store.delete(&to).unwrap_err().is_not_found());
    }

    #[test]
    fn test_local_missing_object_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::new();
        let path = format!("{}missing", base(&temp_dir));

        assert!(store.read_bytes(&path).unwrap_err().is_not_found());
        assert!(store.open(&path).is_err());
        assert!(store.move_object(&path, "elsewhere").unwrap_err().is_not_found());
    }

    #[test]
    fn test_local_list() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::new();
        let dir = base(&temp_dir);

        assert!(store.list(&dir).unwrap().is_empty());

        store.write(&format!("{}b", dir), &mut &b"2"[..]).unwrap();
        store.write(&format!("{}a", dir), &mut &b"1"[..]).unwrap();
        store.write(&format!("{}sub/c", dir), &mut &b"3"[..]).unwrap();

        let listed = store.list(&dir).unwrap();
        assert_eq!(listed, vec![format!("{}a", dir), format!("{}b", dir)]);
    }

    #[test]
    fn test_local_failed_write_leaves_nothing() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::other("source failed"))
            }
        }

        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::new();
        let dir = base(&temp_dir);
        let path = format!("{}obj", dir);

        let err = store.write(&path, &mut Broken).unwrap_err();
        assert!(matches!(err, Error::StorageWrite { .. }));
        assert!(!store.exists(&path).unwrap());
        assert!(store.list(&dir).unwrap().is_empty());
    }

    #[test]
    fn test_memory_roundtrip() {
        let store = MemoryStore::new();
        store.write("base/tmp", &mut &b"abc"[..]).unwrap();
        store.move_object("base/tmp", "base/final").unwrap();

        assert_eq!(store.read_bytes("base/final").unwrap(), b"abc");
        assert_eq!(store.paths(), vec!["base/final".to_string()]);
        assert!(store.read_bytes("base/tmp").unwrap_err().is_not_found());
    }

    #[test]
    fn test_memory_list_is_one_level() {
        let store = MemoryStore::new();
        store.write("base/a", &mut &b""[..]).unwrap();
        store.write("base/sub/b", &mut &b""[..]).unwrap();
        store.write("other/c", &mut &b""[..]).unwrap();

        assert_eq!(store.list("base/").unwrap(), vec!["base/a".to_string()]);
        assert_eq!(store.list("base").unwrap(), vec!["base/a".to_string()]);
    }

    #[test]
    fn test_memory_injected_failures() {
        let store = MemoryStore::new();

        store.fail_writes(true);
        assert!(matches!(
            store.write("a", &mut &b"x"[..]),
            Err(Error::StorageWrite { .. })
        ));
        assert!(store.is_empty());
        store.fail_writes(false);

        store.write("a", &mut &b"x"[..]).unwrap();
        store.write("b", &mut &b"y"[..]).unwrap();
        store.fail_moves_after(1);
        store.move_object("a", "a2").unwrap();
        assert!(matches!(
            store.move_object("b", "b2"),
            Err(Error::StorageMove { .. })
        ));
        assert!(store.exists("b").unwrap());

        store.fail_deletes(true);
        assert!(matches!(store.delete("b"), Err(Error::StorageDelete { .. })));
        assert!(store.exists("b").unwrap());
    }
}
