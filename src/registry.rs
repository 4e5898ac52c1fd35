//! Registry of tracked files and their reader/writer locks.
//!
//! Each entry follows the classic readers-preference scheme: a counter guarded
//! by a binary `mutex`, and a binary `write` lock taken by the first reader and
//! released by the last one. Writers take `write` directly, so a steady stream
//! of overlapping readers keeps a writer waiting indefinitely.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::cancel::CancelToken;
use crate::constants::{LOCK_WAIT_SLICE, LOG_FILE_NAME};
use crate::error::{GateError, Result};

/// Binary semaphore. Unlike a mutex guard it may be released by a different
/// thread than the one that acquired it, which the last-reader hand-off needs.
struct Semaphore {
    held: Mutex<bool>,
    freed: Condvar,
}

impl Semaphore {
    fn new() -> Self {
        Semaphore {
            held: Mutex::new(false),
            freed: Condvar::new(),
        }
    }

    /// Waits in `LOCK_WAIT_SLICE` steps; with a token, each step is a
    /// cancellation point.
    fn acquire(&self, cancel: Option<&CancelToken>) -> Result<()> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| GateError::LockPoisoned("file lock"))?;
        while *held {
            if let Some(token) = cancel {
                token.check()?;
            }
            let (guard, _) = self
                .freed
                .wait_timeout(held, LOCK_WAIT_SLICE)
                .map_err(|_| GateError::LockPoisoned("file lock"))?;
            held = guard;
        }
        *held = true;
        Ok(())
    }

    fn release(&self) -> Result<()> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| GateError::LockPoisoned("file lock"))?;
        *held = false;
        drop(held);
        self.freed.notify_one();
        Ok(())
    }

    fn is_held(&self) -> bool {
        self.held.lock().map(|held| *held).unwrap_or(true)
    }
}

pub struct FileEntry {
    name: String,
    mutex: Semaphore,
    readers: AtomicUsize,
    write_lock: Semaphore,
}

impl FileEntry {
    fn new(name: &str) -> Self {
        FileEntry {
            name: name.to_owned(),
            mutex: Semaphore::new(),
            readers: AtomicUsize::new(0),
            write_lock: Semaphore::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start_reading(&self, cancel: &CancelToken) -> Result<()> {
        self.mutex.acquire(Some(cancel))?;
        if self.readers.fetch_add(1, Ordering::SeqCst) == 0 {
            if let Err(err) = self.write_lock.acquire(Some(cancel)) {
                self.readers.fetch_sub(1, Ordering::SeqCst);
                self.mutex.release()?;
                return Err(err);
            }
        }
        self.mutex.release()
    }

    /// Never cancellable: a reader leaving must always get through.
    pub fn stop_reading(&self) -> Result<()> {
        self.mutex.acquire(None)?;
        if self.readers.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.write_lock.release()?;
        }
        self.mutex.release()
    }

    pub fn start_writing(&self, cancel: &CancelToken) -> Result<()> {
        self.write_lock.acquire(Some(cancel))
    }

    pub fn stop_writing(&self) -> Result<()> {
        self.write_lock.release()
    }

    pub fn read(&self, cancel: &CancelToken) -> Result<ReadGuard<'_>> {
        self.start_reading(cancel)?;
        Ok(ReadGuard { entry: self })
    }

    pub fn write(&self, cancel: &CancelToken) -> Result<WriteGuard<'_>> {
        self.start_writing(cancel)?;
        Ok(WriteGuard { entry: self })
    }

    pub fn reader_count(&self) -> usize {
        self.readers.load(Ordering::SeqCst)
    }

    /// Held by the readers as a group or by one writer.
    pub fn is_write_locked(&self) -> bool {
        self.write_lock.is_held()
    }
}

/// Shared access for the guard's lifetime.
pub struct ReadGuard<'a> {
    entry: &'a FileEntry,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.entry.stop_reading() {
            log::error!("releasing read lock on {}: {err}", self.entry.name);
        }
    }
}

/// Exclusive access for the guard's lifetime.
pub struct WriteGuard<'a> {
    entry: &'a FileEntry,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.entry.stop_writing() {
            log::error!("releasing write lock on {}: {err}", self.entry.name);
        }
    }
}

/// The table shared by every session worker. Entries live as long as the
/// server.
pub struct Registry {
    entries: Mutex<Vec<Arc<FileEntry>>>,
    capacity: usize,
}

impl Registry {
    pub fn new(capacity: usize) -> Self {
        Registry {
            entries: Mutex::new(Vec::new()),
            capacity,
        }
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, Vec<Arc<FileEntry>>>> {
        self.entries
            .lock()
            .map_err(|_| GateError::LockPoisoned("registry"))
    }

    pub fn find(&self, name: &str) -> Result<Option<Arc<FileEntry>>> {
        Ok(self.entries()?.iter().find(|e| e.name == name).cloned())
    }

    /// Lookup and creation happen under one lock, so two sessions racing on
    /// the same new name end up with the same entry.
    pub fn find_or_create(&self, name: &str) -> Result<Arc<FileEntry>> {
        let mut entries = self.entries()?;
        if let Some(entry) = entries.iter().find(|e| e.name == name) {
            return Ok(entry.clone());
        }
        if entries.len() >= self.capacity {
            return Err(GateError::RegistryFull);
        }
        let entry = Arc::new(FileEntry::new(name));
        entries.push(entry.clone());
        log::debug!("tracking {name}");
        Ok(entry)
    }

    /// Registers every regular file already present in `root`, except the
    /// server log. Returns how many entries were added.
    pub fn scan(&self, root: &Path) -> Result<usize> {
        let before = self.len();
        let dir = fs::read_dir(root).map_err(GateError::io("scan root"))?;
        for item in dir {
            let item = item.map_err(GateError::io("scan root"))?;
            let is_file = item.file_type().map(|t| t.is_file()).unwrap_or(false);
            let Some(name) = item.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if !is_file || name == LOG_FILE_NAME {
                continue;
            }
            match self.find_or_create(&name) {
                Ok(_) => {}
                Err(GateError::RegistryFull) => {
                    log::warn!("registry full, {name} and later files are untracked");
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(self.len().saturating_sub(before))
    }

    /// Tracked names in creation order.
    pub fn names(&self) -> Result<Vec<String>> {
        Ok(self.entries()?.iter().map(|e| e.name.clone()).collect())
    }

    pub fn len(&self) -> usize {
        self.entries().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_reader_takes_write_lock_last_releases_it() {
        let entry = FileEntry::new("a.txt");
        let cancel = CancelToken::new();

        entry.start_reading(&cancel).unwrap();
        assert!(entry.is_write_locked());
        entry.start_reading(&cancel).unwrap();
        assert_eq!(entry.reader_count(), 2);

        entry.stop_reading().unwrap();
        assert!(entry.is_write_locked());
        entry.stop_reading().unwrap();
        assert_eq!(entry.reader_count(), 0);
        assert!(!entry.is_write_locked());
    }

    #[test]
    fn cancelled_reader_leaves_no_trace() {
        let entry = FileEntry::new("b.txt");
        let cancel = CancelToken::new();
        let _writer = entry.write(&cancel).unwrap();

        let reader_cancel = CancelToken::new();
        reader_cancel.cancel();
        assert!(matches!(
            entry.start_reading(&reader_cancel),
            Err(GateError::Cancelled)
        ));
        assert_eq!(entry.reader_count(), 0);
        assert!(!entry.mutex.is_held());
    }

    #[test]
    fn registry_is_idempotent_and_bounded() {
        let registry = Registry::new(2);
        let a = registry.find_or_create("a").unwrap();
        let again = registry.find_or_create("a").unwrap();
        assert!(Arc::ptr_eq(&a, &again));
        registry.find_or_create("b").unwrap();
        assert!(matches!(
            registry.find_or_create("c"),
            Err(GateError::RegistryFull)
        ));
        assert!(registry.find("c").unwrap().is_none());
        assert_eq!(registry.names().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn scan_skips_log_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        fs::write(dir.path().join(LOG_FILE_NAME), b"log").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let registry = Registry::new(10);
        assert_eq!(registry.scan(dir.path()).unwrap(), 1);
        assert_eq!(registry.names().unwrap(), vec!["notes.txt"]);

        // Already tracked names are not counted again.
        fs::write(dir.path().join("later.txt"), b"y").unwrap();
        assert_eq!(registry.scan(dir.path()).unwrap(), 1);
        assert_eq!(registry.scan(dir.path()).unwrap(), 0);
    }
}
