//! Per-database readers/writers locking.
//!
//! Any number of readers may use a database at once; writers go one at a
//! time and block everything. Writers take precedence: a waiting writer
//! stops new readers from entering, so a steady read load cannot starve
//! writes. One lock instance is shared per database identity
//! (path), looked up through [`for_database`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, OnceLock, PoisonError};

#[derive(Debug, Default)]
struct State {
    readers: usize,
    writer: bool,
    writers_waiting: usize,
}

/// A single-writer / multi-reader lock with writer preference.
#[derive(Debug, Default)]
pub struct DatabaseLock {
    state: Mutex<State>,
    cond: Condvar,
}

impl DatabaseLock {
    /// A fresh, unshared lock. Production code goes through
    /// [`for_database`] so every backend instance on one path shares it.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire shared read access.
    pub fn read(&self) -> ReadGuard<'_> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while state.writer || state.writers_waiting > 0 {
            state = self.cond.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        state.readers += 1;
        ReadGuard { lock: self }
    }

    /// Acquire exclusive write access.
    pub fn write(&self) -> WriteGuard<'_> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.writers_waiting += 1;
        while state.writer || state.readers > 0 {
            state = self.cond.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        state.writers_waiting -= 1;
        state.writer = true;
        WriteGuard { lock: self }
    }
}

/// Shared read access; released on drop.
#[derive(Debug)]
pub struct ReadGuard<'a> {
    lock: &'a DatabaseLock,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.readers -= 1;
        if state.readers == 0 {
            self.lock.cond.notify_all();
        }
    }
}

/// Exclusive write access; released on drop.
#[derive(Debug)]
pub struct WriteGuard<'a> {
    lock: &'a DatabaseLock,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.writer = false;
        self.lock.cond.notify_all();
    }
}

static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<DatabaseLock>>>> = OnceLock::new();

/// The shared lock for a database path.
pub fn for_database(path: &Path) -> Arc<DatabaseLock> {
    let locks = LOCKS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut locks = locks.lock().unwrap_or_else(PoisonError::into_inner);
    locks.entry(path.to_path_buf()).or_default().clone()
}
