//! Single-key local persistence.
//!
//! Each store holds one value under one key. The file-backed store keeps it
//! in a file under the state directory; the memory store is used by tests.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
#[cfg(test)]
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

/// File name of the cached machine session
pub const SESSION_KEY: &str = "machine_session.json";
/// File name of the last detected venue id
pub const CURRENT_VENUE_KEY: &str = "current_venue";

pub trait LocalStore {
    /// Stored value, or `None` when nothing has been saved
    fn load(&self) -> Result<Option<String>>;
    fn save(&self, value: &str) -> Result<()>;
    /// Remove the value; removing a missing value succeeds
    fn clear(&self) -> Result<()>;
}

pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store for `key` inside `dir`
    pub fn in_dir(dir: &Path, key: &str) -> Self {
        Self::new(dir.join(key))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl LocalStore for FileStore {
    fn load(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", self.path.display())),
        }
    }

    fn save(&self, value: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        // Write then rename so a crash never leaves a half-written value
        let tmp = self.tmp_path();
        std::fs::write(&tmp, value)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", self.path.display())),
        }
    }
}

/// In-memory store. Clones share the same slot.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Rc<MemoryInner>,
}

#[cfg(test)]
#[derive(Debug, Default)]
struct MemoryInner {
    value: RefCell<Option<String>>,
    saves: Cell<usize>,
    clears: Cell<usize>,
    fail_writes: Cell<bool>,
}

#[cfg(test)]
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(value: &str) -> Self {
        let store = Self::new();
        *store.inner.value.borrow_mut() = Some(value.to_string());
        store
    }

    pub fn value(&self) -> Option<String> {
        self.inner.value.borrow().clone()
    }

    pub fn saves(&self) -> usize {
        self.inner.saves.get()
    }

    pub fn clears(&self) -> usize {
        self.inner.clears.get()
    }

    /// Make subsequent save/clear calls fail
    pub fn fail_writes(&self, fail: bool) {
        self.inner.fail_writes.set(fail);
    }
}

#[cfg(test)]
impl LocalStore for MemoryStore {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.value())
    }

    fn save(&self, value: &str) -> Result<()> {
        if self.inner.fail_writes.get() {
            anyhow::bail!("store is read-only");
        }
        self.inner.saves.set(self.inner.saves.get() + 1);
        *self.inner.value.borrow_mut() = Some(value.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if self.inner.fail_writes.get() {
            anyhow::bail!("store is read-only");
        }
        self.inner.clears.set(self.inner.clears.get() + 1);
        *self.inner.value.borrow_mut() = None;
        Ok(())
    }
}
