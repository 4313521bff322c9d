//! Reader and writer collaborators
//!
//! The patch service never touches overlay files itself. It asks a
//! [`ModReader`] for file fingerprints and hands synthesized output to a
//! [`ModWriter`]. The in-memory implementations here back tests and tools
//! that keep everything in process.

use crate::{Error, Result};
use modlayer_core::{normalize_path, Definition};
use modlayer_hub::MergedMod;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// What the reader knows about one overlay file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub file_name: String,
    pub content_sha: String,
}

/// Read access to overlay contents
pub trait ModReader: Send + Sync {
    /// Info for `relative_path` inside `mod_name`, `None` if the file is absent
    fn get_file_info(&self, mod_name: &str, relative_path: &str) -> Result<Option<FileInfo>>;
}

/// Write access for synthesized overlays
pub trait ModWriter: Send + Sync {
    /// Write `definition` into the patch overlay at `definition.file`
    fn write_patch(&self, patch_mod: &str, definition: &Definition) -> Result<()>;

    /// Remove a previously written patch file
    fn purge_patch_file(&self, patch_mod: &str, file: &str) -> Result<()>;

    /// Write a merged overlay
    fn write_merged(&self, merged: &MergedMod) -> Result<()>;
}

/// Map-backed reader
#[derive(Debug, Default)]
pub struct MemoryReader {
    files: Mutex<HashMap<(String, String), FileInfo>>,
}

impl MemoryReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a file's content hash
    pub fn insert(&self, mod_name: &str, file: &str, content_sha: &str) -> Result<()> {
        let info = FileInfo {
            file_name: file.to_string(),
            content_sha: content_sha.to_string(),
        };
        self.files
            .lock()
            .map_err(|e| Error::Reader(e.to_string()))?
            .insert((mod_name.to_string(), normalize_path(file)), info);
        Ok(())
    }

    pub fn remove(&self, mod_name: &str, file: &str) -> Result<()> {
        self.files
            .lock()
            .map_err(|e| Error::Reader(e.to_string()))?
            .remove(&(mod_name.to_string(), normalize_path(file)));
        Ok(())
    }
}

impl ModReader for MemoryReader {
    fn get_file_info(&self, mod_name: &str, relative_path: &str) -> Result<Option<FileInfo>> {
        let files = self.files.lock().map_err(|e| Error::Reader(e.to_string()))?;
        Ok(files
            .get(&(mod_name.to_string(), normalize_path(relative_path)))
            .cloned())
    }
}

/// An operation recorded by [`MemoryWriter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Patch {
        patch_mod: String,
        file: String,
        code: String,
    },
    Purge {
        patch_mod: String,
        file: String,
    },
    Merged {
        name: String,
        files: Vec<String>,
    },
}

/// Writer that records operations instead of touching disk
#[derive(Debug, Default)]
pub struct MemoryWriter {
    ops: Mutex<Vec<WriteOp>>,
    failing: AtomicBool,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Recorded operations, oldest first
    pub fn operations(&self) -> Vec<WriteOp> {
        self.ops.lock().map(|ops| ops.clone()).unwrap_or_default()
    }

    fn record(&self, op: WriteOp) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Writer(format!("write rejected: {:?}", op)));
        }
        self.ops
            .lock()
            .map_err(|e| Error::Writer(e.to_string()))?
            .push(op);
        Ok(())
    }
}

impl ModWriter for MemoryWriter {
    fn write_patch(&self, patch_mod: &str, definition: &Definition) -> Result<()> {
        self.record(WriteOp::Patch {
            patch_mod: patch_mod.to_string(),
            file: definition.file.clone(),
            code: definition.code.clone(),
        })
    }

    fn purge_patch_file(&self, patch_mod: &str, file: &str) -> Result<()> {
        self.record(WriteOp::Purge {
            patch_mod: patch_mod.to_string(),
            file: file.to_string(),
        })
    }

    fn write_merged(&self, merged: &MergedMod) -> Result<()> {
        self.record(WriteOp::Merged {
            name: merged.name.clone(),
            files: merged.definitions.iter().map(|d| d.file.clone()).collect(),
        })
    }
}
