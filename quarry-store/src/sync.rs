//! Cross-process mutual exclusion over artifacts and metadata.
//!
//! Lock files live under `<basedir>/.locks/` and are named by a stable
//! fingerprint of the coordinates, never by file path, so a resolver and an
//! installer working on the same artifact rendezvous even when their local
//! paths differ in case or separators. Locks are advisory OS file locks
//! (shared for read contexts, exclusive for write contexts) and are released
//! when the context drops, including on unwind.
//!
//! Within one process a global registry refcounts acquisitions per lock file,
//! so re-entrant acquisition does not self-deadlock; intra-process
//! read/write coordination stays with the caller.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use fs4::FileExt;
use sha2::{Digest, Sha256};

use quarry_core::types::{Artifact, LocalRepository, Metadata};

use crate::error::{io_err, StoreError};

const LOCKS_DIR: &str = ".locks";

/// Creates [`SyncContext`]s for one local repository.
#[derive(Debug, Clone)]
pub struct SyncContextFactory {
    locks_dir: PathBuf,
}

impl SyncContextFactory {
    pub fn new(repository: &LocalRepository) -> Self {
        Self {
            locks_dir: repository.basedir.join(LOCKS_DIR),
        }
    }

    /// A shared context allows concurrent readers; an exclusive context does
    /// not.
    pub fn context(&self, shared: bool) -> SyncContext {
        SyncContext {
            locks_dir: self.locks_dir.clone(),
            shared,
            held: Vec::new(),
        }
    }
}

/// Advisory locks over a declared set of artifacts and metadata, held for the
/// lifetime of the context.
#[derive(Debug)]
pub struct SyncContext {
    locks_dir: PathBuf,
    shared: bool,
    held: Vec<PathBuf>,
}

impl SyncContext {
    pub fn acquire(
        &mut self,
        artifacts: &[&Artifact],
        metadata: &[&Metadata],
    ) -> Result<(), StoreError> {
        for artifact in artifacts {
            self.lock(artifact_fingerprint(artifact))?;
        }
        for item in metadata {
            self.lock(metadata_fingerprint(item))?;
        }
        Ok(())
    }

    fn lock(&mut self, fingerprint: String) -> Result<(), StoreError> {
        let path = self.locks_dir.join(format!("{fingerprint}.lock"));
        registry_acquire(&path, self.shared)?;
        self.held.push(path);
        Ok(())
    }
}

impl Drop for SyncContext {
    fn drop(&mut self) {
        for path in self.held.drain(..) {
            registry_release(&path);
        }
    }
}

/// Fingerprint of the literal (groupId, artifactId, version) coordinates.
fn artifact_fingerprint(artifact: &Artifact) -> String {
    fingerprint(&format!(
        "artifact:{}:{}:{}",
        artifact.group_id, artifact.artifact_id, artifact.version
    ))
}

fn metadata_fingerprint(metadata: &Metadata) -> String {
    fingerprint(&format!(
        "metadata:{}:{}:{}:{}",
        metadata.group_id, metadata.artifact_id, metadata.version, metadata.kind
    ))
}

fn fingerprint(coordinates: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(coordinates.to_lowercase().as_bytes());
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// Process-wide lock registry
// ---------------------------------------------------------------------------

struct HeldLock {
    // keeps the OS lock alive; dropped (and thereby released) at refs == 0
    _file: File,
    refs: usize,
}

fn registry() -> &'static Mutex<HashMap<PathBuf, HeldLock>> {
    static REGISTRY: OnceLock<Mutex<HashMap<PathBuf, HeldLock>>> = OnceLock::new();
    REGISTRY.get_or_init(Mutex::default)
}

fn registry_acquire(path: &PathBuf, shared: bool) -> Result<(), StoreError> {
    let mut held = registry().lock().expect("lock registry");
    if let Some(entry) = held.get_mut(path) {
        entry.refs += 1;
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| io_err(path.clone(), e))?;
    if shared {
        file.lock_shared().map_err(|e| io_err(path.clone(), e))?;
    } else {
        file.lock_exclusive().map_err(|e| io_err(path.clone(), e))?;
    }
    held.insert(path.clone(), HeldLock { _file: file, refs: 1 });
    Ok(())
}

fn registry_release(path: &PathBuf) {
    let mut held = registry().lock().expect("lock registry");
    if let Some(entry) = held.get_mut(path) {
        entry.refs -= 1;
        if entry.refs == 0 {
            held.remove(path);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
