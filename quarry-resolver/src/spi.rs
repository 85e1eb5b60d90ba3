//! Interfaces consumed from external collaborators: version resolution,
//! workspace lookup and file processing. The resolvers hold these as trait
//! objects injected at construction.

use std::io;
use std::path::{Path, PathBuf};

use quarry_core::session::RepositorySession;
use quarry_core::types::{Artifact, RemoteRepository, RepositoryRef};

use crate::error::ResolveError;

// ---------------------------------------------------------------------------
// Version resolution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct VersionRequest<'a> {
    pub artifact: &'a Artifact,
    pub repositories: &'a [RemoteRepository],
    pub context: &'a str,
}

/// The concrete version an artifact's symbolic version binds to, and the
/// repository that determined it (if any).
#[derive(Debug, Clone)]
pub struct VersionResult {
    pub version: String,
    pub repository: Option<RepositoryRef>,
}

/// Binds symbolic versions (ranges, `SNAPSHOT`s) to concrete ones.
pub trait VersionResolver: Send + Sync {
    fn resolve_version(
        &self,
        session: &RepositorySession,
        request: &VersionRequest<'_>,
    ) -> Result<VersionResult, ResolveError>;
}

/// Pass-through resolver for callers whose versions are already concrete.
#[derive(Debug, Default)]
pub struct IdentityVersionResolver;

impl VersionResolver for IdentityVersionResolver {
    fn resolve_version(
        &self,
        _session: &RepositorySession,
        request: &VersionRequest<'_>,
    ) -> Result<VersionResult, ResolveError> {
        Ok(VersionResult {
            version: request.artifact.version.clone(),
            repository: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

/// Resolves artifacts from the projects of the running build, ahead of any
/// repository.
pub trait WorkspaceReader: Send + Sync {
    fn find_artifact(&self, artifact: &Artifact) -> Option<PathBuf>;
    fn find_versions(&self, artifact: &Artifact) -> Vec<String>;
}

// ---------------------------------------------------------------------------
// File processing
// ---------------------------------------------------------------------------

/// Filesystem primitives used when placing files into the local repository.
pub trait FileProcessor: Send + Sync {
    fn mkdirs(&self, dir: &Path) -> io::Result<()>;

    fn write(&self, file: &Path, data: &[u8]) -> io::Result<()>;

    /// Copy `src` to `dst`, creating parent directories, reporting the running
    /// byte count to `progress` when given. Returns the number of bytes
    /// copied.
    fn copy(
        &self,
        src: &Path,
        dst: &Path,
        progress: Option<&mut dyn FnMut(u64)>,
    ) -> io::Result<u64>;

    fn move_file(&self, src: &Path, dst: &Path) -> io::Result<()>;
}

/// Std-fs implementation of [`FileProcessor`].
#[derive(Debug, Default)]
pub struct DefaultFileProcessor;

impl FileProcessor for DefaultFileProcessor {
    fn mkdirs(&self, dir: &Path) -> io::Result<()> {
        std::fs::create_dir_all(dir)
    }

    fn write(&self, file: &Path, data: &[u8]) -> io::Result<()> {
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(file, data)
    }

    fn copy(
        &self,
        src: &Path,
        dst: &Path,
        progress: Option<&mut dyn FnMut(u64)>,
    ) -> io::Result<u64> {
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match progress {
            None => std::fs::copy(src, dst),
            Some(progress) => {
                use std::io::{Read, Write};

                let mut reader = std::fs::File::open(src)?;
                let mut writer = std::fs::File::create(dst)?;
                let mut buffer = [0u8; 32 * 1024];
                let mut total = 0u64;
                loop {
                    let read = reader.read(&mut buffer)?;
                    if read == 0 {
                        break;
                    }
                    writer.write_all(&buffer[..read])?;
                    total += read as u64;
                    progress(total);
                }
                writer.flush()?;
                Ok(total)
            }
        }
    }

    fn move_file(&self, src: &Path, dst: &Path) -> io::Result<()> {
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::rename(src, dst) {
            Ok(()) => Ok(()),
            // cross-device move degrades to copy + delete
            Err(_) => {
                std::fs::copy(src, dst)?;
                std::fs::remove_file(src)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn copy_reports_progress_and_creates_parents() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src.bin");
        std::fs::write(&src, vec![7u8; 100_000]).unwrap();

        let dst = tmp.path().join("nested").join("dir").join("dst.bin");
        let mut seen = Vec::new();
        let mut progress = |total: u64| seen.push(total);
        let bytes = DefaultFileProcessor
            .copy(&src, &dst, Some(&mut progress))
            .unwrap();

        assert_eq!(bytes, 100_000);
        assert_eq!(seen.last().copied(), Some(100_000));
        assert_eq!(std::fs::read(&dst).unwrap().len(), 100_000);
    }

    #[test]
    fn move_file_removes_the_source() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src.txt");
        std::fs::write(&src, b"payload").unwrap();
        let dst = tmp.path().join("moved").join("dst.txt");

        DefaultFileProcessor.move_file(&src, &dst).unwrap();
        assert!(!src.exists());
        assert_eq!(std::fs::read(&dst).unwrap(), b"payload");
    }
}
