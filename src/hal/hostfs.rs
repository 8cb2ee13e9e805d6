// CLASSIFICATION: COMMUNITY
// Filename: hostfs.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-16

//! [`Volume`] backed by a directory on the host filesystem.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use crate::error::VolumeError;
use crate::hal::Volume;

/// Volume rooted at a host directory. Paths are relative to the root.
#[derive(Clone, Debug)]
pub struct DirVolume {
    root: PathBuf,
}

impl DirVolume {
    /// Use `root` as the volume root, creating it if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, VolumeError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Root directory of the volume.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, VolumeError> {
        let rel = Path::new(path.trim_start_matches('/'));
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(VolumeError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(rel))
    }
}

impl Volume for DirVolume {
    fn read_to_string(&mut self, path: &str) -> Result<Option<String>, VolumeError> {
        match fs::read_to_string(self.resolve(path)?) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn file_len(&mut self, path: &str) -> Result<Option<u64>, VolumeError> {
        match fs::metadata(self.resolve(path)?) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&mut self, path: &str) -> Result<(), VolumeError> {
        match fs::remove_file(self.resolve(path)?) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn append_line(&mut self, path: &str, line: &str) -> Result<(), VolumeError> {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.resolve(path)?)?;
        writeln!(f, "{line}")?;
        Ok(())
    }
}
