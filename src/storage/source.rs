//! # Storage Sources
//!
//! A storage source names and opens the byte streams backing one logical
//! tangle. The engine only needs the abstract capability: given a stream
//! name, produce an append-capable, seekable, mmap-backed stream that
//! survives reopen, with sub-streams fully independent of each other.
//!
//! The shipped implementation keeps one prefixed file per stream under a
//! directory (`<prefix>.<name>`), creating the directory on demand.
//! Platform side-channel schemes (alternate data streams of a host file)
//! satisfy the same trait and can be supplied by embedders.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};

/// Stream name for the B-tree node array.
pub const INDEX_STREAM: &str = "index";
/// Stream name for raw key bytes.
pub const KEYS_STREAM: &str = "keys";
/// Stream name for serialized values.
pub const DATA_STREAM: &str = "data";

/// Capability to open named byte streams for one tangle.
pub trait StorageSource: Send + Sync + 'static {
    /// Opens (creating if absent) the stream with the given name.
    fn open_stream(&self, name: &str) -> Result<File>;
}

/// One file per stream under a directory, named `<prefix>.<name>`.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    directory: PathBuf,
    prefix: String,
}

impl DirectorySource {
    pub fn new<P: AsRef<Path>>(directory: P, prefix: &str) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        std::fs::create_dir_all(&directory).wrap_err_with(|| {
            format!("failed to create tangle directory '{}'", directory.display())
        })?;
        Ok(Self {
            directory,
            prefix: prefix.to_string(),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn stream_path(&self, name: &str) -> PathBuf {
        self.directory.join(format!("{}.{}", self.prefix, name))
    }
}

impl StorageSource for DirectorySource {
    fn open_stream(&self, name: &str) -> Result<File> {
        let path = self.stream_path(name);
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .wrap_err_with(|| format!("failed to open stream '{}'", path.display()))
    }
}
