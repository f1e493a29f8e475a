//!
//! File providers and file-change watchers.
//!
//! A [`FileProvider`] serves metadata and directory listings over a hierarchical file namespace and
//! lets callers subscribe to change notifications with [`watch`], using the one-shot token protocol
//! from [`vigil_token`]. The crate ships a physical provider backed by OS file-system events (the
//! [`notify`](https://docs.rs/notify) crate), a polling watcher that fulfils the same contract by
//! scanning and hashing directories on a timer, a composite provider that fans subscriptions out
//! across several providers and a caching decorator invalidated by watch tokens.
//!
//! [`watch`]: FileProvider::watch

#![warn(unused_extern_crates)]
#![warn(missing_docs)]

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};

use vigil_token::ChangeToken;

mod backend;
mod caching;
mod composite;
mod filter;
mod physical;
mod polling;
mod watcher;

pub use backend::{FsEventBackend, NotifyBackend, NullBackend};
pub use caching::CachingFileProvider;
pub use composite::CompositeFileProvider;
pub use filter::PathMatcher;
pub use physical::{PhysicalFileProvider, WatchMode};
pub use polling::{
    Clock, DEFAULT_POLL_INTERVAL, MIN_POLL_INTERVAL, PollingFileChangeToken, PollingFileWatcher, PollingWildCardChangeToken, SystemClock,
};
pub use watcher::PhysicalFilesWatcher;

/// File system event types used at the [`FsEventBackend`] boundary.
///
/// This module re-exports types from the [`notify`](https://docs.rs/notify) crate.
pub mod fs_event {
    pub use notify::event::{CreateKind, Event, EventKind, ModifyKind, RemoveKind, RenameMode};
    pub use notify::{Error, ErrorKind};
}

/// Read access to a file namespace with change notifications.
pub trait FileProvider: Send + Sync {
    /// Gets metadata for the file at `subpath`.
    ///
    /// Never fails, a missing or inaccessible path is reported with [`FileInfo::not_found`].
    fn get_file_info(&self, subpath: &str) -> FileInfo;

    /// Lists the directory at `subpath`.
    ///
    /// Never fails, a missing directory is reported with [`DirectoryContents::not_found`].
    fn get_directory_contents(&self, subpath: &str) -> DirectoryContents;

    /// Subscribe to change notifications for all paths selected by `filter`.
    ///
    /// The filter is a relative path or a glob pattern, `/` separated after normalization, with
    /// `*`, `**` and `?` wildcards and a trailing separator meaning "this directory and all
    /// descendants". Invalid filters are not errors, they subscribe to the token that never fires.
    fn watch(&self, filter: &str) -> Arc<dyn ChangeToken>;
}

/// Metadata of one file or directory served by a [`FileProvider`].
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// If the entry exists. The other fields are meaningless when this is `false`.
    pub exists: bool,
    /// File length in bytes, zero for directories.
    pub length: u64,
    /// Last modification time, if the backing store tracks one.
    pub last_modified: Option<SystemTime>,
    /// Entry name, the last path segment.
    pub name: String,
    /// Real path on disk, if the entry is backed by the physical file system.
    pub physical_path: Option<PathBuf>,
    /// If the entry is a directory.
    pub is_directory: bool,
}
impl FileInfo {
    /// New not-found sentinel for `name`.
    pub fn not_found(name: impl Into<String>) -> Self {
        FileInfo {
            exists: false,
            length: 0,
            last_modified: None,
            name: name.into(),
            physical_path: None,
            is_directory: false,
        }
    }

    /// Open the file for reading.
    ///
    /// Fails with [`io::ErrorKind::NotFound`] if the entry does not exist, is a directory or has
    /// no physical path.
    pub fn open_read(&self) -> io::Result<fs::File> {
        match &self.physical_path {
            Some(p) if self.exists && !self.is_directory => fs::File::open(p),
            _ => Err(io::Error::new(io::ErrorKind::NotFound, format!("`{}` cannot be read", self.name))),
        }
    }
}

/// Directory listing served by a [`FileProvider`].
#[derive(Debug, Clone, Default)]
pub struct DirectoryContents {
    /// If the directory exists.
    pub exists: bool,
    /// The directory entries, a single level.
    pub entries: Vec<FileInfo>,
}
impl DirectoryContents {
    /// New not-found sentinel.
    pub fn not_found() -> Self {
        Self::default()
    }

    /// Iterate over the entries.
    pub fn iter(&self) -> std::slice::Iter<'_, FileInfo> {
        self.entries.iter()
    }
}
impl IntoIterator for DirectoryContents {
    type Item = FileInfo;
    type IntoIter = std::vec::IntoIter<FileInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
impl<'a> IntoIterator for &'a DirectoryContents {
    type Item = &'a FileInfo;
    type IntoIter = std::slice::Iter<'a, FileInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub(crate) fn file_info_from_metadata(name: String, full_path: &Path, m: &fs::Metadata) -> FileInfo {
    FileInfo {
        exists: true,
        length: if m.is_dir() { 0 } else { m.len() },
        last_modified: m.modified().ok(),
        name,
        physical_path: Some(full_path.to_path_buf()),
        is_directory: m.is_dir(),
    }
}
