//! Physical file system provider.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use path_absolutize::Absolutize as _;
use vigil_token::ChangeToken;

use crate::{
    DirectoryContents, FileInfo, FileProvider, PhysicalFilesWatcher, PollingFileWatcher, file_info_from_metadata, filter,
    watcher::is_excluded_entry,
};

/// How a [`PhysicalFileProvider`] observes changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WatchMode {
    /// OS file-system events, through the notify recommended watcher.
    #[default]
    OsEvents,
    /// Periodic scans, for network mounts and containers where OS events are unreliable.
    Poll,
}

enum WatchSource {
    Os(Arc<PhysicalFilesWatcher>),
    Poll(PollingFileWatcher),
}

/// Serves files from a root directory on the physical file system.
///
/// Subpaths are relative to the root, hidden entries, system entries and dot-files are
/// filtered out of lookups and listings the same way the watcher filters their events.
pub struct PhysicalFileProvider {
    root: PathBuf,
    watch: WatchSource,
}
impl PhysicalFileProvider {
    /// New provider rooted at the `root` directory, watching with OS events.
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        Self::with_mode(root, WatchMode::default())
    }

    /// New provider rooted at the `root` directory with an explicit watch mode.
    ///
    /// Fails if `root` is not an existing directory.
    pub fn with_mode(root: impl Into<PathBuf>, mode: WatchMode) -> io::Result<Self> {
        let root = root.into();
        let root = root.absolutize()?.into_owned();
        if !fs::metadata(&root)?.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("`{}` is not a directory", root.display()),
            ));
        }

        let watch = match mode {
            WatchMode::OsEvents => WatchSource::Os(PhysicalFilesWatcher::with_os_watcher(root.clone())),
            WatchMode::Poll => WatchSource::Poll(PollingFileWatcher::new(root.clone())),
        };
        Ok(Self { root, watch })
    }

    /// The served root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, subpath: &str) -> Option<PathBuf> {
        let subpath = subpath.trim();
        if subpath.is_empty() || subpath == "." {
            return Some(self.root.clone());
        }
        let relative = filter::normalize_filter(subpath)?;
        if relative.contains('*') {
            return None;
        }
        Some(self.root.join(relative))
    }
}
impl FileProvider for PhysicalFileProvider {
    fn get_file_info(&self, subpath: &str) -> FileInfo {
        let name = subpath.rsplit(['/', '\\']).next().unwrap_or(subpath).to_owned();
        let Some(full) = self.full_path(subpath) else {
            return FileInfo::not_found(name);
        };
        if is_excluded_entry(&self.root, &full) {
            return FileInfo::not_found(name);
        }
        match fs::metadata(&full) {
            Ok(m) => file_info_from_metadata(name, &full, &m),
            Err(_) => FileInfo::not_found(name),
        }
    }

    fn get_directory_contents(&self, subpath: &str) -> DirectoryContents {
        let Some(full) = self.full_path(subpath) else {
            return DirectoryContents::not_found();
        };
        if is_excluded_entry(&self.root, &full) {
            return DirectoryContents::not_found();
        }
        let entries = match fs::read_dir(&full) {
            Ok(e) => e,
            Err(_) => return DirectoryContents::not_found(),
        };

        let mut contents = DirectoryContents {
            exists: true,
            entries: vec![],
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if is_excluded_entry(&self.root, &path) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Ok(m) = entry.metadata() {
                contents.entries.push(file_info_from_metadata(name, &path, &m));
            }
        }
        contents
    }

    fn watch(&self, filter: &str) -> Arc<dyn ChangeToken> {
        match &self.watch {
            WatchSource::Os(w) => w.create_file_change_token(filter),
            WatchSource::Poll(w) => w.watch(filter),
        }
    }
}
