//! Physical file-change watcher.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use dashmap::DashMap;
use parking_lot::Mutex;
use path_absolutize::Absolutize as _;
use vigil_token::{CancellationChangeToken, CancellationSource, ChangeToken, NoopChangeToken};

use crate::{
    FsEventBackend, NotifyBackend, NullBackend,
    filter::{self, PathMatcher},
};

/// Maps watch filters to change tokens and fires them from OS file-system events.
///
/// Filters are kept in two registries, exact relative paths and wildcard patterns. An event
/// removes every matching entry and cancels its backing source, so each token fires at most
/// once and is discarded with the fire. The expensive OS event source is only enabled while
/// at least one entry is registered.
///
/// Use [`with_os_watcher`] for the notify-backed setup, or [`new`] to plug any
/// [`FsEventBackend`] and deliver events through [`on_file_change`], [`on_rename`] and
/// [`on_error`].
///
/// [`with_os_watcher`]: PhysicalFilesWatcher::with_os_watcher
/// [`new`]: PhysicalFilesWatcher::new
/// [`on_file_change`]: PhysicalFilesWatcher::on_file_change
/// [`on_rename`]: PhysicalFilesWatcher::on_rename
/// [`on_error`]: PhysicalFilesWatcher::on_error
pub struct PhysicalFilesWatcher {
    root: PathBuf,
    exact: DashMap<String, TokenEntry>,
    wildcard: DashMap<String, WildcardEntry>,
    // also guards the enable/disable transitions
    backend: Mutex<Box<dyn FsEventBackend>>,
}

struct TokenEntry {
    source: CancellationSource,
    token: CancellationChangeToken,
}
impl TokenEntry {
    fn new() -> Self {
        let source = CancellationSource::new();
        let token = source.token();
        Self { source, token }
    }
}

struct WildcardEntry {
    entry: TokenEntry,
    matcher: PathMatcher,
}

impl PhysicalFilesWatcher {
    /// New watcher over `root` with a custom event backend.
    pub fn new(root: impl Into<PathBuf>, backend: Box<dyn FsEventBackend>) -> Arc<Self> {
        Arc::new(Self::new_inner(absolutize(root.into()), backend))
    }

    /// New watcher over `root` backed by the OS recommended watcher.
    pub fn with_os_watcher(root: impl Into<PathBuf>) -> Arc<Self> {
        let root = absolutize(root.into());
        Arc::new_cyclic(|weak| Self::new_inner(root.clone(), Box::new(NotifyBackend::new(root, weak.clone()))))
    }

    /// New watcher that never receives OS events, for manual delivery.
    pub fn disconnected(root: impl Into<PathBuf>) -> Arc<Self> {
        Self::new(root, Box::new(NullBackend::new()))
    }

    fn new_inner(root: PathBuf, backend: Box<dyn FsEventBackend>) -> Self {
        Self {
            root,
            exact: DashMap::new(),
            wildcard: DashMap::new(),
            backend: Mutex::new(backend),
        }
    }

    /// The watched root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// If the underlying event backend is currently enabled.
    pub fn is_watching(&self) -> bool {
        self.backend.lock().is_enabled()
    }

    /// Gets a token that fires when a path selected by `filter` changes.
    ///
    /// The filter is relative to the root. Filters that contain `*` or end in a separator
    /// register a wildcard entry, everything else an exact-path entry. Registering the same
    /// filter again before the token fires returns the already registered token.
    ///
    /// Absolute filters and filters that escape the root return the no-op token.
    pub fn create_file_change_token(&self, filter: &str) -> Arc<dyn ChangeToken> {
        let Some(filter) = filter::normalize_filter(filter) else {
            tracing::debug!("invalid watch filter `{filter}`, no-op token");
            return NoopChangeToken::shared();
        };

        let token = if filter::is_pattern(&filter) {
            let matcher = match PathMatcher::compile(&filter) {
                Ok(m) => m,
                Err(e) => {
                    tracing::debug!("invalid watch pattern `{filter}`, {e}");
                    return NoopChangeToken::shared();
                }
            };
            self.wildcard
                .entry(filter)
                .or_insert_with(|| WildcardEntry {
                    entry: TokenEntry::new(),
                    matcher,
                })
                .entry
                .token
                .clone()
        } else {
            self.exact.entry(filter::fold_case(&filter)).or_insert_with(TokenEntry::new).token.clone()
        };

        self.sync_backend();

        Arc::new(token)
    }

    /// Handle a change event for the absolute `full_path`.
    ///
    /// Fires and removes every registered entry that matches the path relative to the root.
    /// Events for excluded entries, for paths outside the root and for the root itself are
    /// ignored.
    pub fn on_file_change(&self, full_path: &Path) {
        if is_excluded(&self.root, full_path) {
            return;
        }
        let Ok(relative) = full_path.strip_prefix(&self.root) else {
            return;
        };
        let relative = filter::normalize_event_path(relative);
        if relative.is_empty() {
            // some OS watchers raise a nameless event when the root itself is deleted
            return;
        }

        let mut matched = false;

        if let Some((_, e)) = self.exact.remove(&filter::fold_case(&relative)) {
            e.source.cancel();
            matched = true;
        }

        let hits: Vec<String> = self
            .wildcard
            .iter()
            .filter(|w| w.value().matcher.matches(&relative))
            .map(|w| w.key().clone())
            .collect();
        for key in hits {
            // a concurrent event may have won the removal
            if let Some((_, w)) = self.wildcard.remove(&key) {
                w.entry.source.cancel();
                matched = true;
            }
        }

        if matched {
            self.sync_backend();
        }
    }

    /// Handle a rename of `old_path` to `new_path`.
    ///
    /// Fires entries matching both paths, and when the renamed entry is a directory also
    /// entries matching every item of the subtree, on both the old and the new side.
    pub fn on_rename(&self, old_path: &Path, new_path: &Path) {
        self.on_file_change(old_path);
        self.on_file_change(new_path);

        let is_dir = fs::metadata(new_path).map(|m| m.is_dir()).unwrap_or(false);
        if !is_dir {
            return;
        }
        for item in walkdir::WalkDir::new(new_path).min_depth(1).into_iter().flatten() {
            self.on_file_change(item.path());
            if let Ok(suffix) = item.path().strip_prefix(new_path) {
                self.on_file_change(&old_path.join(suffix));
            }
        }
    }

    /// Handle a backend failure.
    ///
    /// The backend is recreated and every exact-path entry fires, a specific path may have
    /// changed unobserved while events were lost. Wildcard entries stay registered, pattern
    /// subscriptions keep working with the recreated backend.
    pub fn on_error(&self) {
        {
            let mut backend = self.backend.lock();
            if backend.is_enabled() {
                backend.set_enabled(false);
                if !self.exact.is_empty() || !self.wildcard.is_empty() {
                    backend.set_enabled(true);
                }
            }
        }

        let keys: Vec<String> = self.exact.iter().map(|e| e.key().clone()).collect();
        let mut fired = false;
        for key in keys {
            if let Some((_, e)) = self.exact.remove(&key) {
                e.source.cancel();
                fired = true;
            }
        }
        if fired {
            self.sync_backend();
        }
    }

    fn sync_backend(&self) {
        let mut backend = self.backend.lock();
        let has_entries = !self.exact.is_empty() || !self.wildcard.is_empty();
        if has_entries != backend.is_enabled() {
            backend.set_enabled(has_entries);
        }
    }
}

fn absolutize(path: PathBuf) -> PathBuf {
    match path.absolutize() {
        Ok(p) => p.into_owned(),
        Err(e) => {
            tracing::error!("cannot absolutize `{}`, {e}", path.display());
            path
        }
    }
}

/// If the event path is filtered out, a dot-file or dot-directory under the root or an entry
/// with the hidden or system attribute.
///
/// Classification I/O errors do not exclude, the path may be gone already and pending tokens
/// must still observe the delete.
pub(crate) fn is_excluded(root: &Path, full_path: &Path) -> bool {
    if let Ok(relative) = full_path.strip_prefix(root) {
        for segment in relative.iter() {
            if segment.to_string_lossy().starts_with('.') {
                return true;
            }
        }
    }
    is_hidden_or_system(full_path)
}

#[cfg(windows)]
fn is_hidden_or_system(path: &Path) -> bool {
    use std::os::windows::fs::MetadataExt as _;
    const HIDDEN: u32 = 0x2;
    const SYSTEM: u32 = 0x4;
    match fs::symlink_metadata(path) {
        Ok(m) => m.file_attributes() & (HIDDEN | SYSTEM) != 0,
        Err(_) => false,
    }
}
#[cfg(not(windows))]
fn is_hidden_or_system(_: &Path) -> bool {
    false
}

pub(crate) use is_excluded as is_excluded_entry;
