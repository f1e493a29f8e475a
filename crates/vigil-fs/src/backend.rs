//! OS file-system event source abstraction.

use std::{path::PathBuf, sync::Weak, thread};

use notify::Watcher as _;

use crate::{PhysicalFilesWatcher, fs_event};

/// Raw file-system event source toggled by [`PhysicalFilesWatcher`].
///
/// The watcher enables the backend while it has registered tokens and disables it when the last
/// one fires. Implementations deliver events by calling [`PhysicalFilesWatcher::on_file_change`],
/// [`on_rename`] and [`on_error`], sequentially, from their own delivery thread.
///
/// [`on_rename`]: PhysicalFilesWatcher::on_rename
/// [`on_error`]: PhysicalFilesWatcher::on_error
pub trait FsEventBackend: Send {
    /// Start or stop raising events.
    ///
    /// Enabling an enabled backend or disabling a disabled one is a no-op.
    fn set_enabled(&mut self, enabled: bool);

    /// If the backend is currently raising events.
    fn is_enabled(&self) -> bool;
}

/// Backend that never raises events.
///
/// Stands in for the OS watcher in tests and on targets without one, events can still be
/// delivered manually through the [`PhysicalFilesWatcher`] entry points.
#[derive(Debug, Default)]
pub struct NullBackend {
    enabled: bool,
}
impl NullBackend {
    /// New disabled backend.
    pub fn new() -> Self {
        Self::default()
    }
}
impl FsEventBackend for NullBackend {
    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Backend over the [`notify`](https://docs.rs/notify) recommended watcher.
///
/// Created by [`PhysicalFilesWatcher::with_os_watcher`]. While enabled the notify watcher
/// observes the root recursively and forwards events to the target watcher. On a notify error
/// the watcher is recreated and the target's error path runs from a detached thread, the
/// notify event loop cannot be torn down from inside its own callback.
pub struct NotifyBackend {
    root: PathBuf,
    target: Weak<PhysicalFilesWatcher>,
    watcher: Option<notify::RecommendedWatcher>,
}
impl NotifyBackend {
    /// New disabled backend that will watch `root` and deliver to `target`.
    pub fn new(root: PathBuf, target: Weak<PhysicalFilesWatcher>) -> Self {
        Self { root, target, watcher: None }
    }

    fn build(&self) -> notify::Result<notify::RecommendedWatcher> {
        let target = self.target.clone();
        let mut watcher = notify::recommended_watcher(move |r: notify::Result<fs_event::Event>| {
            let Some(target) = target.upgrade() else { return };
            match r {
                Ok(event) => dispatch(&target, event),
                Err(e) => {
                    tracing::error!("file watcher error, {e}");
                    let spawned = thread::Builder::new().name("fs-watcher-recover".into()).spawn(move || target.on_error());
                    if let Err(e) = spawned {
                        tracing::error!("cannot recover file watcher, {e}");
                    }
                }
            }
        })?;
        watcher.watch(&self.root, notify::RecursiveMode::Recursive)?;
        Ok(watcher)
    }
}
impl FsEventBackend for NotifyBackend {
    fn set_enabled(&mut self, enabled: bool) {
        if enabled == self.watcher.is_some() {
            return;
        }
        if enabled {
            match self.build() {
                Ok(w) => self.watcher = Some(w),
                Err(e) => tracing::error!("cannot watch dir `{}`, {e}", self.root.display()),
            }
        } else {
            self.watcher = None;
        }
    }

    fn is_enabled(&self) -> bool {
        self.watcher.is_some()
    }
}

fn dispatch(target: &PhysicalFilesWatcher, event: fs_event::Event) {
    match &event.kind {
        fs_event::EventKind::Access(_) => {}
        fs_event::EventKind::Modify(fs_event::ModifyKind::Name(fs_event::RenameMode::Both)) if event.paths.len() == 2 => {
            target.on_rename(&event.paths[0], &event.paths[1]);
        }
        _ => {
            for path in &event.paths {
                target.on_file_change(path);
            }
        }
    }
}
