use std::{
    collections::HashMap,
    fmt, mem,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use parking_lot::Mutex;

use crate::{ChangeCallback, ChangeToken, Subscription, dispatch};

/// One-shot trigger that backs [`CancellationChangeToken`].
///
/// The source owns the set of registered callbacks. [`cancel`] atomically sets the cancelled flag
/// and drains the set, handing the callbacks to the shared dispatcher thread so the cancelling
/// thread never runs user code. Callbacks registered after cancellation are invoked immediately,
/// on the registering thread.
///
/// Cloning the source clones a reference, all clones cancel the same token.
///
/// [`cancel`]: CancellationSource::cancel
#[derive(Clone, Default)]
pub struct CancellationSource {
    set: Arc<CallbackSet>,
}
impl CancellationSource {
    /// New source, not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// New token backed by this source.
    pub fn token(&self) -> CancellationChangeToken {
        CancellationChangeToken { set: self.set.clone() }
    }

    /// If [`cancel`] was already called.
    ///
    /// [`cancel`]: CancellationSource::cancel
    pub fn is_cancelled(&self) -> bool {
        self.set.is_fired()
    }

    /// Fire the token.
    ///
    /// The first call drains the registered callbacks and dispatches them to the background
    /// executor, each is invoked exactly once; subsequent calls are no-ops. A panicking
    /// callback is caught and logged, the remaining callbacks still run.
    pub fn cancel(&self) {
        self.set.fire();
    }
}
impl fmt::Debug for CancellationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationSource").field("is_cancelled", &self.is_cancelled()).finish()
    }
}

/// Adapts a [`CancellationSource`] to the [`ChangeToken`] protocol.
///
/// `has_changed` is the source's cancelled flag and `active_callbacks` is always `true`.
#[derive(Clone)]
pub struct CancellationChangeToken {
    set: Arc<CallbackSet>,
}
impl ChangeToken for CancellationChangeToken {
    fn has_changed(&self) -> bool {
        self.set.is_fired()
    }

    fn active_callbacks(&self) -> bool {
        true
    }

    fn register_callback(&self, callback: ChangeCallback) -> Subscription {
        self.set.register(callback)
    }
}
impl fmt::Debug for CancellationChangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationChangeToken").field("has_changed", &self.has_changed()).finish()
    }
}

/// Shared callback storage for one token.
///
/// The fired flag is only set inside the callbacks lock, so a register that observes `fired == false`
/// under the lock is guaranteed to be drained by the firing thread.
#[derive(Default)]
pub(crate) struct CallbackSet {
    fired: AtomicBool,
    next_id: AtomicU64,
    callbacks: Mutex<HashMap<u64, ChangeCallback>>,
}
impl CallbackSet {
    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    pub fn register(self: &Arc<Self>, callback: ChangeCallback) -> Subscription {
        {
            let mut callbacks = self.callbacks.lock();
            if !self.is_fired() {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                callbacks.insert(id, callback);
                return Subscription::new(Arc::downgrade(self), id);
            }
        }
        // late registration, invoke on this thread before returning, without the lock
        dispatch::invoke(callback);
        Subscription::noop()
    }

    pub fn unregister(&self, id: u64) {
        self.callbacks.lock().remove(&id);
    }

    pub fn fire(&self) {
        let drained = {
            let mut callbacks = self.callbacks.lock();
            if self.fired.swap(true, Ordering::SeqCst) {
                return;
            }
            mem::take(&mut *callbacks)
        };
        dispatch::fire_on_executor(drained.into_values().collect());
    }
}
