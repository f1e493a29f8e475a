//!
//! One-shot change token protocol.
//!
//! A [`ChangeToken`] is an observable handle for "something I was watching is now different". Tokens
//! fire at most once, a fired token never reverts and callbacks registered after the fire are invoked
//! immediately, so callers never miss the transition.

#![warn(unused_extern_crates)]
#![warn(missing_docs)]

use std::sync::{Arc, OnceLock};

mod composite;
mod dispatch;
mod source;
mod subscription;

pub use composite::CompositeChangeToken;
pub use source::{CancellationChangeToken, CancellationSource};
pub use subscription::Subscription;

/// Callback registered on a [`ChangeToken`].
///
/// The callback state is the closure capture. Each registered callback is invoked at most once,
/// on a shared background dispatcher thread when the token fires, so user code never runs on
/// the OS-watcher or timer thread that triggered the fire. Registering on an already fired
/// token invokes on the registering thread instead, before the registration returns.
pub type ChangeCallback = Box<dyn FnOnce() + Send + 'static>;

/// One-shot observable handle.
///
/// Once [`has_changed`] transitions to `true` it stays `true` for the rest of the token's lifetime.
/// A token is conceptually single-use, callers must obtain a new token after observing the transition.
///
/// [`has_changed`]: ChangeToken::has_changed
pub trait ChangeToken: Send + Sync {
    /// If the token already fired.
    ///
    /// Reads are cheap and idempotent, implementations never do I/O here.
    fn has_changed(&self) -> bool;

    /// If [`register_callback`] will ever invoke callbacks.
    ///
    /// A token that returns `false` here never fires callbacks and callers are entitled to skip
    /// registration and poll [`has_changed`] instead.
    ///
    /// The value is fixed for the lifetime of the token.
    ///
    /// [`register_callback`]: ChangeToken::register_callback
    /// [`has_changed`]: ChangeToken::has_changed
    fn active_callbacks(&self) -> bool;

    /// Register a one-shot callback.
    ///
    /// If the token has already fired the `callback` is invoked synchronously before this method
    /// returns, otherwise it is invoked exactly once on the background dispatcher thread when the
    /// token first fires. Invocation order across multiple registrations is unspecified.
    ///
    /// Dropping the returned [`Subscription`] unregisters the callback, it does not stop the
    /// token from firing for other registrations.
    fn register_callback(&self, callback: ChangeCallback) -> Subscription;
}

/// Extension methods for [`ChangeToken`] implementers.
pub trait ChangeTokenExt: ChangeToken {
    /// Register a one-shot closure, see [`register_callback`].
    ///
    /// [`register_callback`]: ChangeToken::register_callback
    fn on_change(&self, callback: impl FnOnce() + Send + 'static) -> Subscription {
        self.register_callback(Box::new(callback))
    }
}
impl<T: ChangeToken + ?Sized> ChangeTokenExt for T {}

/// Token that never fires and has no active callbacks.
///
/// Returned by watchers when no real subscription can satisfy the request, an invalid filter
/// for example. Use [`shared`] to avoid allocating a new instance.
///
/// [`shared`]: NoopChangeToken::shared
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopChangeToken;
impl NoopChangeToken {
    /// Shared singleton instance.
    pub fn shared() -> Arc<dyn ChangeToken> {
        static SHARED: OnceLock<Arc<dyn ChangeToken>> = OnceLock::new();
        SHARED.get_or_init(|| Arc::new(NoopChangeToken)).clone()
    }
}
impl ChangeToken for NoopChangeToken {
    fn has_changed(&self) -> bool {
        false
    }

    fn active_callbacks(&self) -> bool {
        false
    }

    fn register_callback(&self, _: ChangeCallback) -> Subscription {
        Subscription::noop()
    }
}
