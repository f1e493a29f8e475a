use std::{fmt, sync::Weak};

use crate::source::CallbackSet;

/// Represents a callback registration on a [`ChangeToken`].
///
/// Dropping the subscription releases the registration. The release is idempotent and the
/// subscription only holds a weak reference to the callback set, so keeping or dropping
/// subscriptions never extends the token's lifetime and never prevents it from firing.
///
/// [`ChangeToken`]: crate::ChangeToken
#[must_use = "the callback is unregistered if the subscription is dropped"]
pub struct Subscription(SubscriptionKind);

enum SubscriptionKind {
    Noop,
    Callback { set: Weak<CallbackSet>, id: u64 },
    Joined(Vec<Subscription>),
}

impl Subscription {
    /// New subscription that is not connected to any callback.
    pub fn noop() -> Self {
        Subscription(SubscriptionKind::Noop)
    }

    pub(crate) fn new(set: Weak<CallbackSet>, id: u64) -> Self {
        Subscription(SubscriptionKind::Callback { set, id })
    }

    /// New subscription that releases all of `subscriptions` when released, in order.
    pub fn join(subscriptions: Vec<Subscription>) -> Self {
        Subscription(SubscriptionKind::Joined(subscriptions))
    }

    /// Release the registration now.
    ///
    /// This is the same as dropping the subscription, the explicit call only documents intent.
    pub fn release(self) {
        drop(self);
    }
}
impl Drop for Subscription {
    fn drop(&mut self) {
        match std::mem::replace(&mut self.0, SubscriptionKind::Noop) {
            SubscriptionKind::Noop => {}
            SubscriptionKind::Callback { set, id } => {
                // already fired or dropped sets simply no longer contain the id
                if let Some(set) = set.upgrade() {
                    set.unregister(id);
                }
            }
            SubscriptionKind::Joined(subs) => drop(subs),
        }
    }
}
impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            SubscriptionKind::Noop => write!(f, "noop"),
            SubscriptionKind::Callback { set, .. } => {
                if set.strong_count() > 0 {
                    write!(f, "registered")
                } else {
                    write!(f, "released")
                }
            }
            SubscriptionKind::Joined(subs) => write!(f, "joined({})", subs.len()),
        }
    }
}
