use std::sync::Arc;

use parking_lot::Mutex;

use crate::{ChangeCallback, ChangeToken, Subscription};

/// Aggregates an ordered sequence of tokens under the single token contract.
///
/// `has_changed` and `active_callbacks` are the logical OR of the inner tokens. A callback is
/// registered on every inner token that reports active callbacks and is invoked at most once,
/// whichever inner token fires first. Inner tokens without active callbacks are skipped at
/// registration time, they would never invoke the callback.
pub struct CompositeChangeToken {
    tokens: Vec<Arc<dyn ChangeToken>>,
}
impl CompositeChangeToken {
    /// New composite over the `tokens`, in order.
    pub fn new(tokens: Vec<Arc<dyn ChangeToken>>) -> Self {
        Self { tokens }
    }

    /// The aggregated tokens.
    pub fn tokens(&self) -> &[Arc<dyn ChangeToken>] {
        &self.tokens
    }
}
impl ChangeToken for CompositeChangeToken {
    fn has_changed(&self) -> bool {
        self.tokens.iter().any(|t| t.has_changed())
    }

    fn active_callbacks(&self) -> bool {
        self.tokens.iter().any(|t| t.active_callbacks())
    }

    fn register_callback(&self, callback: ChangeCallback) -> Subscription {
        let callback = Arc::new(Mutex::new(Some(callback)));

        let mut subs = vec![];
        for token in self.tokens.iter().filter(|t| t.active_callbacks()) {
            let callback = callback.clone();
            subs.push(token.register_callback(Box::new(move || {
                // first inner fire wins
                if let Some(callback) = callback.lock().take() {
                    callback();
                }
            })));
        }

        if subs.is_empty() { Subscription::noop() } else { Subscription::join(subs) }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            mpsc,
        },
        time::Duration,
    };

    use crate::{CancellationSource, ChangeTokenExt as _, NoopChangeToken};

    use super::*;

    const FIRED: Duration = Duration::from_secs(5);
    const QUIET: Duration = Duration::from_millis(200);

    #[test]
    fn has_changed_is_any() {
        let a = CancellationSource::new();
        let b = CancellationSource::new();
        let composite = CompositeChangeToken::new(vec![Arc::new(a.token()), Arc::new(b.token())]);

        assert!(!composite.has_changed());
        b.cancel();
        assert!(composite.has_changed());
    }

    #[test]
    fn active_callbacks_is_any() {
        let composite = CompositeChangeToken::new(vec![NoopChangeToken::shared()]);
        assert!(!composite.active_callbacks());

        let source = CancellationSource::new();
        let composite = CompositeChangeToken::new(vec![NoopChangeToken::shared(), Arc::new(source.token())]);
        assert!(composite.active_callbacks());
    }

    #[test]
    fn skips_inactive_registrations() {
        let composite = CompositeChangeToken::new(vec![NoopChangeToken::shared()]);
        let sub = composite.on_change(|| panic!("inactive composite fired"));
        drop(sub);
    }

    #[test]
    fn callback_invoked_once_across_inner_fires() {
        let a = CancellationSource::new();
        let b = CancellationSource::new();
        let composite = CompositeChangeToken::new(vec![Arc::new(a.token()), Arc::new(b.token())]);

        let (tx, rx) = mpsc::channel();
        let _sub = composite.on_change(move || {
            let _ = tx.send(());
        });

        b.cancel();
        a.cancel();

        assert!(composite.has_changed());
        rx.recv_timeout(FIRED).expect("callback not invoked");
        assert!(rx.recv_timeout(QUIET).is_err(), "callback invoked twice");
    }

    #[test]
    fn late_registration_on_fired_inner() {
        let a = CancellationSource::new();
        a.cancel();
        let composite = CompositeChangeToken::new(vec![Arc::new(a.token())]);

        let calls = Arc::new(AtomicUsize::new(0));
        let _sub = composite.on_change({
            let calls = calls.clone();
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
