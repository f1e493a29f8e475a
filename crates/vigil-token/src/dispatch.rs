use std::{panic, sync::OnceLock, thread};

use crate::ChangeCallback;

/// Hand a drained callback batch to the dispatcher thread.
///
/// Tokens fire from OS-watcher and timer threads, user callbacks must not run there or a slow
/// callback would stall event delivery for every other token. The dispatcher is one shared
/// thread, spawned on first use and alive for the rest of the process; batches keep per-token
/// invocation together. If the thread cannot be spawned the callbacks run inline as a last
/// resort.
pub(crate) fn fire_on_executor(callbacks: Vec<ChangeCallback>) {
    if callbacks.is_empty() {
        return;
    }

    static DISPATCH: OnceLock<Option<flume::Sender<Vec<ChangeCallback>>>> = OnceLock::new();
    let sender = DISPATCH.get_or_init(|| {
        let (sender, receiver) = flume::unbounded::<Vec<ChangeCallback>>();
        let spawned = thread::Builder::new().name("change-dispatch".into()).spawn(move || {
            for batch in receiver {
                for callback in batch {
                    invoke(callback);
                }
            }
        });
        match spawned {
            Ok(_) => Some(sender),
            Err(e) => {
                tracing::error!("cannot spawn change-dispatch thread, {e}");
                None
            }
        }
    });

    match sender {
        Some(sender) => {
            // the receiver only disconnects if the thread died, finish the fire here
            if let Err(flume::SendError(batch)) = sender.send(callbacks) {
                for callback in batch {
                    invoke(callback);
                }
            }
        }
        None => {
            for callback in callbacks {
                invoke(callback);
            }
        }
    }
}

/// Invoke on the current thread, a panicking callback is caught and logged.
pub(crate) fn invoke(callback: ChangeCallback) {
    if panic::catch_unwind(panic::AssertUnwindSafe(callback)).is_err() {
        tracing::error!("change callback panicked");
    }
}
