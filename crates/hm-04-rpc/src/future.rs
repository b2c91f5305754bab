//! One-shot completion promises.
//!
//! Every distributed operation hands back a [`Promise`]: a cloneable handle
//! that resolves exactly once to a value or a [`FailReason`]. Waiters can
//! `await_result`, attach listeners that run on completion, or cancel. The
//! [`late_join`] combinator merges N sub-promises and succeeds once a
//! threshold of them did.

use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::errors::FailReason;

type Listener<T> = Box<dyn FnOnce(&Result<T, FailReason>) + Send>;

enum PromiseState<T> {
    Pending(Vec<Listener<T>>),
    Done(Arc<Result<T, FailReason>>),
}

struct PromiseInner<T> {
    state: Mutex<PromiseState<T>>,
    notify: Notify,
}

/// A one-shot, cloneable completion handle.
///
/// Completion is idempotent: only the first `complete`/`fail`/`cancel`
/// settles the promise, later calls are ignored.
pub struct Promise<T> {
    inner: Arc<PromiseInner<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Promise<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PromiseInner {
                state: Mutex::new(PromiseState::Pending(Vec::new())),
                notify: Notify::new(),
            }),
        }
    }

    /// A promise that is already settled with `reason`.
    pub fn failed(reason: FailReason) -> Self {
        let promise = Self::new();
        promise.fail(reason);
        promise
    }

    fn settle(&self, result: Result<T, FailReason>) {
        let result = Arc::new(result);
        let listeners = {
            let mut state = self.inner.state.lock().expect("promise lock poisoned");
            match &mut *state {
                PromiseState::Done(_) => return,
                PromiseState::Pending(listeners) => {
                    let listeners = std::mem::take(listeners);
                    *state = PromiseState::Done(Arc::clone(&result));
                    listeners
                }
            }
        };
        // Listeners run outside the lock; they may touch this promise.
        for listener in listeners {
            listener(&result);
        }
        self.inner.notify.notify_waiters();
    }

    pub fn complete(&self, value: T) {
        self.settle(Ok(value));
    }

    pub fn fail(&self, reason: FailReason) {
        self.settle(Err(reason));
    }

    /// Cancel the operation. Settles the promise with
    /// [`FailReason::Cancelled`]; in-flight work observing the promise stops
    /// at its next checkpoint.
    pub fn cancel(&self) {
        self.settle(Err(FailReason::Cancelled));
    }

    pub fn is_done(&self) -> bool {
        matches!(
            &*self.inner.state.lock().expect("promise lock poisoned"),
            PromiseState::Done(_)
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            &*self.inner.state.lock().expect("promise lock poisoned"),
            PromiseState::Done(result) if matches!(**result, Err(FailReason::Cancelled))
        )
    }

    /// Attach a completion listener. Runs immediately when already settled.
    pub fn add_listener(&self, listener: impl FnOnce(&Result<T, FailReason>) + Send + 'static) {
        let settled = {
            let mut state = self.inner.state.lock().expect("promise lock poisoned");
            match &mut *state {
                PromiseState::Pending(listeners) => {
                    listeners.push(Box::new(listener));
                    return;
                }
                PromiseState::Done(result) => Arc::clone(result),
            }
        };
        listener(&settled);
    }
}

impl<T: Clone> Promise<T> {
    /// Wait for settlement and clone the outcome.
    pub async fn await_result(&self) -> Result<T, FailReason> {
        loop {
            let notified = self.inner.notify.notified();
            if let PromiseState::Done(result) =
                &*self.inner.state.lock().expect("promise lock poisoned")
            {
                return (**result).clone();
            }
            notified.await;
        }
    }

    /// Snapshot of the outcome, if settled.
    pub fn result(&self) -> Option<Result<T, FailReason>> {
        match &*self.inner.state.lock().expect("promise lock poisoned") {
            PromiseState::Done(result) => Some((**result).clone()),
            PromiseState::Pending(_) => None,
        }
    }
}

/// Join N sub-promises, succeeding once `success_threshold` of them
/// completed.
///
/// The joined promise resolves to the successful values in completion
/// order. It fails with [`FailReason::TooFewResults`] as soon as reaching
/// the threshold becomes impossible. A threshold of zero succeeds
/// immediately with an empty result.
pub fn late_join<T: Clone + Send + Sync + 'static>(
    promises: Vec<Promise<T>>,
    success_threshold: usize,
) -> Promise<Vec<T>> {
    let joined: Promise<Vec<T>> = Promise::new();
    if success_threshold == 0 {
        joined.complete(Vec::new());
        return joined;
    }
    if promises.len() < success_threshold {
        joined.fail(FailReason::TooFewResults {
            got: 0,
            required: success_threshold,
        });
        return joined;
    }

    struct JoinState<T> {
        successes: Vec<T>,
        failures: usize,
    }
    let total = promises.len();
    let state = Arc::new(Mutex::new(JoinState {
        successes: Vec::new(),
        failures: 0,
    }));

    for promise in promises {
        let state = Arc::clone(&state);
        let joined = joined.clone();
        promise.add_listener(move |result| {
            let mut state = state.lock().expect("join lock poisoned");
            match result {
                Ok(value) => {
                    state.successes.push(value.clone());
                    if state.successes.len() == success_threshold {
                        joined.complete(state.successes.clone());
                    }
                }
                Err(_) => {
                    state.failures += 1;
                    if total - state.failures < success_threshold {
                        joined.fail(FailReason::TooFewResults {
                            got: state.successes.len(),
                            required: success_threshold,
                        });
                    }
                }
            }
        });
    }
    joined
}
