//! Single-result promises with continuation chaining.
//!
//! A [`Promise`] is a shared, monotonic result slot. It starts out pending,
//! is settled exactly once by its [`Completer`] (resolved with a value or
//! rejected with a [`Rejection`]), and from then on never changes. Consumers
//! observe the result either by chaining continuations with
//! [`Promise::then`] or by blocking on a [`Barrier`](crate::Barrier).
//!
//! Settlement and registration may happen on different threads. The state is
//! a tagged variant behind one mutex per promise: pending promises hold the
//! queue of registered continuations, settled promises hold the shared
//! result. Continuations always run outside the lock, so a continuation may
//! itself register further continuations on the same promise.

use std::error::Error;
use std::fmt;
use std::mem;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;

/// A cheaply cloneable, type-erased error carried down rejection paths.
///
/// Rejections cross thread boundaries and fan out to every continuation
/// registered on a promise, so the underlying error is reference-counted.
/// The concrete error type survives erasure and can be recovered with
/// [`Rejection::downcast_ref`].
#[derive(Clone)]
pub struct Rejection(Arc<dyn Error + Send + Sync>);

impl Rejection {
    /// Wraps a concrete error.
    pub fn new<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self(Arc::new(error))
    }

    /// Builds a rejection from a plain message.
    pub fn msg<S: Into<String>>(message: S) -> Self {
        Self::new(MessageError(message.into()))
    }

    /// Returns the concrete error if the rejection holds an `E`.
    pub fn downcast_ref<E: Error + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref()
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
struct MessageError(String);

/// A reject-continuation that propagates the rejection to the derived
/// promise, surfacing it at whatever barrier eventually waits on the chain.
pub fn rethrow<U>(rejection: Rejection) -> Result<U, Rejection> {
    Err(rejection)
}

/// A reject-continuation that swallows the rejection; the derived promise
/// resolves with `()`. For best-effort call sites that discard failures.
pub fn ignore(_rejection: Rejection) -> Result<(), Rejection> {
    Ok(())
}

type Settled<T> = Arc<Result<T, Rejection>>;
type Continuation<T> = Box<dyn FnOnce(&Result<T, Rejection>) + Send>;

enum State<T> {
    /// Not yet settled; holds continuations in registration order.
    Pending(Vec<Continuation<T>>),
    Settled(Settled<T>),
}

struct Shared<T> {
    state: Mutex<State<T>>,
    settled: Condvar,
}

impl<T> Shared<T> {
    /// A poisoned promise mutex only means a continuation panicked while we
    /// were settling; the state itself is still coherent, so keep going.
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The consumer handle of a single asynchronous result.
///
/// Cloning a promise clones the handle, not the result: all clones observe
/// the same settlement. See the [module docs](self) for the concurrency
/// contract.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise").field("settled", &self.is_settled()).finish()
    }
}

/// The producer handle of a [`Promise`].
///
/// Completers are cloneable so racing producers can each hold one; the first
/// to settle wins, the rest observe `false` from [`resolve`](Self::resolve)
/// or [`reject`](Self::reject).
pub struct Completer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Completer<T> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<T> fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer").finish_non_exhaustive()
    }
}

impl<T> Promise<T> {
    /// Creates a pending promise and its producer handle.
    pub fn pending() -> (Promise<T>, Completer<T>) {
        let shared = Arc::new(Shared { state: Mutex::new(State::Pending(Vec::new())), settled: Condvar::new() });
        (Promise { shared: Arc::clone(&shared) }, Completer { shared })
    }

    /// Creates a promise that is already resolved with `value`.
    pub fn resolved(value: T) -> Promise<T> {
        Promise::settled_with(Ok(value))
    }

    /// Creates a promise that is already rejected.
    pub fn rejected(rejection: Rejection) -> Promise<T> {
        Promise::settled_with(Err(rejection))
    }

    fn settled_with(result: Result<T, Rejection>) -> Promise<T> {
        let shared = Arc::new(Shared { state: Mutex::new(State::Settled(Arc::new(result))), settled: Condvar::new() });
        Promise { shared }
    }

    /// Returns whether the promise has been resolved or rejected.
    pub fn is_settled(&self) -> bool {
        matches!(&*self.shared.lock(), State::Settled(_))
    }

    /// Registers a raw continuation.
    ///
    /// Runs immediately on the calling thread if the promise has already
    /// settled, otherwise later on the settling thread.
    pub(crate) fn on_settle(&self, continuation: Continuation<T>) {
        let settled = {
            let mut state = self.shared.lock();
            match &mut *state {
                State::Pending(continuations) => {
                    continuations.push(continuation);
                    return;
                }
                State::Settled(result) => Arc::clone(result),
            }
        };
        continuation(&settled);
    }

    /// Blocks until the promise settles, or until `timeout` elapses if one
    /// is given. Returns `None` on timeout.
    pub(crate) fn wait_settled(&self, timeout: Option<Duration>) -> Option<Settled<T>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.shared.lock();
        loop {
            if let State::Settled(result) = &*state {
                return Some(Arc::clone(result));
            }
            state = match deadline {
                None => self.shared.settled.wait(state).unwrap_or_else(|poisoned| poisoned.into_inner()),
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return None;
                    }
                    let (state, _timed_out) = self
                        .shared
                        .settled
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    state
                }
            };
        }
    }
}

impl<T: Send + 'static> Promise<T> {
    /// Chains continuations onto this promise.
    ///
    /// Returns a new promise settled by whichever callback matches the
    /// parent's settlement: `on_resolve` sees the value, `on_reject` the
    /// rejection. Either callback returning `Err` rejects the derived
    /// promise, so errors propagate forward through chains unless
    /// intercepted. Use [`rethrow`] to pass rejections through unchanged and
    /// [`ignore`] to drop them.
    pub fn then<U, F, R>(&self, on_resolve: F, on_reject: R) -> Promise<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&T) -> Result<U, Rejection> + Send + 'static,
        R: FnOnce(Rejection) -> Result<U, Rejection> + Send + 'static,
    {
        let (derived, completer) = Promise::pending();
        self.on_settle(Box::new(move |result| {
            let derived_result = match result {
                Ok(value) => on_resolve(value),
                Err(rejection) => on_reject(rejection.clone()),
            };
            completer.settle(derived_result);
        }));
        derived
    }
}

impl<T> Completer<T> {
    /// Resolves the promise with `value`.
    ///
    /// Returns `true` if this call settled the promise. A promise that has
    /// already settled is left untouched and `false` is returned; producers
    /// racing against each other (or against a rejection) are expected.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Rejects the promise. Same settle-once semantics as
    /// [`resolve`](Self::resolve).
    pub fn reject(&self, rejection: Rejection) -> bool {
        self.settle(Err(rejection))
    }

    fn settle(&self, result: Result<T, Rejection>) -> bool {
        let settled = Arc::new(result);
        let continuations = {
            let mut state = self.shared.lock();
            match &mut *state {
                State::Pending(continuations) => {
                    let continuations = mem::take(continuations);
                    *state = State::Settled(Arc::clone(&settled));
                    continuations
                }
                State::Settled(_) => return false,
            }
        };
        self.shared.settled.notify_all();

        // continuations run outside the lock so they may register further
        // continuations or clone the promise without deadlocking
        for continuation in continuations {
            continuation(&settled);
        }
        true
    }
}

/// Joins many promises into one.
///
/// The returned promise resolves with every value, in input order, once all
/// inputs have resolved; it rejects with the first rejection observed.
/// Remaining inputs are not cancelled; their settlements are simply ignored
/// by the already-settled conjunction.
pub fn when_all<T, I>(promises: I) -> Promise<Vec<T>>
where
    T: Clone + Send + Sync + 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    let promises: Vec<Promise<T>> = promises.into_iter().collect();
    if promises.is_empty() {
        return Promise::resolved(Vec::new());
    }

    struct Gather<T> {
        slots: Vec<Option<T>>,
        remaining: usize,
    }

    let (joined, completer) = Promise::pending();
    let gather = Arc::new(Mutex::new(Gather { slots: vec![None; promises.len()], remaining: promises.len() }));

    for (index, promise) in promises.iter().enumerate() {
        let gather = Arc::clone(&gather);
        let completer = completer.clone();
        promise.on_settle(Box::new(move |result| match result {
            Ok(value) => {
                let values = {
                    let mut gather = gather.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                    gather.slots[index] = Some(value.clone());
                    gather.remaining -= 1;
                    if gather.remaining > 0 {
                        return;
                    }
                    // remaining hit zero, so every slot has been filled
                    gather.slots.iter_mut().map(|slot| slot.take().expect("all slots filled")).collect()
                };
                completer.resolve(values);
            }
            Err(rejection) => {
                // first-error-wins: later settles are no-ops
                completer.reject(rejection.clone());
            }
        }));
    }

    joined
}
