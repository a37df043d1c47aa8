//! Blocking adapter over a [`Promise`].

use std::fmt;
use std::time::Duration;

use crate::{Promise, Rejection};

/// The result of a bounded wait on a [`Barrier`].
///
/// A timeout is distinct from a rejection: the underlying work is not
/// cancelled, the waiter merely stopped waiting. The promise may still
/// settle later and its continuations still fire.
#[derive(Debug)]
pub enum WaitOutcome<T> {
    /// The promise resolved within the deadline.
    Resolved(T),
    /// The promise was rejected within the deadline.
    Rejected(Rejection),
    /// The deadline passed with the promise still pending.
    TimedOut,
}

impl<T> WaitOutcome<T> {
    pub fn is_timed_out(&self) -> bool {
        matches!(self, WaitOutcome::TimedOut)
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, WaitOutcome::Resolved(_))
    }

    /// Converts the outcome into the settled result, or `None` on timeout.
    pub fn into_result(self) -> Option<Result<T, Rejection>> {
        match self {
            WaitOutcome::Resolved(value) => Some(Ok(value)),
            WaitOutcome::Rejected(rejection) => Some(Err(rejection)),
            WaitOutcome::TimedOut => None,
        }
    }
}

/// Blocks a calling thread until a promise settles.
///
/// Intended for application threads only; the I/O workers never wait on
/// barriers, so a handler blocking here cannot deadlock the transport.
pub struct Barrier<T> {
    promise: Promise<T>,
}

impl<T> fmt::Debug for Barrier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Barrier").field("promise", &self.promise).finish()
    }
}

impl<T: Clone> Barrier<T> {
    pub fn new(promise: Promise<T>) -> Self {
        Self { promise }
    }

    /// Blocks until the promise settles, returning the value or re-raising
    /// the rejection on the waiting thread.
    pub fn wait(&self) -> Result<T, Rejection> {
        let settled = self.promise.wait_settled(None).expect("unbounded wait always observes settlement");
        settled.as_ref().clone()
    }

    /// Blocks for at most `timeout`.
    pub fn wait_for(&self, timeout: Duration) -> WaitOutcome<T> {
        match self.promise.wait_settled(Some(timeout)) {
            Some(settled) => match settled.as_ref() {
                Ok(value) => WaitOutcome::Resolved(value.clone()),
                Err(rejection) => WaitOutcome::Rejected(rejection.clone()),
            },
            None => WaitOutcome::TimedOut,
        }
    }
}

impl<T: Clone> From<Promise<T>> for Barrier<T> {
    fn from(promise: Promise<T>) -> Self {
        Self::new(promise)
    }
}
