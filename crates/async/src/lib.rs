//! A promise/future continuation engine with blocking barriers
//!
//! This crate provides the asynchronous result plumbing used by the rest of
//! the workspace: single-result promises that can be settled from any thread,
//! continuation chaining, a conjunction combinator over many promises, and a
//! blocking barrier with timeout for synchronous call sites.
//!
//! It has no dependency on networking or on any async runtime; settlement and
//! continuation dispatch are built on `std::sync` primitives only.
//!
//! # Core types
//!
//! - [`Promise`]: the consumer handle. Chain work with [`Promise::then`],
//!   join many with [`when_all`].
//! - [`Completer`]: the producer handle. [`Completer::resolve`] and
//!   [`Completer::reject`] settle the promise exactly once; later calls are
//!   ignored and report `false`.
//! - [`Rejection`]: a cheaply cloneable, type-erased error that travels down
//!   continuation chains.
//! - [`Barrier`]: blocks the calling thread until a promise settles, or until
//!   a deadline passes ([`Barrier::wait_for`]).
//!
//! # Example
//!
//! ```
//! use braid_async::{Barrier, Promise, rethrow};
//! use std::time::Duration;
//!
//! let (promise, completer) = Promise::pending();
//!
//! let chained = promise.then(|n: &u32| Ok(n * 2), rethrow);
//!
//! std::thread::spawn(move || {
//!     completer.resolve(21);
//! });
//!
//! let barrier = Barrier::new(chained);
//! let outcome = barrier.wait_for(Duration::from_secs(1));
//! assert_eq!(outcome.into_result().unwrap().unwrap(), 42);
//! ```
//!
//! # Concurrency contract
//!
//! Settlement may race with continuation registration from other threads;
//! every registered continuation runs exactly once, in registration order.
//! A continuation registered after settlement runs immediately on the
//! registering thread. Settlement is monotonic: a promise that is resolved
//! or rejected never changes again.

mod promise;
pub use promise::Completer;
pub use promise::Promise;
pub use promise::Rejection;
pub use promise::ignore;
pub use promise::rethrow;
pub use promise::when_all;

mod barrier;
pub use barrier::Barrier;
pub use barrier::WaitOutcome;
