//! Single-settlement deferred results.
//!
//! A [`Deferred`] represents the outcome of one cache operation. It starts
//! pending and settles exactly once, either fulfilled with a value or rejected
//! with a [`CacheError`]. Later attempts to settle are ignored.
//!
//! Two ways to produce one:
//!
//! - [`Deferred::new`] runs an executor synchronously before returning; the
//!   executor receives a [`Settler`] and usually settles it right away.
//! - [`Deferred::spawn`] runs a future on a tokio worker and settles with its
//!   output. This is what the cache uses for backend calls.
//!
//! Observers either attach continuations with [`Deferred::then`] or await the
//! outcome (`deferred.await` or [`Deferred::wait`]). Continuations attached
//! after settlement fire immediately with the known outcome.
//!
//! ```ignore
//! let d = Deferred::new(|settler| {
//!     settler.resolve(42);
//!     settler.reject(CacheError::Abandoned); // no-op, already settled
//! });
//! assert_eq!(d.await, Ok(42));
//! ```

use std::fmt;
use std::future::{Future, IntoFuture};
use std::sync::{Arc, OnceLock};

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{CacheError, CacheResult};

type Continuation<T> = Box<dyn FnOnce(&CacheResult<T>) + Send>;

struct Shared<T> {
    outcome: OnceLock<CacheResult<T>>,
    continuations: Mutex<Vec<Continuation<T>>>,
    settled: Notify,
}

impl<T> Shared<T> {
    fn settle(&self, outcome: CacheResult<T>) -> bool {
        if self.outcome.set(outcome).is_err() {
            return false;
        }
        let pending = std::mem::take(&mut *self.continuations.lock());
        if let Some(outcome) = self.outcome.get() {
            for continuation in pending {
                continuation(outcome);
            }
        }
        self.settled.notify_waiters();
        true
    }

    fn attach(&self, continuation: Continuation<T>) {
        let mut continuations = self.continuations.lock();
        match self.outcome.get() {
            Some(outcome) => {
                drop(continuations);
                continuation(outcome);
            }
            None => continuations.push(continuation),
        }
    }
}

/// Handle to the outcome of one operation. Clones observe the same outcome.
pub struct Deferred<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.shared.outcome.get() {
            None => "pending",
            Some(Ok(_)) => "fulfilled",
            Some(Err(_)) => "rejected",
        };
        f.debug_struct("Deferred").field("state", &state).finish()
    }
}

/// The settling half handed to an executor.
///
/// Dropping a settler that never settled rejects the result with
/// [`CacheError::Abandoned`], so observers are never left waiting on work that
/// panicked or returned early.
pub struct Settler<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Settler<T> {
    /// Fulfill the result. Returns `false` if it was already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.shared.settle(Ok(value))
    }

    /// Reject the result. Returns `false` if it was already settled.
    pub fn reject(&self, error: CacheError) -> bool {
        self.shared.settle(Err(error))
    }

    /// Settle with an already-computed outcome.
    pub fn settle(&self, outcome: CacheResult<T>) -> bool {
        self.shared.settle(outcome)
    }
}

impl<T> Drop for Settler<T> {
    fn drop(&mut self) {
        if self.shared.outcome.get().is_none() {
            self.shared.settle(Err(CacheError::Abandoned));
        }
    }
}

impl<T> Deferred<T> {
    fn pending() -> (Self, Settler<T>) {
        let shared = Arc::new(Shared {
            outcome: OnceLock::new(),
            continuations: Mutex::new(Vec::new()),
            settled: Notify::new(),
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            Settler { shared },
        )
    }

    /// Run `executor` to completion before returning.
    ///
    /// The executor may also move the settler elsewhere and settle later.
    pub fn new<F>(executor: F) -> Self
    where
        F: FnOnce(Settler<T>),
    {
        let (deferred, settler) = Self::pending();
        executor(settler);
        deferred
    }

    /// An already fulfilled result.
    pub fn resolved(value: T) -> Self {
        Self::new(|s| {
            s.resolve(value);
        })
    }

    /// An already rejected result.
    pub fn rejected(error: CacheError) -> Self {
        Self::new(|s| {
            s.reject(error);
        })
    }

    /// Settle with the output of `work`, run on a tokio worker.
    ///
    /// Must be called from within a tokio runtime. Once spawned the work runs
    /// to completion; dropping every handle does not cancel it.
    pub fn spawn<F>(work: F) -> Self
    where
        F: Future<Output = CacheResult<T>> + Send + 'static,
        T: Send + Sync + 'static,
    {
        let (deferred, settler) = Self::pending();
        tokio::spawn(async move {
            let outcome = work.await;
            settler.settle(outcome);
        });
        deferred
    }

    pub fn is_settled(&self) -> bool {
        self.shared.outcome.get().is_some()
    }

    /// The outcome, if already settled.
    pub fn outcome(&self) -> Option<&CacheResult<T>> {
        self.shared.outcome.get()
    }

    /// Attach success and failure continuations.
    pub fn then<F, G>(&self, on_fulfilled: F, on_rejected: G)
    where
        F: FnOnce(&T) + Send + 'static,
        G: FnOnce(&CacheError) + Send + 'static,
    {
        self.shared.attach(Box::new(move |outcome| match outcome {
            Ok(value) => on_fulfilled(value),
            Err(error) => on_rejected(error),
        }));
    }

    /// Attach a continuation that sees the whole outcome.
    pub fn on_settled<F>(&self, continuation: F)
    where
        F: FnOnce(&CacheResult<T>) + Send + 'static,
    {
        self.shared.attach(Box::new(continuation));
    }

    /// Wait for settlement and return a copy of the outcome.
    pub async fn wait(&self) -> CacheResult<T>
    where
        T: Clone,
    {
        loop {
            let notified = self.shared.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(outcome) = self.shared.outcome.get() {
                return outcome.clone();
            }
            notified.await;
        }
    }
}

impl<T> IntoFuture for Deferred<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = CacheResult<T>;
    type IntoFuture = BoxFuture<'static, CacheResult<T>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.wait().await })
    }
}
