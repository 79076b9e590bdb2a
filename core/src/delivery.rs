//! Exactly-once delivery of the terminal outcome.
//!
//! # Design
//! The lifecycle task owns a [`Delivery`] holding the callback; the caller
//! holds a [`RequestHandle`]. They share one small cell: a `delivered` flag
//! whose only transition (false to true) is a compare-and-set, an `aborted`
//! flag, and a `Notify` the handle uses to wake the task. The handle never
//! calls the callback itself. Whoever loses the compare-and-set gets a
//! logged no-op, so the callback runs at most once, and the `Drop` impl
//! makes it run at least once even if the task is torn down early.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use log::debug;
use tokio::sync::Notify;

use crate::{
    error::{Error, Failure},
    response::Completion,
};

#[derive(Debug, Default)]
pub(crate) struct Shared {
    delivered: AtomicBool,
    aborted: AtomicBool,
    abort: Notify,
}

impl Shared {
    /// Resolves once the caller asks to abort.
    pub(crate) async fn abort_requested(&self) {
        self.abort.notified().await;
    }
}

/// Caller-side view of an in-flight request.
///
/// Dropping the handle does not cancel the request.
#[derive(Debug, Clone)]
pub struct RequestHandle {
    id: Arc<str>,
    shared: Arc<Shared>,
}

impl RequestHandle {
    /// Correlation id, `<client prefix>-<n>`.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Ask the request to stop. The callback then receives an aborted
    /// failure, unless an outcome was already on its way.
    ///
    /// Returns `false` when the request already finished or was already
    /// aborted (by an earlier call or by a timeout).
    pub fn abort(&self) -> bool {
        if self.shared.delivered.load(Ordering::Acquire) {
            debug!("[{}] abort after delivery ignored", self.id);
            return false;
        }
        if self.shared.aborted.swap(true, Ordering::AcqRel) {
            return false;
        }
        debug!("[{}] abort requested", self.id);
        self.shared.abort.notify_one();
        true
    }

    pub fn is_aborted(&self) -> bool {
        self.shared.aborted.load(Ordering::Acquire)
    }

    /// Whether the terminal outcome has been handed to the callback.
    pub fn is_finished(&self) -> bool {
        self.shared.delivered.load(Ordering::Acquire)
    }
}

/// Task-side single-use callback slot.
pub(crate) struct Delivery<F>
where
    F: FnOnce(Completion),
{
    id: Arc<str>,
    shared: Arc<Shared>,
    callback: Option<F>,
}

impl<F> Delivery<F>
where
    F: FnOnce(Completion),
{
    pub(crate) fn new(id: Arc<str>, callback: F) -> (Self, RequestHandle) {
        let shared = Arc::new(Shared::default());
        let handle = RequestHandle {
            id: Arc::clone(&id),
            shared: Arc::clone(&shared),
        };
        let delivery = Self {
            id,
            shared,
            callback: Some(callback),
        };
        (delivery, handle)
    }

    pub(crate) fn shared(&self) -> Arc<Shared> {
        Arc::clone(&self.shared)
    }

    /// Flag the request as aborted without waking anyone (timeouts).
    pub(crate) fn mark_aborted(&self) {
        self.shared.aborted.store(true, Ordering::Release);
    }

    /// Hand `completion` to the callback if nothing was delivered yet.
    pub(crate) fn deliver(&mut self, completion: Completion) -> bool {
        if self
            .shared
            .delivered
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("[{}] duplicate completion dropped", self.id);
            return false;
        }
        match self.callback.take() {
            Some(callback) => {
                callback(completion);
                true
            }
            None => false,
        }
    }
}

impl<F> Drop for Delivery<F>
where
    F: FnOnce(Completion),
{
    fn drop(&mut self) {
        if self.callback.is_some() {
            debug!("[{}] lifecycle ended without an outcome", self.id);
            self.mark_aborted();
            self.deliver(Err(Failure {
                error: Error::aborted(),
                response: None,
            }));
        }
    }
}
