//! Type-erased storage for fiber bodies.

use crate::tracing_compat::trace;
use crate::types::FiberId;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A fiber body, boxed and pinned for storage in the fiber table.
///
/// The body has already been wrapped by the spawn path to record its
/// outcome, so the stored output type is always `()`. Bodies are not `Send`;
/// fibers never leave their scheduler thread.
pub(crate) struct StoredFiber {
    future: Pin<Box<dyn Future<Output = ()>>>,
    fiber: FiberId,
    poll_count: u64,
}

impl StoredFiber {
    pub(crate) fn new<F>(fiber: FiberId, future: F) -> Self
    where
        F: Future<Output = ()> + 'static,
    {
        Self {
            future: Box::pin(future),
            fiber,
            poll_count: 0,
        }
    }

    /// Polls the body once.
    pub(crate) fn poll(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        self.poll_count += 1;
        trace!(fiber = %self.fiber, poll = self.poll_count, "fiber poll");
        let result = self.future.as_mut().poll(cx);
        trace!(
            fiber = %self.fiber,
            ready = result.is_ready(),
            "fiber poll done"
        );
        result
    }
}

impl std::fmt::Debug for StoredFiber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredFiber")
            .field("fiber", &self.fiber)
            .field("poll_count", &self.poll_count)
            .finish_non_exhaustive()
    }
}
