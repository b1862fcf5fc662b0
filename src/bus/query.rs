use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

/// Stream of future events accepted by a matcher.
///
/// Ends when the bus is reset or dropped. Dropping the query unregisters it
/// on the next dispatch.
pub struct Query<E> {
    rx: mpsc::UnboundedReceiver<E>,
}

impl<E> Query<E> {
    pub(super) fn new(rx: mpsc::UnboundedReceiver<E>) -> Self {
        Self { rx }
    }

    /// Waits for the next event; `None` once the query ended.
    pub async fn recv(&mut self) -> Option<E> {
        self.rx.recv().await
    }

    /// Returns an already delivered event without waiting.
    pub fn try_next(&mut self) -> Option<E> {
        self.rx.try_recv().ok()
    }

    /// Stops receiving; events already delivered can still be read.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

impl<E> Stream for Query<E> {
    type Item = E;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<E>> {
        self.rx.poll_recv(cx)
    }
}

impl<E> fmt::Debug for Query<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query").field("closed", &self.rx.is_closed()).finish()
    }
}
