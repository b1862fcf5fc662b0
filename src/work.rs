//! # Work produced by a handler.
//!
//! A listener's handler maps one event to a [`Work`] value. Whatever shape the
//! work takes, the listener only ever needs one capability from it: *subscribe,
//! yielding next/error/complete, and stop when asked*. [`Work::into_stream`] is the
//! adapter that turns every shape into that capability:
//!
//! ```text
//! Work::None        ─► completes immediately
//! Work::Value(v)    ─► next(v), complete
//! Work::Fail(e)     ─► error(e)
//! Work::Future(f)   ─► next(f.await?), complete
//! Work::Stream(s)   ─► next(..)*, complete | error
//! Work::Producer(p) ─► p(emitter) drives next/error/complete; cleanup on drop
//! ```
//!
//! ## Rules
//! - Dropping the stream is how a handling is canceled; producer cleanups run then.
//! - An [`Emitter`] ignores every call after `error` or `complete`.
//! - A producer whose emitters are all dropped without `complete` counts as completed.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::{self, BoxFuture};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::time::Sleep;

use crate::error::HandlerError;

/// Release logic returned by a producer, run when its handling ends.
pub type Cleanup = Box<dyn FnOnce() + Send + 'static>;

type ProducerFn<T> = Box<dyn FnOnce(Emitter<T>) -> Option<Cleanup> + Send + 'static>;

/// Stream of results every [`Work`] is reduced to.
pub type WorkStream<T> = BoxStream<'static, Result<T, HandlerError>>;

/// What a handler returns for one event.
pub enum Work<T> {
    /// Fire-and-forget: the side effect already happened.
    None,
    /// A single value available right away.
    Value(T),
    /// A synchronous failure.
    Fail(HandlerError),
    /// A single eventual value.
    Future(BoxFuture<'static, Result<T, HandlerError>>),
    /// A cancelable sequence of values.
    Stream(WorkStream<T>),
    /// An imperative producer driving an [`Emitter`].
    Producer(ProducerFn<T>),
}

impl<T> Work<T>
where
    T: Send + 'static,
{
    /// Work that completes without a value.
    pub fn none() -> Self {
        Work::None
    }

    /// Work that yields one value and completes.
    pub fn value(v: T) -> Self {
        Work::Value(v)
    }

    /// Work that fails immediately.
    pub fn fail(err: HandlerError) -> Self {
        Work::Fail(err)
    }

    /// Work backed by an infallible future.
    pub fn future<F>(fut: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Work::Future(Box::pin(fut.map(Ok)))
    }

    /// Work backed by a fallible future.
    pub fn try_future<F>(fut: F) -> Self
    where
        F: Future<Output = Result<T, HandlerError>> + Send + 'static,
    {
        Work::Future(Box::pin(fut))
    }

    /// Work backed by an infallible stream.
    pub fn stream<S>(s: S) -> Self
    where
        S: Stream<Item = T> + Send + 'static,
    {
        Work::Stream(s.map(Ok).boxed())
    }

    /// Work backed by a fallible stream; the first `Err` terminates it.
    pub fn try_stream<S>(s: S) -> Self
    where
        S: Stream<Item = Result<T, HandlerError>> + Send + 'static,
    {
        Work::Stream(s.boxed())
    }

    /// Work yielding every item of an iterator, synchronously.
    pub fn iter<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Work::Stream(stream::iter(items).map(Ok).boxed())
    }

    /// Work driven imperatively through an [`Emitter`].
    ///
    /// The closure runs when the handling starts. It may return a [`Cleanup`]
    /// that runs once the handling ends, including on cancellation.
    ///
    /// # Example
    /// ```
    /// use effectbus::Work;
    ///
    /// let work: Work<u32> = Work::producer(|em| {
    ///     em.next(1);
    ///     em.next(2);
    ///     em.complete();
    ///     None
    /// });
    /// # drop(work);
    /// ```
    pub fn producer<F>(f: F) -> Self
    where
        F: FnOnce(Emitter<T>) -> Option<Cleanup> + Send + 'static,
    {
        Work::Producer(Box::new(f))
    }

    /// Races the work against a timer.
    ///
    /// If the work has not terminated after `timeout`, it is dropped and the
    /// handling fails with [`HandlerError::Timeout`]. The timer starts when the
    /// handling starts. A zero timeout leaves the work unchanged.
    pub fn timeout(self, timeout: Duration) -> Self {
        if timeout == Duration::ZERO {
            return self;
        }
        Work::Stream(
            Timeout {
                inner: self.into_stream(),
                sleep: None,
                timeout,
                done: false,
            }
            .boxed(),
        )
    }

    /// Reduces the work to its stream form.
    ///
    /// Producers are started here; their cleanup is tied to the returned stream.
    pub fn into_stream(self) -> WorkStream<T> {
        match self {
            Work::None => stream::empty().boxed(),
            Work::Value(v) => stream::once(future::ready(Ok(v))).boxed(),
            Work::Fail(e) => stream::once(future::ready(Err(e))).boxed(),
            Work::Future(f) => stream::once(f).boxed(),
            Work::Stream(s) => s,
            Work::Producer(f) => Produced::start(f).boxed(),
        }
    }
}

impl<T> From<()> for Work<T> {
    fn from(_: ()) -> Self {
        Work::None
    }
}

impl<T> From<Result<T, HandlerError>> for Work<T> {
    fn from(res: Result<T, HandlerError>) -> Self {
        match res {
            Ok(v) => Work::Value(v),
            Err(e) => Work::Fail(e),
        }
    }
}

impl<T> fmt::Debug for Work<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Work::None => "None",
            Work::Value(_) => "Value",
            Work::Fail(_) => "Fail",
            Work::Future(_) => "Future",
            Work::Stream(_) => "Stream",
            Work::Producer(_) => "Producer",
        };
        f.debug_tuple("Work").field(&kind).finish()
    }
}

enum Signal<T> {
    Next(T),
    Error(HandlerError),
    Complete,
}

/// Imperative sink handed to a [`Work::producer`] closure.
///
/// Cheap to clone; every clone feeds the same handling.
pub struct Emitter<T> {
    tx: mpsc::UnboundedSender<Signal<T>>,
    closed: Arc<AtomicBool>,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            closed: Arc::clone(&self.closed),
        }
    }
}

impl<T> Emitter<T> {
    /// Delivers a value. Returns `false` if the handling already ended.
    pub fn next(&self, v: T) -> bool {
        !self.is_closed() && self.tx.send(Signal::Next(v)).is_ok()
    }

    /// Fails the handling. Later calls are ignored.
    pub fn error(&self, err: HandlerError) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.tx.send(Signal::Error(err));
        }
    }

    /// Completes the handling. Later calls are ignored.
    pub fn complete(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.tx.send(Signal::Complete);
        }
    }

    /// Returns `true` once the handling ended or the emitter was terminated.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.tx.is_closed()
    }
}

/// Stream side of a producer.
struct Produced<T> {
    rx: mpsc::UnboundedReceiver<Signal<T>>,
    closed: Arc<AtomicBool>,
    cleanup: Option<Cleanup>,
    done: bool,
}

impl<T> Produced<T> {
    fn start(f: ProducerFn<T>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let emitter = Emitter {
            tx,
            closed: Arc::clone(&closed),
        };
        let cleanup = f(emitter);
        Self {
            rx,
            closed,
            cleanup,
            done: false,
        }
    }
}

impl<T> Stream for Produced<T> {
    type Item = Result<T, HandlerError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(Signal::Next(v))) => Poll::Ready(Some(Ok(v))),
            Poll::Ready(Some(Signal::Error(e))) => {
                self.done = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(Some(Signal::Complete)) | Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for Produced<T> {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
        self.rx.close();
        if let Some(cleanup) = self.cleanup.take() {
            if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(cleanup)) {
                let err = HandlerError::from_panic(panic);
                tracing::warn!(error = err.as_label(), "producer cleanup panicked: {err}");
            }
        }
    }
}

/// Stream racing inner work against a lazily armed timer.
struct Timeout<T> {
    inner: WorkStream<T>,
    sleep: Option<Pin<Box<Sleep>>>,
    timeout: Duration,
    done: bool,
}

impl<T> Stream for Timeout<T> {
    type Item = Result<T, HandlerError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        if let Poll::Ready(item) = self.inner.poll_next_unpin(cx) {
            if !matches!(item, Some(Ok(_))) {
                self.done = true;
            }
            return Poll::Ready(item);
        }
        let timeout = self.timeout;
        let sleep = self
            .sleep
            .get_or_insert_with(|| Box::pin(tokio::time::sleep(timeout)));
        match sleep.as_mut().poll(cx) {
            Poll::Ready(()) => {
                self.done = true;
                Poll::Ready(Some(Err(HandlerError::Timeout { timeout })))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use std::sync::atomic::AtomicUsize;

    fn collect<T: Send + 'static>(work: Work<T>) -> Vec<Result<T, HandlerError>> {
        block_on(work.into_stream().collect::<Vec<_>>())
    }

    #[test]
    fn test_shapes_reduce_to_streams() {
        assert!(collect(Work::<u8>::none()).is_empty());
        assert_eq!(collect(Work::value(7)), vec![Ok(7)]);
        assert_eq!(collect(Work::iter(vec![1, 2, 3])), vec![Ok(1), Ok(2), Ok(3)]);
        assert_eq!(
            collect(Work::<u8>::fail(HandlerError::fail("x"))),
            vec![Err(HandlerError::fail("x"))]
        );
        assert_eq!(collect(Work::future(async { 5 })), vec![Ok(5)]);
        assert_eq!(
            collect(Work::from(Err::<u8, _>(HandlerError::fail("y")))),
            vec![Err(HandlerError::fail("y"))]
        );
    }

    #[test]
    fn test_emitter_ignores_calls_after_complete() {
        let work = Work::producer(|em| {
            em.next(1);
            em.complete();
            assert!(!em.next(2));
            em.error(HandlerError::fail("late"));
            None
        });
        assert_eq!(collect(work), vec![Ok(1)]);
    }

    #[test]
    fn test_dropped_emitter_counts_as_complete() {
        let work = Work::producer(|em| {
            em.next("only");
            drop(em);
            None
        });
        assert_eq!(collect(work), vec![Ok("only")]);
    }

    #[test]
    fn test_cleanup_runs_when_stream_dropped() {
        let cleaned = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&cleaned);
        let kept = Arc::new(std::sync::Mutex::new(None));
        let k = Arc::clone(&kept);

        let work: Work<u8> = Work::producer(move |em| {
            *k.lock().unwrap() = Some(em);
            Some(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }))
        });
        let stream = work.into_stream();
        assert_eq!(cleaned.load(Ordering::SeqCst), 0);
        drop(stream);
        assert_eq!(cleaned.load(Ordering::SeqCst), 1);

        let em = kept.lock().unwrap().take().unwrap();
        assert!(em.is_closed());
        assert!(!em.next(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_slow_work() {
        let slow = Work::future(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            1u8
        })
        .timeout(Duration::from_millis(10));
        let out: Vec<_> = slow.into_stream().collect().await;
        assert_eq!(
            out,
            vec![Err(HandlerError::Timeout {
                timeout: Duration::from_millis(10)
            })]
        );

        let fast = Work::future(async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            2u8
        })
        .timeout(Duration::from_millis(10));
        let out: Vec<_> = fast.into_stream().collect().await;
        assert_eq!(out, vec![Ok(2)]);
    }
}
