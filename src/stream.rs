//! Partial-result streams and the combinators the dataset nodes share.
//!
//! A [`DataStream`] is cold: no computation or network traffic happens until it
//! is polled. Dropping it is how a consumer unsubscribes; every node releases its
//! resources (including remote subscriptions) when its stream is dropped.

use crate::error::DatasetError;
use crate::monoid::Monoid;
use crate::partial::PartialResult;
use anyhow::{Context, Result, bail};
use futures::stream::{self, BoxStream};
use futures::{StreamExt, future};
use std::future::Future;
use std::marker::PhantomData;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

/// Stream of partial results produced by one dataset operation.
pub type DataStream<R> = BoxStream<'static, Result<PartialResult<R>>>;

/// A stream that fails immediately with `err`.
pub fn failed<R: Send + 'static>(err: impl Into<anyhow::Error>) -> DataStream<R> {
    let err = err.into();
    stream::once(future::ready(Err(err))).boxed()
}

/// A stream with a single element.
pub fn just<R: Send + 'static>(pr: PartialResult<R>) -> DataStream<R> {
    stream::once(future::ready(Ok(pr))).boxed()
}

/// End the stream right after the first error it yields.
pub fn stop_after_error<R: Send + 'static>(input: DataStream<R>) -> DataStream<R> {
    input
        .scan(false, |failed, item| {
            if *failed {
                return future::ready(None);
            }
            *failed = item.is_err();
            future::ready(Some(item))
        })
        .boxed()
}

/// Collapse a stream into one element carrying its last value.
///
/// Progress of all elements is added up so the collapsed element accounts for
/// the same fraction of work as the whole stream did.
pub fn last_only<R: Send + 'static>(mut input: DataStream<R>) -> DataStream<R> {
    stream::once(async move {
        let mut done = 0.0;
        let mut last = None;
        while let Some(item) = input.next().await {
            let (d, value) = item?.into_parts();
            done += d;
            if value.is_some() {
                last = value;
            }
        }
        let value = last.ok_or(DatasetError::MissingValue)?;
        Ok(PartialResult::new(done, Some(value)))
    })
    .boxed()
}

/// Coalesce elements that arrive within `window` of the first one in a batch.
///
/// Each batch is added up with `monoid` and emitted as one element. A zero
/// window returns the input unchanged. Errors are forwarded immediately and end
/// the stream.
pub fn bundle<R, M>(input: DataStream<R>, window: Duration, monoid: Arc<M>) -> DataStream<R>
where
    R: Send + 'static,
    M: Monoid<PartialResult<R>>,
{
    if window.is_zero() {
        return input;
    }
    stream::unfold(Some(input), move |state| {
        let monoid = Arc::clone(&monoid);
        async move {
            let mut input = state?;
            let mut acc = match input.next().await? {
                Ok(pr) => pr,
                Err(e) => return Some((Err(e), None)),
            };
            let deadline = tokio::time::Instant::now() + window;
            loop {
                match tokio::time::timeout_at(deadline, input.next()).await {
                    Err(_) => return Some((Ok(acc), Some(input))),
                    Ok(None) => return Some((Ok(acc), None)),
                    Ok(Some(Ok(pr))) => acc = monoid.add(acc, pr),
                    Ok(Some(Err(e))) => return Some((Err(e), None)),
                }
            }
        }
    })
    .boxed()
}

/// Drive `future` to completion on a private current-thread runtime with the
/// timer enabled, so bundling windows and proxy deadlines work from plain
/// threads.
///
/// # Errors
///
/// Fails when called from inside a tokio runtime, or when the private runtime
/// cannot be built.
pub fn block_on<F: Future>(future: F) -> Result<F::Output> {
    if tokio::runtime::Handle::try_current().is_ok() {
        bail!("blocking operations cannot run inside a tokio runtime; await the single_* form instead");
    }
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("cannot build a runtime for a blocking operation")?;
    Ok(runtime.block_on(future))
}

/// Add up a whole stream with a partial-result monoid.
///
/// # Errors
///
/// Returns the first error the stream yields.
pub async fn reduce<R, M>(mut input: DataStream<R>, monoid: &M) -> Result<PartialResult<R>>
where
    M: Monoid<PartialResult<R>>,
{
    let mut acc = monoid.zero();
    while let Some(item) = input.next().await {
        acc = monoid.add(acc, item?);
    }
    Ok(acc)
}

/// Drain a stream that is expected to carry exactly one value.
///
/// # Errors
///
/// Fails if the stream fails, carries no value, or carries more than one.
pub async fn sole_value<R>(mut input: DataStream<R>) -> Result<R> {
    let mut found = None;
    while let Some(item) = input.next().await {
        if let Some(v) = item?.into_value() {
            if found.is_some() {
                anyhow::bail!("expected a single value but the stream produced several");
            }
            found = Some(v);
        }
    }
    found.ok_or_else(|| DatasetError::MissingValue.into())
}

/// Partial-result monoid for streams where at most one element carries a value.
///
/// Fractions add; the value is whichever side has one. This is the reduction
/// used for map, flat map and zip streams, whose values are datasets.
pub struct ProgressMonoid<R>(PhantomData<fn() -> R>);

impl<R> ProgressMonoid<R> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<R> Default for ProgressMonoid<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: 'static> Monoid<PartialResult<R>> for ProgressMonoid<R> {
    fn zero(&self) -> PartialResult<R> {
        PartialResult::progress(0.0)
    }

    fn add(&self, left: PartialResult<R>, right: PartialResult<R>) -> PartialResult<R> {
        PartialResult::new(left.done() + right.done(), left.into_value().or(right.into_value()))
    }
}

/// Run `f`, turning a panic into [`DatasetError::Computation`].
pub(crate) fn guarded<R>(f: impl FnOnce() -> Result<R>) -> Result<R> {
    catch_unwind(AssertUnwindSafe(f)).map_err(DatasetError::from_panic)?
}

/// Run `f` on the shared rayon pool and wait for it without blocking the caller.
pub(crate) async fn run_on_pool<R, F>(f: F) -> Result<R>
where
    R: Send + 'static,
    F: FnOnce() -> Result<R> + Send + 'static,
{
    let (tx, rx) = futures::channel::oneshot::channel();
    rayon::spawn(move || {
        // The receiver is gone when the consumer unsubscribed mid-computation.
        let _ = tx.send(guarded(f));
    });
    rx.await
        .map_err(|_| DatasetError::Computation("worker pool dropped the task".into()))?
}
