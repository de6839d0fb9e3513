use super::Dataset;
use crate::control::{ControlMessage, FanOutInfo, StatusList, StatusListMonoid, run_hook};
use crate::error::DatasetError;
use crate::monoid::Monoid;
use crate::ops::{DataBound, Map, ResultBound, Sketch, SketchMonoid};
use crate::pair::Pair;
use crate::partial::{PartialResult, PartialResultMonoid};
use crate::stream::{self as ds, DataStream, ProgressMonoid};
use anyhow::{Result, anyhow};
use futures::stream::{self, BoxStream, SelectAll, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// A fan-out over a fixed, ordered list of children.
///
/// Operations are broadcast to all children at once and their streams merged
/// as elements arrive. Progress is rescaled by `1 / children` so the merged
/// stream still sums to 1.0. If any child fails, the merged stream yields that
/// error and ends, which drops (and so cancels) every sibling stream.
pub struct ParallelDataset<T> {
    children: Arc<[Dataset<T>]>,
    bundle_interval: Duration,
}

impl<T> Clone for ParallelDataset<T> {
    fn clone(&self) -> Self {
        Self {
            children: Arc::clone(&self.children),
            bundle_interval: self.bundle_interval,
        }
    }
}

impl<T> ParallelDataset<T> {
    pub fn new(children: Vec<Dataset<T>>) -> Self {
        Self {
            children: children.into(),
            bundle_interval: Duration::ZERO,
        }
    }

    /// Coalesce results that arrive within `interval` of each other into one
    /// element. Zero disables bundling.
    pub fn with_bundle_interval(mut self, interval: Duration) -> Self {
        self.bundle_interval = interval;
        self
    }

    pub fn children(&self) -> &[Dataset<T>] {
        &self.children
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn bundle_interval(&self) -> Duration {
        self.bundle_interval
    }

    fn scale(&self) -> f64 {
        1.0 / self.children.len() as f64
    }

    /// Same shape and settings, new children.
    fn rebuild<S>(&self, children: Vec<Dataset<S>>) -> ParallelDataset<S> {
        ParallelDataset::new(children).with_bundle_interval(self.bundle_interval)
    }
}

type Tagged<R> = BoxStream<'static, (usize, Result<PartialResult<R>>)>;

fn merge_tagged<R: Send + 'static>(streams: Vec<DataStream<R>>) -> SelectAll<Tagged<R>> {
    stream::select_all(
        streams
            .into_iter()
            .enumerate()
            .map(|(i, s)| s.map(move |item| (i, item)).boxed()),
    )
}

/// Merges child streams that each deliver one dataset, and emits one new
/// fan-out once every child has delivered.
struct Gather<S> {
    merged: SelectAll<Tagged<Dataset<S>>>,
    values: BTreeMap<usize, Dataset<S>>,
    expected: usize,
    scale: f64,
    bundle_interval: Duration,
    emitted: bool,
    finished: bool,
    operation: &'static str,
}

impl<S: DataBound> Gather<S> {
    async fn step(mut self) -> Option<(Result<PartialResult<Dataset<S>>>, Self)> {
        if self.finished {
            return None;
        }
        let Some((index, item)) = self.merged.next().await else {
            self.finished = true;
            if self.emitted {
                return None;
            }
            let err = anyhow!(
                "parallel {}: only {} of {} children produced a value",
                self.operation,
                self.values.len(),
                self.expected
            );
            return Some((Err(err), self));
        };
        let pr = match item {
            Ok(pr) => pr,
            Err(e) => {
                self.finished = true;
                let err = e.context(format!("parallel {}: child {index} failed", self.operation));
                return Some((Err(err), self));
            }
        };
        let (done, value) = pr.into_parts();
        let done = done * self.scale;
        let Some(value) = value else {
            return Some((Ok(PartialResult::progress(done)), self));
        };
        if self.values.insert(index, value).is_some() {
            self.finished = true;
            let err = anyhow!(
                "parallel {}: child {index} produced more than one value",
                self.operation
            );
            return Some((Err(err), self));
        }
        if self.values.len() < self.expected {
            return Some((Ok(PartialResult::progress(done)), self));
        }
        self.emitted = true;
        let children = std::mem::take(&mut self.values).into_values().collect();
        let combined = ParallelDataset::new(children).with_bundle_interval(self.bundle_interval);
        Some((Ok(PartialResult::new(done, Some(Dataset::Parallel(combined)))), self))
    }
}

impl<T: DataBound> ParallelDataset<T> {
    fn gather<S: DataBound>(
        &self,
        operation: &'static str,
        streams: Vec<DataStream<Dataset<S>>>,
    ) -> DataStream<Dataset<S>> {
        tracing::info!(children = streams.len(), "Invoked {operation}");
        if streams.is_empty() {
            return ds::just(PartialResult::complete(Dataset::Parallel(self.rebuild(Vec::new()))));
        }
        let state = Gather {
            merged: merge_tagged(streams),
            values: BTreeMap::new(),
            expected: self.children.len(),
            scale: self.scale(),
            bundle_interval: self.bundle_interval,
            emitted: false,
            finished: false,
            operation,
        };
        let merged = stream::unfold(state, Gather::step).boxed();
        ds::bundle(merged, self.bundle_interval, Arc::new(ProgressMonoid::new()))
    }

    pub(crate) fn map<S: DataBound>(&self, mapper: Arc<dyn Map<T, S>>) -> DataStream<Dataset<S>> {
        let streams = self
            .children
            .iter()
            .map(|c| c.map_shared(Arc::clone(&mapper)))
            .collect();
        self.gather("map", streams)
    }

    pub(crate) fn flat_map<S: DataBound>(
        &self,
        mapper: Arc<dyn Map<T, Vec<S>>>,
    ) -> DataStream<Dataset<S>> {
        let streams = self
            .children
            .iter()
            .map(|c| c.flat_map_shared(Arc::clone(&mapper)))
            .collect();
        self.gather("flatMap", streams)
    }

    pub(crate) fn zip<S>(&self, other: &Dataset<S>) -> DataStream<Dataset<Pair<T, S>>>
    where
        T: Clone,
        S: DataBound + Clone,
    {
        let Dataset::Parallel(other) = other else {
            return ds::failed(DatasetError::TypeMismatch {
                operation: "zip",
                expected: "parallel",
                found: other.kind(),
            });
        };
        if self.len() != other.len() {
            return ds::failed(DatasetError::SizeMismatch {
                left: self.len(),
                right: other.len(),
            });
        }
        let streams = self
            .children
            .iter()
            .zip(other.children.iter())
            .map(|(l, r)| ds::last_only(l.zip(r)))
            .collect();
        self.gather("zip", streams)
    }

    /// Child values pass straight through with rescaled progress; the
    /// consumer's reduction adds them up.
    pub(crate) fn sketch<R: ResultBound>(&self, sketch: Arc<dyn Sketch<T, R>>) -> DataStream<R> {
        tracing::info!(children = self.len(), sketch = %sketch.name(), "Invoked sketch");
        if self.is_empty() {
            return ds::just(PartialResult::complete(sketch.zero()));
        }
        let scale = self.scale();
        let streams = self
            .children
            .iter()
            .map(|c| c.sketch_shared(Arc::clone(&sketch)))
            .collect();
        let merged = merge_tagged(streams)
            .map(move |(index, item)| match item {
                Ok(pr) => Ok(pr.scaled(scale)),
                Err(e) => Err(e.context(format!("parallel sketch: child {index} failed"))),
            })
            .boxed();
        let monoid = PartialResultMonoid::new(SketchMonoid::new(sketch));
        ds::bundle(ds::stop_after_error(merged), self.bundle_interval, Arc::new(monoid))
    }

    /// Children are walked concurrently; their statuses come first, in child
    /// order, followed by this node's own.
    pub(crate) fn manage(&self, message: Arc<dyn ControlMessage>) -> DataStream<StatusList> {
        let children = Arc::clone(&self.children);
        let info = FanOutInfo {
            children: children.len(),
            bundle_interval: self.bundle_interval,
        };
        stream::once(async move {
            let monoid = PartialResultMonoid::new(StatusListMonoid);
            let walks = children
                .iter()
                .map(|c| ds::reduce(c.manage(Arc::clone(&message)), &monoid));
            let statuses = futures::future::try_join_all(walks).await?;
            let mut list = StatusListMonoid.reduce(statuses.into_iter().filter_map(PartialResult::into_value));
            if let Some(own) = run_hook(|| message.parallel_action(&info)) {
                list.0.push(own);
            }
            Ok(PartialResult::complete(list))
        })
        .boxed()
    }
}
