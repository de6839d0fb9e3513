use super::{Dataset, ParallelDataset};
use crate::control::{ControlMessage, LeafInfo, StatusList, run_hook};
use crate::error::DatasetError;
use crate::ops::{DataBound, Map, ResultBound, Sketch};
use crate::pair::Pair;
use crate::partial::PartialResult;
use crate::stream::{self as ds, DataStream};
use anyhow::Result;
use futures::stream::{self, StreamExt};
use futures::future;
use std::any::type_name;
use std::sync::Arc;

/// A leaf owning one value.
///
/// Every data operation emits exactly two elements: a zero-progress marker,
/// then the completion element with the result. When `separate_thread` is set
/// the computation runs on the shared rayon pool, so polling a leaf never blocks
/// the caller for the length of the computation.
pub struct LocalDataset<T> {
    data: Arc<T>,
    separate_thread: bool,
}

impl<T> Clone for LocalDataset<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            separate_thread: self.separate_thread,
        }
    }
}

impl<T> LocalDataset<T> {
    pub fn new(data: T) -> Self {
        Self::with_thread(data, true)
    }

    pub fn inline(data: T) -> Self {
        Self::with_thread(data, false)
    }

    pub fn with_thread(data: T, separate_thread: bool) -> Self {
        Self {
            data: Arc::new(data),
            separate_thread,
        }
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn separate_thread(&self) -> bool {
        self.separate_thread
    }
}

async fn execute<R, F>(separate_thread: bool, f: F) -> Result<R>
where
    R: Send + 'static,
    F: FnOnce() -> Result<R> + Send + 'static,
{
    if separate_thread {
        ds::run_on_pool(f).await
    } else {
        ds::guarded(f)
    }
}

/// Marker followed by the lazily computed completion element.
fn two_step<R: Send + 'static>(
    marker: PartialResult<R>,
    compute: impl Future<Output = Result<R>> + Send + 'static,
) -> DataStream<R> {
    stream::once(future::ready(Ok(marker)))
        .chain(stream::once(async move { compute.await.map(PartialResult::complete) }))
        .boxed()
}

impl<T: DataBound> LocalDataset<T> {
    pub(crate) fn map<S: DataBound>(&self, mapper: Arc<dyn Map<T, S>>) -> DataStream<Dataset<S>> {
        let data = Arc::clone(&self.data);
        let separate = self.separate_thread;
        tracing::debug!(mapper = %mapper.name(), "local map");
        two_step(PartialResult::progress(0.0), async move {
            let out = execute(separate, move || mapper.apply(&data)).await?;
            Ok(Dataset::Local(LocalDataset::with_thread(out, separate)))
        })
    }

    pub(crate) fn flat_map<S: DataBound>(
        &self,
        mapper: Arc<dyn Map<T, Vec<S>>>,
    ) -> DataStream<Dataset<S>> {
        let data = Arc::clone(&self.data);
        let separate = self.separate_thread;
        tracing::debug!(mapper = %mapper.name(), "local flat map");
        two_step(PartialResult::progress(0.0), async move {
            let out = execute(separate, move || mapper.apply(&data)).await?;
            let leaves = out
                .into_iter()
                .map(|s| Dataset::Local(LocalDataset::with_thread(s, separate)))
                .collect();
            Ok(Dataset::Parallel(ParallelDataset::new(leaves)))
        })
    }

    pub(crate) fn sketch<R: ResultBound>(&self, sketch: Arc<dyn Sketch<T, R>>) -> DataStream<R> {
        let data = Arc::clone(&self.data);
        let separate = self.separate_thread;
        tracing::debug!(sketch = %sketch.name(), "local sketch");
        let zero = PartialResult::new(0.0, Some(sketch.zero()));
        two_step(zero, execute(separate, move || sketch.create(&data)))
    }

    pub(crate) fn zip<S>(&self, other: &Dataset<S>) -> DataStream<Dataset<Pair<T, S>>>
    where
        T: Clone,
        S: DataBound + Clone,
    {
        let Dataset::Local(other) = other else {
            return ds::failed(DatasetError::TypeMismatch {
                operation: "zip",
                expected: "local",
                found: other.kind(),
            });
        };
        let pair = Pair::new(self.data().clone(), other.data().clone());
        ds::just(PartialResult::complete(Dataset::Local(
            LocalDataset::with_thread(pair, self.separate_thread),
        )))
    }

    pub(crate) fn manage(&self, message: Arc<dyn ControlMessage>) -> DataStream<StatusList> {
        let data = Arc::clone(&self.data);
        let separate_thread = self.separate_thread;
        stream::once(async move {
            let info = LeafInfo {
                data: &*data,
                element_type: type_name::<T>(),
                separate_thread,
            };
            let status = run_hook(|| message.local_action(&info));
            Ok(PartialResult::complete(StatusList::from_optional(status)))
        })
        .boxed()
    }
}
