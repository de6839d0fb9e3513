//! The dataset tree.
//!
//! A [`Dataset`] is one of three node variants:
//!
//! - [`LocalDataset`]: a leaf owning one in-process value.
//! - [`ParallelDataset`]: a fan-out over a fixed, ordered list of children.
//! - [`RemoteDataset`]: a proxy for a dataset hosted by a remote service.
//!
//! Every variant supports the same four operations (map, sketch, zip, manage,
//! plus flat map). Each returns a cold [`DataStream`] of partial results;
//! nothing runs until the stream is polled, and dropping the stream cancels the
//! operation throughout the tree. Nodes are immutable: operations that produce
//! a dataset build new nodes.
//!
//! ```
//! use ironfan::dataset::Dataset;
//! use ironfan::Sum;
//!
//! # fn main() -> anyhow::Result<()> {
//! let tree = Dataset::parallel(vec![
//!     Dataset::local(vec![2i64]),
//!     Dataset::local(vec![3i64]),
//!     Dataset::local(vec![5i64]),
//! ]);
//! assert_eq!(tree.blocking_sketch(Sum::<i64>::new())?, 10);
//! # Ok(())
//! # }
//! ```

mod local;
mod parallel;
mod remote;

pub use local::LocalDataset;
pub use parallel::ParallelDataset;
pub use remote::RemoteDataset;

use crate::config::RemoteConfig;
use crate::control::{ControlMessage, StatusList, StatusListMonoid};
use crate::handle::Handle;
use crate::ops::{DataBound, Map, ResultBound, Sketch, SketchMonoid};
use crate::pair::Pair;
use crate::partial::PartialResultMonoid;
use crate::remoting::channel::Channel;
use crate::stream::{self, DataStream};
use anyhow::Result;
use std::fmt;
use std::sync::Arc;

/// A node in a dataset tree, with element type `T`.
pub enum Dataset<T> {
    Local(LocalDataset<T>),
    Parallel(ParallelDataset<T>),
    Remote(RemoteDataset<T>),
}

impl<T> Clone for Dataset<T> {
    fn clone(&self) -> Self {
        match self {
            Dataset::Local(d) => Dataset::Local(d.clone()),
            Dataset::Parallel(d) => Dataset::Parallel(d.clone()),
            Dataset::Remote(d) => Dataset::Remote(d.clone()),
        }
    }
}

impl<T> fmt::Debug for Dataset<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dataset::Local(d) => f
                .debug_struct("Local")
                .field("element", &std::any::type_name::<T>())
                .field("separate_thread", &d.separate_thread())
                .finish(),
            Dataset::Parallel(d) => f.debug_list().entries(d.children()).finish(),
            Dataset::Remote(d) => write!(f, "Remote({} {})", d.endpoint(), d.handle()),
        }
    }
}

impl<T: DataBound> Dataset<T> {
    /// A leaf whose work runs on the shared worker pool.
    pub fn local(data: T) -> Self {
        Dataset::Local(LocalDataset::new(data))
    }

    /// A leaf that computes on the thread polling its streams.
    pub fn local_inline(data: T) -> Self {
        Dataset::Local(LocalDataset::inline(data))
    }

    pub fn parallel(children: Vec<Dataset<T>>) -> Self {
        Dataset::Parallel(ParallelDataset::new(children))
    }

    /// A proxy for the dataset `handle` hosted behind `channel`.
    pub fn remote(channel: Arc<dyn Channel>, handle: Handle) -> Self {
        Dataset::Remote(RemoteDataset::new(channel, handle, RemoteConfig::default()))
    }

    /// Short name of the node variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Dataset::Local(_) => "local",
            Dataset::Parallel(_) => "parallel",
            Dataset::Remote(_) => "remote",
        }
    }

    pub fn as_local(&self) -> Option<&LocalDataset<T>> {
        match self {
            Dataset::Local(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_parallel(&self) -> Option<&ParallelDataset<T>> {
        match self {
            Dataset::Parallel(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_remote(&self) -> Option<&RemoteDataset<T>> {
        match self {
            Dataset::Remote(d) => Some(d),
            _ => None,
        }
    }

    /// Apply `mapper` to every leaf, producing a dataset of the same shape.
    pub fn map<S, M>(&self, mapper: M) -> DataStream<Dataset<S>>
    where
        S: DataBound,
        M: Map<T, S>,
    {
        self.map_shared(Arc::new(mapper))
    }

    pub fn map_shared<S: DataBound>(&self, mapper: Arc<dyn Map<T, S>>) -> DataStream<Dataset<S>> {
        match self {
            Dataset::Local(d) => d.map(mapper),
            Dataset::Parallel(d) => d.map(mapper),
            Dataset::Remote(d) => d.map(mapper),
        }
    }

    /// Apply `mapper` to every leaf; each leaf becomes a fan-out with one new
    /// leaf per produced element.
    pub fn flat_map<S, M>(&self, mapper: M) -> DataStream<Dataset<S>>
    where
        S: DataBound,
        M: Map<T, Vec<S>>,
    {
        self.flat_map_shared(Arc::new(mapper))
    }

    pub fn flat_map_shared<S: DataBound>(
        &self,
        mapper: Arc<dyn Map<T, Vec<S>>>,
    ) -> DataStream<Dataset<S>> {
        match self {
            Dataset::Local(d) => d.flat_map(mapper),
            Dataset::Parallel(d) => d.flat_map(mapper),
            Dataset::Remote(d) => d.flat_map(mapper),
        }
    }

    /// Summarize the dataset. Reduce the stream with a
    /// [`PartialResultMonoid`] over the sketch to obtain the result.
    pub fn sketch<R, K>(&self, sketch: K) -> DataStream<R>
    where
        R: ResultBound,
        K: Sketch<T, R>,
    {
        self.sketch_shared(Arc::new(sketch))
    }

    pub fn sketch_shared<R: ResultBound>(&self, sketch: Arc<dyn Sketch<T, R>>) -> DataStream<R> {
        match self {
            Dataset::Local(d) => d.sketch(sketch),
            Dataset::Parallel(d) => d.sketch(sketch),
            Dataset::Remote(d) => d.sketch(sketch),
        }
    }

    /// Pair this dataset with another of the same shape, leaf by leaf.
    ///
    /// Both sides must be the same variant: two leaves, two fan-outs with the
    /// same number of children, or two proxies on the same endpoint.
    pub fn zip<S>(&self, other: &Dataset<S>) -> DataStream<Dataset<Pair<T, S>>>
    where
        T: Clone,
        S: DataBound + Clone,
    {
        match self {
            Dataset::Local(d) => d.zip(other),
            Dataset::Parallel(d) => d.zip(other),
            Dataset::Remote(d) => d.zip(other),
        }
    }

    /// Broadcast a control message over the tree in post-order.
    pub fn manage(&self, message: Arc<dyn ControlMessage>) -> DataStream<StatusList> {
        match self {
            Dataset::Local(d) => d.manage(message),
            Dataset::Parallel(d) => d.manage(message),
            Dataset::Remote(d) => d.manage(message),
        }
    }

    /// Run a map to completion and return the resulting dataset.
    ///
    /// # Errors
    ///
    /// Returns the first failure of the operation.
    pub async fn single_map<S, M>(&self, mapper: M) -> Result<Dataset<S>>
    where
        S: DataBound,
        M: Map<T, S>,
    {
        stream::sole_value(self.map(mapper)).await
    }

    /// Run a flat map to completion and return the resulting dataset.
    ///
    /// # Errors
    ///
    /// Returns the first failure of the operation.
    pub async fn single_flat_map<S, M>(&self, mapper: M) -> Result<Dataset<S>>
    where
        S: DataBound,
        M: Map<T, Vec<S>>,
    {
        stream::sole_value(self.flat_map(mapper)).await
    }

    /// Run a sketch to completion and return the accumulated value.
    ///
    /// # Errors
    ///
    /// Returns the first failure of the operation.
    pub async fn single_sketch<R, K>(&self, sketch: K) -> Result<R>
    where
        R: ResultBound,
        K: Sketch<T, R>,
    {
        let sketch: Arc<dyn Sketch<T, R>> = Arc::new(sketch);
        let monoid = PartialResultMonoid::new(SketchMonoid::new(Arc::clone(&sketch)));
        let total = stream::reduce(self.sketch_shared(sketch), &monoid).await?;
        total.into_value().ok_or_else(|| crate::DatasetError::MissingValue.into())
    }

    /// Run a zip to completion and return the paired dataset.
    ///
    /// # Errors
    ///
    /// Returns the first failure of the operation, including shape mismatches.
    pub async fn single_zip<S>(&self, other: &Dataset<S>) -> Result<Dataset<Pair<T, S>>>
    where
        T: Clone,
        S: DataBound + Clone,
    {
        stream::sole_value(self.zip(other)).await
    }

    /// Broadcast a control message and gather every status.
    ///
    /// # Errors
    ///
    /// Fails only on transport errors; hook failures are reported as statuses.
    pub async fn single_manage(&self, message: Arc<dyn ControlMessage>) -> Result<StatusList> {
        let monoid = PartialResultMonoid::new(StatusListMonoid);
        let total = stream::reduce(self.manage(message), &monoid).await?;
        Ok(total.into_value().unwrap_or_default())
    }

    /// Blocking form of [`single_map`](Self::single_map).
    ///
    /// Runs on a private runtime, so it fails when called from inside a tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns the first failure of the operation.
    pub fn blocking_map<S, M>(&self, mapper: M) -> Result<Dataset<S>>
    where
        S: DataBound,
        M: Map<T, S>,
    {
        stream::block_on(self.single_map(mapper))?
    }

    /// Blocking form of [`single_sketch`](Self::single_sketch).
    ///
    /// # Errors
    ///
    /// Returns the first failure of the operation.
    pub fn blocking_sketch<R, K>(&self, sketch: K) -> Result<R>
    where
        R: ResultBound,
        K: Sketch<T, R>,
    {
        stream::block_on(self.single_sketch(sketch))?
    }

    /// Blocking form of [`single_zip`](Self::single_zip).
    ///
    /// # Errors
    ///
    /// Returns the first failure of the operation.
    pub fn blocking_zip<S>(&self, other: &Dataset<S>) -> Result<Dataset<Pair<T, S>>>
    where
        T: Clone,
        S: DataBound + Clone,
    {
        stream::block_on(self.single_zip(other))?
    }
}
