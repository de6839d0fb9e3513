//! # Ironfan
//!
//! A **distributed dataset** abstraction for Rust. A dataset is a tree whose
//! leaves own data partitions in this process, whose inner nodes fan out over
//! children, and whose proxies stand for datasets hosted by another process.
//! Computations run on every leaf and report back as a stream of partial
//! results that converge on the final answer.
//!
//! ## Key Features
//!
//! - **Uniform operations** - map, flat map, sketch, zip and manage behave the
//!   same wherever the data lives
//! - **Streaming partial results** - every element carries a completion fraction
//!   and, possibly, a usable intermediate value
//! - **Monoid-based combination** - results from children arriving in any order
//!   are added with the sketch's own monoid
//! - **Cancellation** - dropping a stream stops the work, remote leaves included
//! - **Control messages** - post-order management actions over a whole tree
//! - **Remote services** - host trees behind an in-process channel or TCP
//!
//! ## Quick Start
//!
//! ```
//! use ironfan::*;
//! # use anyhow::Result;
//!
//! # fn main() -> Result<()> {
//! // Three leaves, each holding one partition
//! let tree = Dataset::parallel(vec![
//!     Dataset::local(vec![1i64, 2]),
//!     Dataset::local(vec![3i64]),
//!     Dataset::local(vec![4i64, 5, 6]),
//! ]);
//!
//! // Reduce every leaf and combine the results
//! assert_eq!(tree.blocking_sketch(Sum::<i64>::new())?, 21);
//! assert_eq!(tree.blocking_sketch(Count)?, 6);
//!
//! // Transform every leaf into a new tree of the same shape
//! let squared = tree.blocking_map(map_fn(|v: &Vec<i64>| {
//!     v.iter().map(|x| x * x).collect::<Vec<_>>()
//! }))?;
//! assert_eq!(squared.blocking_sketch(Max::<i64>::new())?, Some(36));
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Datasets
//!
//! A [`Dataset<T>`] is a [`Local`](Dataset::Local) leaf, a
//! [`Parallel`](Dataset::Parallel) fan-out or a [`Remote`](Dataset::Remote)
//! proxy. Datasets are immutable and cheap to clone; operations that produce a
//! dataset build new nodes.
//!
//! ### Partial results
//!
//! Every operation returns a [`DataStream`]: a cold stream of
//! [`PartialResult`]s. Nothing runs until the stream is polled. Adding the
//! elements with a [`PartialResultMonoid`] yields the final value; the
//! `single_*` and `blocking_*` helpers do that for you.
//!
//! ### Maps and sketches
//!
//! A [`Map`] turns one leaf value into another; a [`Sketch`] reduces a leaf to a
//! monoid value. Closures work locally through [`map_fn`]. To run on remote
//! datasets an operation must be [`Transmissible`](ops::Transmissible) and
//! registered in the service's [`OperationRegistry`](remoting::OperationRegistry).
//!
//! ### Control messages
//!
//! A [`ControlMessage`] visits every node in post-order and collects one
//! [`Status`] per node into a [`StatusList`].
//!
//! ## Remote datasets
//!
//! ```
//! use ironfan::*;
//! use ironfan::remoting::{LocalChannel, OperationRegistry, RemoteService};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let registry = OperationRegistry::new();
//! registry.register_sketch::<Vec<i64>, i64, Sum<i64>>();
//!
//! let root = Dataset::parallel(vec![Dataset::local(vec![1i64, 2]), Dataset::local(vec![3i64])]);
//! let service = RemoteService::new("local://demo", root, Arc::new(registry), Default::default())?;
//!
//! let proxy: Dataset<Vec<i64>> = Dataset::remote(LocalChannel::new(service), Handle::ROOT);
//! assert_eq!(proxy.single_sketch(Sum::<i64>::new()).await?, 6);
//! # Ok(())
//! # }
//! ```

pub mod combiners;
pub mod config;
pub mod control;
pub mod dataset;
pub mod error;
pub mod handle;
pub mod monoid;
pub mod ops;
pub mod pair;
pub mod partial;
pub mod remoting;
pub mod stream;
pub mod testing;

// General re-exports
pub use combiners::{Count, Max, Min, Sum};
pub use control::{ControlMessage, Status, StatusList, StatusListMonoid};
pub use dataset::{Dataset, LocalDataset, ParallelDataset, RemoteDataset};
pub use error::DatasetError;
pub use handle::{Handle, OperationId};
pub use monoid::Monoid;
pub use ops::{Map, Sketch, map_fn};
pub use pair::Pair;
pub use partial::{PartialResult, PartialResultMonoid};
pub use stream::DataStream;
