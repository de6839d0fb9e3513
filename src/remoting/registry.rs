//! Name-keyed handlers that resolve wire commands on the service side.
//!
//! A remote service cannot receive closures. Instead each transmissible map,
//! sketch and control message is registered here under its
//! [`op_name`](crate::ops::Transmissible::op_name); the handler decodes the
//! parameters and runs the operation against the hosted dataset, erasing its
//! types on the way out.

use crate::control::{
    ControlMessage, CountLeaves, DeleteAllDatasets, PurgeMemoization, StatusList,
    ToggleMemoization,
};
use crate::dataset::Dataset;
use crate::error::DatasetError;
use crate::monoid::Monoid;
use crate::ops::{Command, DataBound, Map, ResultBound, Sketch, SketchMonoid, Transmissible};
use crate::pair::Pair;
use crate::partial::PartialResult;
use crate::stream::DataStream;
use anyhow::{Context, Result};
use dashmap::DashMap;
use futures::StreamExt;
use std::any::{Any, type_name};
use std::sync::{Arc, Mutex};

/// A dataset hosted by a service, with its element type erased.
pub trait HostedDataset: Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;

    fn element_type(&self) -> &'static str;

    fn manage(&self, message: Arc<dyn ControlMessage>) -> DataStream<StatusList>;

    fn describe(&self) -> String;
}

impl<T: DataBound> HostedDataset for Dataset<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn element_type(&self) -> &'static str {
        type_name::<T>()
    }

    fn manage(&self, message: Arc<dyn ControlMessage>) -> DataStream<StatusList> {
        Dataset::manage(self, message)
    }

    fn describe(&self) -> String {
        format!("{self:?}")
    }
}

pub type Hosted = Arc<dyn HostedDataset>;

/// Key under which the zip of `Dataset<T>` with `Dataset<S>` is registered.
pub fn zip_key<T, S>() -> String {
    format!("{}|{}", type_name::<T>(), type_name::<S>())
}

fn downcast<T: DataBound>(hosted: &Hosted, operation: &'static str) -> Result<Dataset<T>> {
    hosted
        .as_any()
        .downcast_ref::<Dataset<T>>()
        .cloned()
        .ok_or_else(|| {
            DatasetError::TypeMismatch {
                operation,
                expected: type_name::<T>(),
                found: hosted.element_type(),
            }
            .into()
        })
}

fn erase<S: DataBound>(stream: DataStream<Dataset<S>>) -> DataStream<Hosted> {
    stream
        .map(|item| item.map(|pr| pr.map_value(|d| Arc::new(d) as Hosted)))
        .boxed()
}

/// Output of a sketch handler.
pub struct SketchRun {
    /// Partial values, each encoded with postcard.
    pub stream: DataStream<Vec<u8>>,
    /// Encoded sum of every value the stream has yielded so far.
    pub total: Arc<dyn Fn() -> Result<Vec<u8>> + Send + Sync>,
}

type DatasetHandler = Arc<dyn Fn(&Hosted, &Command) -> Result<DataStream<Hosted>> + Send + Sync>;
type SketchHandler = Arc<dyn Fn(&Hosted, &Command) -> Result<SketchRun> + Send + Sync>;
type ZipHandler = Arc<dyn Fn(&Hosted, &Hosted) -> Result<DataStream<Hosted>> + Send + Sync>;
type ControlDecoder = Arc<dyn Fn(&Command) -> Result<Arc<dyn ControlMessage>> + Send + Sync>;

/// Handlers available to one remote service.
///
/// Registration is keyed by operation name only; registering the same name
/// twice replaces the earlier handler. The built-in control messages are
/// always present.
pub struct OperationRegistry {
    maps: DashMap<String, DatasetHandler>,
    flat_maps: DashMap<String, DatasetHandler>,
    sketches: DashMap<String, SketchHandler>,
    zips: DashMap<String, ZipHandler>,
    controls: DashMap<String, ControlDecoder>,
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationRegistry {
    pub fn new() -> Self {
        let registry = Self {
            maps: DashMap::new(),
            flat_maps: DashMap::new(),
            sketches: DashMap::new(),
            zips: DashMap::new(),
            controls: DashMap::new(),
        };
        registry.register_control::<PurgeMemoization>();
        registry.register_control::<ToggleMemoization>();
        registry.register_control::<DeleteAllDatasets>();
        registry.register_control::<CountLeaves>();
        registry
    }

    pub fn register_map<T, S, M>(&self)
    where
        T: DataBound,
        S: DataBound,
        M: Map<T, S> + Transmissible,
    {
        let name = M::op_name().into_owned();
        tracing::info!("Registered map: {name}");
        let handler: DatasetHandler = Arc::new(|hosted: &Hosted, command: &Command| {
            let dataset = downcast::<T>(hosted, "map")?;
            let mapper: M = command.decode()?;
            Ok(erase(dataset.map(mapper)))
        });
        self.maps.insert(name, handler);
    }

    pub fn register_flat_map<T, S, M>(&self)
    where
        T: DataBound,
        S: DataBound,
        M: Map<T, Vec<S>> + Transmissible,
    {
        let name = M::op_name().into_owned();
        tracing::info!("Registered flat map: {name}");
        let handler: DatasetHandler = Arc::new(|hosted: &Hosted, command: &Command| {
            let dataset = downcast::<T>(hosted, "flatMap")?;
            let mapper: M = command.decode()?;
            Ok(erase(dataset.flat_map(mapper)))
        });
        self.flat_maps.insert(name, handler);
    }

    pub fn register_sketch<T, R, K>(&self)
    where
        T: DataBound,
        R: ResultBound,
        K: Sketch<T, R> + Transmissible,
    {
        let name = K::op_name().into_owned();
        tracing::info!("Registered sketch: {name}");
        let handler: SketchHandler = Arc::new(|hosted: &Hosted, command: &Command| {
            let dataset = downcast::<T>(hosted, "sketch")?;
            let sketch: Arc<dyn Sketch<T, R>> = Arc::new(command.decode::<K>()?);
            let monoid = Arc::new(SketchMonoid::new(Arc::clone(&sketch)));
            let running = Arc::new(Mutex::new(monoid.zero()));

            let acc = Arc::clone(&running);
            let stream = dataset
                .sketch_shared(sketch)
                .map(move |item| {
                    let pr = item?;
                    if let Some(value) = pr.value() {
                        if let Ok(mut total) = acc.lock() {
                            let current = std::mem::replace(&mut *total, monoid.zero());
                            *total = monoid.add(current, value.clone());
                        }
                    }
                    encode_partial(pr)
                })
                .boxed();

            let total = Arc::new(move || -> Result<Vec<u8>> {
                let value = running
                    .lock()
                    .map_err(|_| anyhow::anyhow!("sketch accumulator poisoned"))?;
                postcard::to_allocvec(&*value).context("failed to encode sketch total")
            });
            Ok(SketchRun { stream, total })
        });
        self.sketches.insert(name, handler);
    }

    pub fn register_zip<T, S>(&self)
    where
        T: DataBound + Clone,
        S: DataBound + Clone,
    {
        let key = zip_key::<T, S>();
        tracing::info!("Registered zip: {key}");
        let handler: ZipHandler = Arc::new(|left: &Hosted, right: &Hosted| {
            let left = downcast::<T>(left, "zip")?;
            let right = downcast::<S>(right, "zip")?;
            Ok(erase::<Pair<T, S>>(left.zip(&right)))
        });
        self.zips.insert(key, handler);
    }

    pub fn register_control<C>(&self)
    where
        C: ControlMessage + Transmissible,
    {
        let name = C::op_name().into_owned();
        tracing::debug!("Registered control message: {name}");
        let decoder: ControlDecoder = Arc::new(|command: &Command| {
            let message: C = command.decode()?;
            Ok(Arc::new(message) as Arc<dyn ControlMessage>)
        });
        self.controls.insert(name, decoder);
    }

    pub(crate) fn map(&self, hosted: &Hosted, command: &Command) -> Result<DataStream<Hosted>> {
        let handler = lookup(&self.maps, &command.name)?;
        handler(hosted, command)
    }

    pub(crate) fn flat_map(&self, hosted: &Hosted, command: &Command) -> Result<DataStream<Hosted>> {
        let handler = lookup(&self.flat_maps, &command.name)?;
        handler(hosted, command)
    }

    pub(crate) fn sketch(&self, hosted: &Hosted, command: &Command) -> Result<SketchRun> {
        let handler = lookup(&self.sketches, &command.name)?;
        handler(hosted, command)
    }

    pub(crate) fn zip(&self, key: &str, left: &Hosted, right: &Hosted) -> Result<DataStream<Hosted>> {
        let handler = lookup(&self.zips, key)?;
        handler(left, right)
    }

    pub(crate) fn control(&self, command: &Command) -> Result<Arc<dyn ControlMessage>> {
        let decoder = lookup(&self.controls, &command.name)?;
        decoder(command)
    }
}

fn lookup<H: Clone>(table: &DashMap<String, H>, name: &str) -> Result<H> {
    table
        .get(name)
        .map(|h| h.value().clone())
        .ok_or_else(|| DatasetError::UnknownOperation(name.to_string()).into())
}

fn encode_partial<R: ResultBound>(pr: PartialResult<R>) -> Result<PartialResult<Vec<u8>>> {
    let (done, value) = pr.into_parts();
    let value = value
        .map(|v| postcard::to_allocvec(&v))
        .transpose()
        .context("failed to encode sketch value")?;
    Ok(PartialResult::new(done, value))
}
