//! Pre-built maps, sketches, control messages and trees for tests.

use crate::config::ServiceConfig;
use crate::control::{ControlMessage, FanOutInfo, LeafInfo, ProxyInfo, Status};
use crate::dataset::Dataset;
use crate::handle::Handle;
use crate::monoid::Monoid;
use crate::ops::{Command, Map, Sketch, Transmissible};
use crate::remoting::{LocalChannel, OperationRegistry, RemoteService};
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A fan-out with one leaf per value.
///
/// # Example
///
/// ```
/// use ironfan::testing::int_leaves;
///
/// let tree = int_leaves(&[1, 2, 3]);
/// assert_eq!(tree.as_parallel().map(|p| p.len()), Some(3));
/// ```
#[must_use]
pub fn int_leaves(values: &[i64]) -> Dataset<i64> {
    Dataset::parallel(values.iter().map(|v| Dataset::local(*v)).collect())
}

/// Like [`int_leaves`], with leaves that compute inline.
#[must_use]
pub fn inline_int_leaves(values: &[i64]) -> Dataset<i64> {
    Dataset::parallel(values.iter().map(|v| Dataset::local_inline(*v)).collect())
}

/// Adds a constant.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct IncrementMap {
    pub by: i64,
}

impl Transmissible for IncrementMap {}

impl Map<i64, i64> for IncrementMap {
    fn apply(&self, data: &i64) -> Result<i64> {
        Ok(data + self.by)
    }

    fn command(&self) -> Result<Command> {
        Command::encode(self)
    }
}

/// Multiplies by a constant.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ScaleMap {
    pub factor: i64,
}

impl Transmissible for ScaleMap {}

impl Map<i64, i64> for ScaleMap {
    fn apply(&self, data: &i64) -> Result<i64> {
        Ok(data * self.factor)
    }

    fn command(&self) -> Result<Command> {
        Command::encode(self)
    }
}

/// Flat map producing `times` copies of the value.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RepeatMap {
    pub times: usize,
}

impl Transmissible for RepeatMap {}

impl Map<i64, Vec<i64>> for RepeatMap {
    fn apply(&self, data: &i64) -> Result<Vec<i64>> {
        Ok(vec![*data; self.times])
    }

    fn command(&self) -> Result<Command> {
        Command::encode(self)
    }
}

/// Panics on one value; every other value passes through.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PanicOnMap {
    pub value: i64,
}

impl Transmissible for PanicOnMap {}

impl Map<i64, i64> for PanicOnMap {
    fn apply(&self, data: &i64) -> Result<i64> {
        if *data == self.value {
            panic!("refusing to map {data}");
        }
        Ok(*data)
    }

    fn command(&self) -> Result<Command> {
        Command::encode(self)
    }
}

/// `zero() = 0`, `add = +`, `create(x) = x`.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct SumSketch;

impl Transmissible for SumSketch {}

impl Monoid<i64> for SumSketch {
    fn zero(&self) -> i64 {
        0
    }

    fn add(&self, left: i64, right: i64) -> i64 {
        left + right
    }
}

impl Sketch<i64, i64> for SumSketch {
    fn create(&self, data: &i64) -> Result<i64> {
        Ok(*data)
    }

    fn command(&self) -> Result<Command> {
        Command::encode(self)
    }
}

/// Sums like [`SumSketch`] but fails on one value.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct FailOnSketch {
    pub value: i64,
}

impl Transmissible for FailOnSketch {}

impl Monoid<i64> for FailOnSketch {
    fn zero(&self) -> i64 {
        0
    }

    fn add(&self, left: i64, right: i64) -> i64 {
        left + right
    }
}

impl Sketch<i64, i64> for FailOnSketch {
    fn create(&self, data: &i64) -> Result<i64> {
        if *data == self.value {
            return Err(anyhow!("cannot sketch {data}"));
        }
        Ok(*data)
    }

    fn command(&self) -> Result<Command> {
        Command::encode(self)
    }
}

/// Sums like [`SumSketch`] after sleeping on every leaf.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SlowSketch {
    pub delay_ms: u64,
}

impl Transmissible for SlowSketch {}

impl Monoid<i64> for SlowSketch {
    fn zero(&self) -> i64 {
        0
    }

    fn add(&self, left: i64, right: i64) -> i64 {
        left + right
    }
}

impl Sketch<i64, i64> for SlowSketch {
    fn create(&self, data: &i64) -> Result<i64> {
        std::thread::sleep(Duration::from_millis(self.delay_ms));
        Ok(*data)
    }

    fn command(&self) -> Result<Command> {
        Command::encode(self)
    }
}

/// Appends one line per visited node to a shared log.
///
/// Leaves holding an `i64` log `leaf <value>`, fan-outs log
/// `parallel/<children>`, and proxies log `remote <handle>`.
#[derive(Clone, Default)]
pub struct LogMessage {
    pub log: Arc<Mutex<Vec<String>>>,
}

impl LogMessage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines logged so far.
    pub fn lines(&self) -> Vec<String> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    fn record(&self, line: String) -> Result<Option<Status>> {
        self.log
            .lock()
            .map_err(|_| anyhow!("log poisoned"))?
            .push(line.clone());
        Ok(Some(Status::ok(line)))
    }
}

impl ControlMessage for LogMessage {
    fn local_action(&self, leaf: &LeafInfo<'_>) -> Result<Option<Status>> {
        match leaf.data.downcast_ref::<i64>() {
            Some(v) => self.record(format!("leaf {v}")),
            None => self.record(format!("leaf of {}", leaf.element_type)),
        }
    }

    fn parallel_action(&self, node: &FanOutInfo) -> Result<Option<Status>> {
        self.record(format!("parallel/{}", node.children))
    }

    fn remote_action(&self, proxy: &ProxyInfo<'_>) -> Result<Option<Status>> {
        self.record(format!("remote {}", proxy.handle))
    }
}

/// A control message whose leaf hook always fails.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct FailingLeafMessage;

impl Transmissible for FailingLeafMessage {}

impl ControlMessage for FailingLeafMessage {
    fn local_action(&self, _leaf: &LeafInfo<'_>) -> Result<Option<Status>> {
        Err(anyhow!("leaf hook failed"))
    }

    fn command(&self) -> Result<Command> {
        Command::encode(self)
    }
}

/// Register every transmissible fixture in `registry`.
pub fn register_fixtures(registry: &OperationRegistry) {
    registry.register_map::<i64, i64, IncrementMap>();
    registry.register_map::<i64, i64, ScaleMap>();
    registry.register_map::<i64, i64, PanicOnMap>();
    registry.register_flat_map::<i64, i64, RepeatMap>();
    registry.register_sketch::<i64, i64, SumSketch>();
    registry.register_sketch::<i64, i64, FailOnSketch>();
    registry.register_sketch::<i64, i64, SlowSketch>();
    registry.register_zip::<i64, i64>();
    registry.register_control::<FailingLeafMessage>();
}

/// Host `root` in an in-process service with every fixture registered, and
/// return the service with a proxy for its root.
///
/// Must be called inside a tokio runtime.
///
/// # Errors
///
/// Fails outside a tokio runtime.
pub fn hosted(
    endpoint: &str,
    root: Dataset<i64>,
    config: ServiceConfig,
) -> Result<(Arc<RemoteService>, Dataset<i64>)> {
    let registry = OperationRegistry::new();
    register_fixtures(&registry);
    let service = RemoteService::new(endpoint, root, Arc::new(registry), config)?;
    let proxy = Dataset::remote(LocalChannel::new(Arc::clone(&service)), Handle::ROOT);
    Ok((service, proxy))
}
