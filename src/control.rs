//! Control messages: management actions broadcast over a dataset tree.
//!
//! A [`ControlMessage`] is not a computation over data. It walks the same tree
//! as a map or sketch, in post-order, and gives every node a chance to act on its
//! own bookkeeping (clear a cache, flip a flag, report what it holds). Each hook
//! may return a [`Status`]; statuses from the whole tree are gathered into one
//! [`StatusList`], children before their parent.
//!
//! Hooks see a small description of the node rather than the node itself, so
//! one message works for trees of any element type. Server-side hooks receive
//! the hosting service through [`ServiceControl`].

use crate::error::error_chain;
use crate::handle::Handle;
use crate::monoid::Monoid;
use crate::ops::{Command, Transmissible};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::any::{Any, type_name};
use std::borrow::Cow;
use std::sync::OnceLock;
use std::time::Duration;

/// Report produced by one node for one control message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub hostname: String,
    pub result: String,
    pub exception: Option<String>,
}

fn local_hostname() -> &'static str {
    static HOST: OnceLock<String> = OnceLock::new();
    HOST.get_or_init(|| {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string())
    })
}

impl Status {
    pub fn ok(result: impl Into<String>) -> Self {
        Self {
            hostname: local_hostname().to_string(),
            result: result.into(),
            exception: None,
        }
    }

    /// A status describing a hook that failed.
    pub fn failed(err: &anyhow::Error) -> Self {
        Self {
            hostname: local_hostname().to_string(),
            result: "Exception".to_string(),
            exception: Some(error_chain(err)),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.exception.is_some()
    }
}

/// Ordered statuses collected from a tree walk.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusList(pub Vec<Status>);

impl StatusList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(status: Status) -> Self {
        Self(vec![status])
    }

    pub fn from_optional(status: Option<Status>) -> Self {
        Self(status.into_iter().collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Status> {
        self.0.iter()
    }

    pub fn results(&self) -> Vec<&str> {
        self.0.iter().map(|s| s.result.as_str()).collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = &Status> {
        self.0.iter().filter(|s| s.is_failure())
    }

    /// Render as JSON for display.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.0)?)
    }
}

impl IntoIterator for StatusList {
    type Item = Status;
    type IntoIter = std::vec::IntoIter<Status>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Concatenation; left operand first.
#[derive(Clone, Copy, Debug, Default)]
pub struct StatusListMonoid;

impl Monoid<StatusList> for StatusListMonoid {
    fn zero(&self) -> StatusList {
        StatusList::new()
    }

    fn add(&self, mut left: StatusList, right: StatusList) -> StatusList {
        left.0.extend(right.0);
        left
    }
}

/// What a leaf exposes to a control message.
#[derive(Clone, Copy, Debug)]
pub struct LeafInfo<'a> {
    /// The leaf's value; hooks that know the element type may downcast it.
    pub data: &'a (dyn Any + Send + Sync),
    pub element_type: &'static str,
    pub separate_thread: bool,
}

/// What a fan-out node exposes to a control message.
#[derive(Clone, Copy, Debug)]
pub struct FanOutInfo {
    pub children: usize,
    pub bundle_interval: Duration,
}

/// What a remote proxy exposes to a control message.
#[derive(Clone, Copy, Debug)]
pub struct ProxyInfo<'a> {
    pub endpoint: &'a str,
    pub handle: Handle,
}

/// Service internals reachable from [`ControlMessage::server_action`].
pub trait ServiceControl: Send + Sync {
    fn endpoint(&self) -> &str;

    /// Drop every memoized result; returns how many were dropped.
    fn purge_memoized(&self) -> usize;

    /// Flip memoization on or off; returns the new setting.
    fn toggle_memoization(&self) -> bool;

    /// Remove every hosted dataset except the root; returns how many were removed.
    fn delete_all_datasets(&self) -> usize;

    fn dataset_count(&self) -> usize;
}

/// A management action with one optional hook per node kind.
///
/// Every hook defaults to doing nothing. Failures returned by a hook are turned
/// into a failed [`Status`]; they never abort the walk.
pub trait ControlMessage: Send + Sync + 'static {
    fn local_action(&self, _leaf: &LeafInfo<'_>) -> Result<Option<Status>> {
        Ok(None)
    }

    fn parallel_action(&self, _node: &FanOutInfo) -> Result<Option<Status>> {
        Ok(None)
    }

    /// Runs on the caller's side of a remote proxy, after the remote walk.
    fn remote_action(&self, _proxy: &ProxyInfo<'_>) -> Result<Option<Status>> {
        Ok(None)
    }

    /// Runs inside the remote service, after the hosted dataset was walked.
    fn server_action(&self, _service: &dyn ServiceControl) -> Result<Option<Status>> {
        Ok(None)
    }

    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed(type_name::<Self>())
    }

    /// Wire form. Only needed when the tree contains remote proxies.
    fn command(&self) -> Result<Command> {
        Err(crate::DatasetError::NotTransmissible(self.name().into_owned()).into())
    }
}

/// Run one hook, folding failures and panics into the returned status.
pub(crate) fn run_hook(hook: impl FnOnce() -> Result<Option<Status>>) -> Option<Status> {
    match crate::stream::guarded(hook) {
        Ok(status) => status,
        Err(err) => {
            tracing::warn!(error = %error_chain(&err), "control message hook failed");
            Some(Status::failed(&err))
        }
    }
}

/// Clears the memoization cache of every service in the tree.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct PurgeMemoization;

impl Transmissible for PurgeMemoization {}

impl ControlMessage for PurgeMemoization {
    fn server_action(&self, service: &dyn ServiceControl) -> Result<Option<Status>> {
        let purged = service.purge_memoized();
        Ok(Some(Status::ok(format!("purged {purged} memoized results"))))
    }

    fn command(&self) -> Result<Command> {
        Command::encode(self)
    }
}

/// Flips memoization on every service in the tree.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct ToggleMemoization;

impl Transmissible for ToggleMemoization {}

impl ControlMessage for ToggleMemoization {
    fn server_action(&self, service: &dyn ServiceControl) -> Result<Option<Status>> {
        let on = service.toggle_memoization();
        Ok(Some(Status::ok(format!(
            "memoization {}",
            if on { "enabled" } else { "disabled" }
        ))))
    }

    fn command(&self) -> Result<Command> {
        Command::encode(self)
    }
}

/// Drops every hosted dataset except each service's root.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct DeleteAllDatasets;

impl Transmissible for DeleteAllDatasets {}

impl ControlMessage for DeleteAllDatasets {
    fn server_action(&self, service: &dyn ServiceControl) -> Result<Option<Status>> {
        let removed = service.delete_all_datasets();
        Ok(Some(Status::ok(format!("deleted {removed} datasets"))))
    }

    fn command(&self) -> Result<Command> {
        Command::encode(self)
    }
}

/// Every leaf reports its element type; the list length is the leaf count.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct CountLeaves;

impl Transmissible for CountLeaves {}

impl ControlMessage for CountLeaves {
    fn local_action(&self, leaf: &LeafInfo<'_>) -> Result<Option<Status>> {
        Ok(Some(Status::ok(leaf.element_type)))
    }

    fn command(&self) -> Result<Command> {
        Command::encode(self)
    }
}
