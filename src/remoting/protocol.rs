//! Wire messages between a remote proxy and a remote service.
//!
//! The client sends [`Request`]s; the service answers with a stream of
//! [`Frame`]s tagged with the request's [`OperationId`]. Both are encoded with
//! postcard. A stream of frames for one id is zero or more `OnNext`, ended by
//! exactly one `OnCompletion` or `OnError`. `Ack` answers `Unsubscribe`.

use crate::control::StatusList;
use crate::error::DatasetError;
use crate::handle::{Handle, OperationId};
use crate::ops::Command;
use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Request {
    Map {
        id: OperationId,
        handle: Handle,
        op: Command,
    },
    FlatMap {
        id: OperationId,
        handle: Handle,
        op: Command,
    },
    Sketch {
        id: OperationId,
        handle: Handle,
        op: Command,
    },
    /// Zip `handle` with `other`; `key` names the element type pair.
    Zip {
        id: OperationId,
        handle: Handle,
        other: Handle,
        key: String,
    },
    Manage {
        id: OperationId,
        handle: Handle,
        message: Command,
    },
    Unsubscribe {
        id: OperationId,
    },
}

/// The request with its correlation id removed; identical operations on the
/// same dataset have identical fingerprints.
#[derive(Serialize)]
enum Fingerprint<'a> {
    Map(Handle, &'a Command),
    FlatMap(Handle, &'a Command),
    Sketch(Handle, &'a Command),
    Zip(Handle, Handle, &'a str),
}

impl Request {
    pub fn id(&self) -> OperationId {
        match self {
            Request::Map { id, .. }
            | Request::FlatMap { id, .. }
            | Request::Sketch { id, .. }
            | Request::Zip { id, .. }
            | Request::Manage { id, .. }
            | Request::Unsubscribe { id } => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Request::Map { .. } => "map",
            Request::FlatMap { .. } => "flatMap",
            Request::Sketch { .. } => "sketch",
            Request::Zip { .. } => "zip",
            Request::Manage { .. } => "manage",
            Request::Unsubscribe { .. } => "unsubscribe",
        }
    }

    /// Handles of the datasets the request reads.
    pub fn inputs(&self) -> Vec<Handle> {
        match self {
            Request::Map { handle, .. }
            | Request::FlatMap { handle, .. }
            | Request::Sketch { handle, .. }
            | Request::Manage { handle, .. } => vec![*handle],
            Request::Zip { handle, other, .. } => vec![*handle, *other],
            Request::Unsubscribe { .. } => Vec::new(),
        }
    }

    /// Bytes identifying a memoizable request, or `None` when its result must
    /// never be cached.
    pub fn memo_fingerprint(&self) -> Option<Vec<u8>> {
        let fp = match self {
            Request::Map { handle, op, .. } => Fingerprint::Map(*handle, op),
            Request::FlatMap { handle, op, .. } => Fingerprint::FlatMap(*handle, op),
            Request::Sketch { handle, op, .. } => Fingerprint::Sketch(*handle, op),
            Request::Zip {
                handle, other, key, ..
            } => Fingerprint::Zip(*handle, *other, key),
            Request::Manage { .. } | Request::Unsubscribe { .. } => return None,
        };
        postcard::to_allocvec(&fp).ok()
    }

    /// # Errors
    ///
    /// Returns a transport error if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        postcard::to_allocvec(self)
            .map_err(|e| DatasetError::Transport(format!("cannot encode request: {e}")).into())
    }

    /// # Errors
    ///
    /// Returns a transport error if the bytes are not a valid request.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        postcard::from_bytes(bytes)
            .map_err(|e| DatasetError::Transport(format!("cannot decode request: {e}")).into())
    }
}

/// Value carried by an `OnNext` frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// A dataset produced by map, flat map or zip, now hosted under this handle.
    Handle(Handle),
    /// A postcard-encoded sketch value.
    Value(Vec<u8>),
    Statuses(StatusList),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FrameKind {
    OnNext { done: f64, payload: Option<Payload> },
    OnCompletion,
    OnError(String),
    Ack,
}

impl FrameKind {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FrameKind::OnCompletion | FrameKind::OnError(_))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub id: OperationId,
    pub kind: FrameKind,
}

impl Frame {
    pub fn new(id: OperationId, kind: FrameKind) -> Self {
        Self { id, kind }
    }

    /// # Errors
    ///
    /// Returns a transport error if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        postcard::to_allocvec(self)
            .map_err(|e| DatasetError::Transport(format!("cannot encode frame: {e}")).into())
    }

    /// # Errors
    ///
    /// Returns a transport error if the bytes are not a valid frame.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        postcard::from_bytes(bytes)
            .map_err(|e| DatasetError::Transport(format!("cannot decode frame: {e}")).into())
    }
}
