//! Identifiers shared by the remote proxy and the remote service.
//!
//! A [`Handle`] names a dataset node hosted inside one service instance. Handles
//! are small, `Copy`, and only meaningful to the service that issued them; they
//! are not stable across restarts.
//!
//! An [`OperationId`] ties one client-issued operation to its subscription on the
//! service so it can be cancelled. Ids are random 128-bit values and must never be
//! reused.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Numeric name of a dataset inside a remote service.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle(u32);

impl Handle {
    /// The dataset installed when the service starts.
    pub const ROOT: Handle = Handle(1);

    pub fn new(v: u32) -> Self {
        Self(v)
    }

    /// Return the underlying numeric value.
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Correlation id of one in-flight operation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct OperationId(pub Uuid);

impl OperationId {
    /// Generates a new random v4 id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
