//! Error kinds raised by dataset operations.
//!
//! Every stream in this crate yields `anyhow::Result` items. When a failure has a
//! well-defined kind it is raised as a [`DatasetError`] inside the `anyhow::Error`,
//! so callers can tell "the dataset was empty" apart from "the connection dropped":
//!
//! ```
//! use ironfan::DatasetError;
//!
//! let err: anyhow::Error = DatasetError::SizeMismatch { left: 3, right: 4 }.into();
//! assert!(matches!(
//!     err.downcast_ref::<DatasetError>(),
//!     Some(DatasetError::SizeMismatch { .. })
//! ));
//! ```

use crate::handle::Handle;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DatasetError {
    /// An operation was invoked across incompatible node variants.
    #[error("type mismatch in {operation}: expected {expected}, found {found}")]
    TypeMismatch {
        operation: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    /// Two fan-out nodes with a different number of children were zipped.
    #[error("different sizes for parallel datasets: {left} vs. {right}")]
    SizeMismatch { left: usize, right: usize },

    /// Two remote proxies that talk to different services were zipped.
    #[error("zip is invalid across different endpoints: left {left}, right {right}")]
    EndpointMismatch { left: String, right: String },

    /// A map, sketch or control message was sent to a remote node but cannot be encoded.
    #[error("operation `{0}` cannot be sent to a remote dataset")]
    NotTransmissible(String),

    #[error("dataset handle {handle} does not exist on {endpoint}")]
    UnknownHandle { handle: Handle, endpoint: String },

    #[error("no operation registered under `{0}`")]
    UnknownOperation(String),

    /// Timeout, disconnect or codec failure on a channel.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The remote service reported a failure for this operation.
    #[error("remote failure: {0}")]
    Remote(String),

    /// User code in a map or sketch failed or panicked.
    #[error("computation failed: {0}")]
    Computation(String),

    /// The operation was cancelled before it could complete.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// The stream ended without producing the value the caller asked for.
    #[error("stream completed without a value")]
    MissingValue,
}

impl DatasetError {
    /// Build a [`DatasetError::Computation`] from a panic payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with a non-string payload".to_string()
        };
        DatasetError::Computation(message)
    }
}

/// Render an error with its full cause chain on one line.
///
/// Used when an error has to cross the wire as text.
pub fn error_chain(err: &anyhow::Error) -> String {
    format!("{err:#}")
}
