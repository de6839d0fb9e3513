//! Running dataset operations in another process.
//!
//! - [`protocol`]: the request and frame messages.
//! - [`registry`]: name-keyed handlers that turn wire commands back into maps,
//!   sketches and control messages.
//! - [`service`]: the hosting side, with its handle and subscription tables.
//! - [`channel`]: the client-side [`Channel`] trait and an in-process channel.
//! - [`tcp`]: a TCP transport.

pub mod channel;
pub mod memo;
pub mod protocol;
pub mod registry;
pub mod service;
#[cfg(feature = "tcp")]
pub mod tcp;

pub use channel::{Channel, LocalChannel};
pub use protocol::{Frame, FrameKind, Payload, Request};
pub use registry::{HostedDataset, OperationRegistry};
pub use service::RemoteService;
#[cfg(feature = "tcp")]
pub use tcp::{TcpChannel, TcpServer, serve};
