//! The client side of the remote protocol.

use super::protocol::{Frame, FrameKind, Request};
use super::service::RemoteService;
use crate::error::error_chain;
use crate::handle::OperationId;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};

/// A connection to one remote service.
///
/// Two channels with equal [`endpoint`](Channel::endpoint)s reach the same
/// service, so datasets behind them may be zipped together.
pub trait Channel: Send + Sync + 'static {
    fn endpoint(&self) -> &str;

    /// Send `request` and return the frames answering it.
    ///
    /// # Errors
    ///
    /// Fails if the request cannot be sent; failures after sending arrive as
    /// `OnError` frames or as the receiver closing.
    fn call(&self, request: Request) -> Result<UnboundedReceiver<Frame>>;

    /// Ask the service to stop the operation `id`. Unknown ids are ignored.
    fn cancel(&self, id: OperationId);
}

/// An in-process channel to a [`RemoteService`].
///
/// Requests and frames still pass through the wire codec, so anything that
/// works over this channel also works over a network transport.
pub struct LocalChannel {
    service: Arc<RemoteService>,
}

impl LocalChannel {
    pub fn new(service: Arc<RemoteService>) -> Arc<Self> {
        Arc::new(Self { service })
    }

    pub fn service(&self) -> &Arc<RemoteService> {
        &self.service
    }
}

impl Channel for LocalChannel {
    fn endpoint(&self) -> &str {
        self.service.endpoint()
    }

    fn call(&self, request: Request) -> Result<UnboundedReceiver<Frame>> {
        let request = Request::decode(&request.encode()?)?;
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<Frame>();
        let (tx, rx) = mpsc::unbounded_channel();
        self.service.runtime().spawn(async move {
            while let Some(frame) = raw_rx.recv().await {
                let id = frame.id;
                let frame = frame
                    .encode()
                    .and_then(|bytes| Frame::decode(&bytes))
                    .unwrap_or_else(|e| Frame::new(id, FrameKind::OnError(error_chain(&e))));
                if tx.send(frame).is_err() {
                    break;
                }
            }
        });
        self.service.dispatch(request, raw_tx);
        Ok(rx)
    }

    fn cancel(&self, id: OperationId) {
        self.service.unsubscribe(id);
    }
}
