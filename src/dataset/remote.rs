use super::Dataset;
use crate::config::RemoteConfig;
use crate::control::{ControlMessage, ProxyInfo, StatusList, run_hook};
use crate::error::DatasetError;
use crate::handle::{Handle, OperationId};
use crate::ops::{DataBound, Map, ResultBound, Sketch};
use crate::pair::Pair;
use crate::partial::PartialResult;
use crate::remoting::channel::Channel;
use crate::remoting::protocol::{Frame, FrameKind, Payload, Request};
use crate::remoting::registry::zip_key;
use crate::stream::{self as ds, DataStream};
use anyhow::Result;
use futures::stream::{self, StreamExt};
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

/// A proxy for a dataset hosted by a remote service.
///
/// Every operation becomes one [`Request`] with a fresh [`OperationId`]. The
/// request is only sent once the returned stream is first polled. Dropping the
/// stream before it completes sends an unsubscribe for that id.
pub struct RemoteDataset<T> {
    channel: Arc<dyn Channel>,
    handle: Handle,
    config: RemoteConfig,
    _t: PhantomData<fn() -> T>,
}

impl<T> Clone for RemoteDataset<T> {
    fn clone(&self) -> Self {
        Self {
            channel: Arc::clone(&self.channel),
            handle: self.handle,
            config: self.config.clone(),
            _t: PhantomData,
        }
    }
}

impl<T> RemoteDataset<T> {
    pub fn new(channel: Arc<dyn Channel>, handle: Handle, config: RemoteConfig) -> Self {
        Self {
            channel,
            handle,
            config,
            _t: PhantomData,
        }
    }

    pub fn with_config(mut self, config: RemoteConfig) -> Self {
        self.config = config;
        self
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn endpoint(&self) -> &str {
        self.channel.endpoint()
    }

    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    /// A proxy for another dataset on the same service.
    fn sibling<S>(&self, handle: Handle) -> RemoteDataset<S> {
        RemoteDataset::new(Arc::clone(&self.channel), handle, self.config.clone())
    }
}

/// Sends an unsubscribe for `id` when dropped while armed.
struct CancelOnDrop {
    channel: Arc<dyn Channel>,
    id: OperationId,
    armed: bool,
}

impl CancelOnDrop {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!(id = %self.id, "unsubscribing remote operation");
            self.channel.cancel(self.id);
        }
    }
}

enum Phase {
    Idle(Request),
    Streaming {
        frames: UnboundedReceiver<Frame>,
        guard: CancelOnDrop,
        deadline: Option<Instant>,
    },
    Finished,
}

struct Call<R, F> {
    channel: Arc<dyn Channel>,
    config: RemoteConfig,
    decode: F,
    phase: Phase,
    _r: PhantomData<fn() -> R>,
}

impl<R, F> Call<R, F>
where
    F: Fn(Payload) -> Result<R> + Send + 'static,
{
    async fn step(mut self) -> Option<(Result<PartialResult<R>>, Self)> {
        loop {
            match std::mem::replace(&mut self.phase, Phase::Finished) {
                Phase::Finished => return None,
                Phase::Idle(request) => {
                    let id = request.id();
                    tracing::debug!(%id, kind = request.kind(), endpoint = self.channel.endpoint(), "sending remote request");
                    match self.channel.call(request) {
                        Ok(frames) => {
                            self.phase = Phase::Streaming {
                                frames,
                                guard: CancelOnDrop {
                                    channel: Arc::clone(&self.channel),
                                    id,
                                    armed: true,
                                },
                                deadline: self.config.timeout.map(|t| Instant::now() + t),
                            };
                        }
                        Err(e) => return Some((Err(e), self)),
                    }
                }
                Phase::Streaming {
                    mut frames,
                    mut guard,
                    deadline,
                } => {
                    let next = match deadline {
                        Some(deadline) => match tokio::time::timeout_at(deadline, frames.recv()).await {
                            Ok(next) => next,
                            Err(_) => {
                                let err = DatasetError::Transport(format!(
                                    "operation {} timed out",
                                    guard.id
                                ));
                                return Some((Err(err.into()), self));
                            }
                        },
                        None => frames.recv().await,
                    };
                    let Some(frame) = next else {
                        let err = DatasetError::Transport(format!(
                            "channel to {} closed before operation {} completed",
                            self.channel.endpoint(),
                            guard.id
                        ));
                        return Some((Err(err.into()), self));
                    };
                    match frame.kind {
                        FrameKind::OnNext { done, payload } => {
                            let value = match payload.map(&self.decode).transpose() {
                                Ok(value) => value,
                                Err(e) => return Some((Err(e), self)),
                            };
                            self.phase = Phase::Streaming {
                                frames,
                                guard,
                                deadline,
                            };
                            return Some((Ok(PartialResult::new(done.max(0.0), value)), self));
                        }
                        FrameKind::OnCompletion => {
                            guard.disarm();
                            return None;
                        }
                        FrameKind::OnError(message) => {
                            guard.disarm();
                            return Some((Err(DatasetError::Remote(message).into()), self));
                        }
                        FrameKind::Ack => {
                            self.phase = Phase::Streaming {
                                frames,
                                guard,
                                deadline,
                            };
                        }
                    }
                }
            }
        }
    }
}

fn unexpected(payload: &Payload) -> anyhow::Error {
    let what = match payload {
        Payload::Handle(_) => "a dataset handle",
        Payload::Value(_) => "a sketch value",
        Payload::Statuses(_) => "a status list",
    };
    DatasetError::Transport(format!("unexpected payload: {what}")).into()
}

impl<T: DataBound> RemoteDataset<T> {
    fn call<R, F>(&self, request: Request, decode: F) -> DataStream<R>
    where
        R: Send + 'static,
        F: Fn(Payload) -> Result<R> + Send + 'static,
    {
        let call = Call {
            channel: Arc::clone(&self.channel),
            config: self.config.clone(),
            decode,
            phase: Phase::Idle(request),
            _r: PhantomData,
        };
        stream::unfold(call, Call::step).boxed()
    }

    fn dataset_call<S: DataBound>(&self, request: Request) -> DataStream<Dataset<S>> {
        let proxy = self.clone();
        self.call(request, move |payload| match payload {
            Payload::Handle(h) => Ok(Dataset::Remote(proxy.sibling(h))),
            other => Err(unexpected(&other)),
        })
    }

    pub(crate) fn map<S: DataBound>(&self, mapper: Arc<dyn Map<T, S>>) -> DataStream<Dataset<S>> {
        let op = match mapper.command() {
            Ok(op) => op,
            Err(e) => return ds::failed(e),
        };
        self.dataset_call(Request::Map {
            id: OperationId::new(),
            handle: self.handle,
            op,
        })
    }

    pub(crate) fn flat_map<S: DataBound>(
        &self,
        mapper: Arc<dyn Map<T, Vec<S>>>,
    ) -> DataStream<Dataset<S>> {
        let op = match mapper.command() {
            Ok(op) => op,
            Err(e) => return ds::failed(e),
        };
        self.dataset_call(Request::FlatMap {
            id: OperationId::new(),
            handle: self.handle,
            op,
        })
    }

    pub(crate) fn sketch<R: ResultBound>(&self, sketch: Arc<dyn Sketch<T, R>>) -> DataStream<R> {
        let op = match sketch.command() {
            Ok(op) => op,
            Err(e) => return ds::failed(e),
        };
        let request = Request::Sketch {
            id: OperationId::new(),
            handle: self.handle,
            op,
        };
        self.call(request, |payload| match payload {
            Payload::Value(bytes) => postcard::from_bytes(&bytes).map_err(|e| {
                DatasetError::Transport(format!("cannot decode sketch value: {e}")).into()
            }),
            other => Err(unexpected(&other)),
        })
    }

    /// Both proxies must reach the same endpoint; this is checked before any
    /// request is sent.
    pub(crate) fn zip<S>(&self, other: &Dataset<S>) -> DataStream<Dataset<Pair<T, S>>>
    where
        S: DataBound,
    {
        let Dataset::Remote(other) = other else {
            return ds::failed(DatasetError::TypeMismatch {
                operation: "zip",
                expected: "remote",
                found: other.kind(),
            });
        };
        if self.endpoint() != other.endpoint() {
            return ds::failed(DatasetError::EndpointMismatch {
                left: self.endpoint().to_string(),
                right: other.endpoint().to_string(),
            });
        }
        self.dataset_call(Request::Zip {
            id: OperationId::new(),
            handle: self.handle,
            other: other.handle,
            key: zip_key::<T, S>(),
        })
    }

    /// The remote walk runs first; this proxy's own hook runs after it.
    pub(crate) fn manage(&self, message: Arc<dyn ControlMessage>) -> DataStream<StatusList> {
        let command = match message.command() {
            Ok(command) => command,
            Err(e) => return ds::failed(e),
        };
        let remote = self.call(
            Request::Manage {
                id: OperationId::new(),
                handle: self.handle,
                message: command,
            },
            |payload| match payload {
                Payload::Statuses(list) => Ok(list),
                other => Err(unexpected(&other)),
            },
        );
        let channel = Arc::clone(&self.channel);
        let handle = self.handle;
        let own = stream::once(async move {
            let info = ProxyInfo {
                endpoint: channel.endpoint(),
                handle,
            };
            let status = run_hook(|| message.remote_action(&info));
            Ok(PartialResult::new(0.0, Some(StatusList::from_optional(status))))
        });
        ds::stop_after_error(remote.chain(own).boxed())
    }
}
