//! The server side of the remote protocol.
//!
//! A [`RemoteService`] hosts dataset trees under small integer [`Handle`]s
//! (the root at [`Handle::ROOT`]) and runs incoming [`Request`]s against them.
//! Every running operation is registered under its [`OperationId`] so that an
//! `Unsubscribe` can abort it. Datasets produced by map, flat map and zip are
//! installed under fresh handles so later requests can refer to them.
//!
//! A failing request never takes the service down: any error is reported to the
//! caller as an `OnError` frame and logged.

use super::memo::{self, MemoKey, MemoTable};
use super::protocol::{Frame, FrameKind, Payload, Request};
use super::registry::{Hosted, OperationRegistry, SketchRun};
use crate::config::ServiceConfig;
use crate::control::{ServiceControl, StatusList, run_hook};
use crate::dataset::Dataset;
use crate::error::{DatasetError, error_chain};
use crate::handle::{Handle, OperationId};
use crate::ops::DataBound;
use crate::partial::PartialResult;
use crate::stream::{self as ds};
use anyhow::{Context, Result, bail};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{AbortHandle, Abortable};
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::mpsc::UnboundedSender;

type FrameStream = BoxStream<'static, Result<FrameKind>>;

/// What to remember about a successful operation.
enum MemoSource {
    /// The last dataset handle the operation produced.
    Handle,
    /// The accumulated sketch value.
    SketchTotal(SketchRun),
    Never,
}

pub struct RemoteService {
    endpoint: String,
    config: ServiceConfig,
    registry: Arc<OperationRegistry>,
    runtime: tokio::runtime::Handle,
    datasets: DashMap<Handle, Hosted>,
    next_handle: AtomicU32,
    subscriptions: DashMap<OperationId, AbortHandle>,
    memo: MemoTable,
    memoize: AtomicBool,
    accepting: AtomicBool,
}

impl RemoteService {
    /// Host `root` under [`Handle::ROOT`].
    ///
    /// Operations are spawned on the tokio runtime that is current when this is
    /// called.
    ///
    /// # Errors
    ///
    /// Fails when called outside a tokio runtime.
    pub fn new<T: DataBound>(
        endpoint: impl Into<String>,
        root: Dataset<T>,
        registry: Arc<OperationRegistry>,
        config: ServiceConfig,
    ) -> Result<Arc<Self>> {
        let runtime = tokio::runtime::Handle::try_current()
            .context("a remote service must be created inside a tokio runtime")?;
        let endpoint = endpoint.into();
        let datasets = DashMap::new();
        datasets.insert(Handle::ROOT, Arc::new(root) as Hosted);
        tracing::info!(%endpoint, memoize = config.memoize, "remote service started");
        Ok(Arc::new(Self {
            endpoint,
            memoize: AtomicBool::new(config.memoize),
            config,
            registry,
            runtime,
            datasets,
            next_handle: AtomicU32::new(Handle::ROOT.raw() + 1),
            subscriptions: DashMap::new(),
            memo: MemoTable::new(),
            accepting: AtomicBool::new(true),
        }))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<OperationRegistry> {
        &self.registry
    }

    pub(crate) fn runtime(&self) -> &tokio::runtime::Handle {
        &self.runtime
    }

    pub fn dataset(&self, handle: Handle) -> Option<Hosted> {
        self.datasets.get(&handle).map(|d| Arc::clone(d.value()))
    }

    /// Ids of operations that are still running.
    pub fn active_operations(&self) -> Vec<OperationId> {
        self.subscriptions.iter().map(|e| *e.key()).collect()
    }

    pub fn is_active(&self, id: OperationId) -> bool {
        self.subscriptions.contains_key(&id)
    }

    pub fn memoized_results(&self) -> usize {
        self.memo.len()
    }

    pub fn is_memoizing(&self) -> bool {
        self.memoize.load(Ordering::SeqCst)
    }

    /// Handle one request; every frame it produces goes to `sink`.
    pub fn dispatch(self: &Arc<Self>, request: Request, sink: UnboundedSender<Frame>) {
        let id = request.id();
        if let Request::Unsubscribe { id } = request {
            self.unsubscribe(id);
            let _ = sink.send(Frame::new(id, FrameKind::Ack));
            return;
        }
        let result = if self.accepting.load(Ordering::SeqCst) {
            self.start(request, &sink)
        } else {
            Err(DatasetError::Cancelled("service is shutting down".into()).into())
        };
        if let Err(err) = result {
            tracing::warn!(%id, error = %error_chain(&err), "request failed");
            let _ = sink.send(Frame::new(id, FrameKind::OnError(error_chain(&err))));
        }
    }

    /// Stop the operation `id`. Returns whether it was still running; unknown
    /// ids are not an error.
    pub fn unsubscribe(&self, id: OperationId) -> bool {
        match self.subscriptions.remove(&id) {
            Some((_, abort)) => {
                abort.abort();
                tracing::info!(%id, "unsubscribed");
                true
            }
            None => {
                tracing::debug!(%id, "unsubscribe for an inactive operation");
                false
            }
        }
    }

    /// Refuse new requests and abort every running operation.
    pub fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        let ids = self.active_operations();
        for id in &ids {
            self.unsubscribe(*id);
        }
        tracing::info!(endpoint = %self.endpoint, aborted = ids.len(), "remote service shut down");
    }

    fn lookup(&self, handle: Handle) -> Result<Hosted> {
        self.dataset(handle).ok_or_else(|| {
            DatasetError::UnknownHandle {
                handle,
                endpoint: self.endpoint.clone(),
            }
            .into()
        })
    }

    fn install(&self, dataset: Hosted) -> Handle {
        let handle = Handle::new(self.next_handle.fetch_add(1, Ordering::SeqCst));
        tracing::debug!(%handle, dataset = %dataset.describe(), "inserted dataset");
        self.datasets.insert(handle, dataset);
        handle
    }

    /// Install every produced dataset and answer with its handle.
    fn installing(self: &Arc<Self>, stream: ds::DataStream<Hosted>) -> FrameStream {
        let service = Arc::clone(self);
        stream
            .map(move |item| {
                let (done, value) = item?.into_parts();
                let payload = value.map(|d| Payload::Handle(service.install(d)));
                Ok(FrameKind::OnNext { done, payload })
            })
            .boxed()
    }

    fn start(self: &Arc<Self>, request: Request, sink: &UnboundedSender<Frame>) -> Result<()> {
        let id = request.id();
        for handle in request.inputs() {
            self.lookup(handle)?;
        }
        let key = if self.is_memoizing() {
            request.memo_fingerprint().map(|fp| memo::digest(&fp))
        } else {
            None
        };
        if let Some(key) = &key {
            let cached = self.memo.lookup(key, |h| self.datasets.contains_key(&h));
            if let Some(payload) = cached {
                tracing::info!(%id, kind = request.kind(), "answering from memoized result");
                let next = FrameKind::OnNext {
                    done: 1.0,
                    payload: Some(payload),
                };
                let _ = sink.send(Frame::new(id, next));
                let _ = sink.send(Frame::new(id, FrameKind::OnCompletion));
                return Ok(());
            }
        }

        tracing::debug!(%id, kind = request.kind(), "starting operation");
        let (frames, source) = match request {
            Request::Map { handle, op, .. } => {
                let stream = self.registry.map(&self.lookup(handle)?, &op)?;
                (self.installing(stream), MemoSource::Handle)
            }
            Request::FlatMap { handle, op, .. } => {
                let stream = self.registry.flat_map(&self.lookup(handle)?, &op)?;
                (self.installing(stream), MemoSource::Handle)
            }
            Request::Zip {
                handle, other, key, ..
            } => {
                let left = self.lookup(handle)?;
                let right = self.lookup(other)?;
                let stream = self.registry.zip(&key, &left, &right)?;
                (self.installing(stream), MemoSource::Handle)
            }
            Request::Sketch { handle, op, .. } => {
                let mut run = self.registry.sketch(&self.lookup(handle)?, &op)?;
                let stream = std::mem::replace(&mut run.stream, stream::empty().boxed());
                let frames = stream
                    .map(|item| {
                        item.map(|pr| FrameKind::OnNext {
                            done: pr.done(),
                            payload: pr.into_value().map(Payload::Value),
                        })
                    })
                    .boxed();
                (frames, MemoSource::SketchTotal(run))
            }
            Request::Manage {
                handle, message, ..
            } => {
                let dataset = self.lookup(handle)?;
                let message = self.registry.control(&message)?;
                let walk = dataset.manage(Arc::clone(&message));
                let service = Arc::clone(self);
                let own = stream::once(async move {
                    let status = run_hook(|| message.server_action(service.as_ref()));
                    Ok(PartialResult::new(0.0, Some(StatusList::from_optional(status))))
                });
                let frames = ds::stop_after_error(walk.chain(own).boxed())
                    .map(|item| {
                        item.map(|pr| FrameKind::OnNext {
                            done: pr.done(),
                            payload: pr.into_value().map(Payload::Statuses),
                        })
                    })
                    .boxed();
                (frames, MemoSource::Never)
            }
            Request::Unsubscribe { .. } => bail!("unsubscribe is not an operation"),
        };
        self.subscribe(id, frames, key.filter(|_| !matches!(source, MemoSource::Never)), source, sink.clone())
    }

    /// Register `id` and forward `frames` to `sink` on the runtime until the
    /// stream ends or the operation is unsubscribed.
    fn subscribe(
        self: &Arc<Self>,
        id: OperationId,
        mut frames: FrameStream,
        key: Option<MemoKey>,
        source: MemoSource,
        sink: UnboundedSender<Frame>,
    ) -> Result<()> {
        let (abort, registration) = AbortHandle::new_pair();
        match self.subscriptions.entry(id) {
            Entry::Occupied(_) => bail!("operation id {id} is already in use"),
            Entry::Vacant(slot) => {
                slot.insert(abort);
            }
        }

        let service = Arc::clone(self);
        let task = async move {
            let mut last_handle = None;
            while let Some(item) = frames.next().await {
                match item {
                    Ok(kind) => {
                        if let FrameKind::OnNext {
                            payload: Some(Payload::Handle(h)),
                            ..
                        } = &kind
                        {
                            last_handle = Some(*h);
                        }
                        if sink.send(Frame::new(id, kind)).is_err() {
                            tracing::debug!(%id, "caller went away");
                            service.subscriptions.remove(&id);
                            return;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(%id, error = %error_chain(&err), "operation failed");
                        service.subscriptions.remove(&id);
                        let _ = sink.send(Frame::new(id, FrameKind::OnError(error_chain(&err))));
                        return;
                    }
                }
            }
            service.subscriptions.remove(&id);
            if let Some(key) = key {
                service.remember(key, source, last_handle);
            }
            let _ = sink.send(Frame::new(id, FrameKind::OnCompletion));
        };
        self.runtime.spawn(Abortable::new(task, registration));
        Ok(())
    }

    fn remember(&self, key: MemoKey, source: MemoSource, last_handle: Option<Handle>) {
        if !self.is_memoizing() {
            return;
        }
        let payload = match source {
            MemoSource::Handle => last_handle.map(Payload::Handle),
            MemoSource::SketchTotal(run) => match (run.total)() {
                Ok(bytes) => Some(Payload::Value(bytes)),
                Err(err) => {
                    tracing::warn!(error = %error_chain(&err), "cannot memoize sketch result");
                    None
                }
            },
            MemoSource::Never => None,
        };
        if let Some(payload) = payload {
            self.memo.insert(key, payload);
        }
    }
}

impl ServiceControl for RemoteService {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn purge_memoized(&self) -> usize {
        let purged = self.memo.clear();
        tracing::info!(purged, "purged memoized results");
        purged
    }

    fn toggle_memoization(&self) -> bool {
        let on = !self.memoize.fetch_xor(true, Ordering::SeqCst);
        tracing::info!(on, "toggled memoization");
        on
    }

    fn delete_all_datasets(&self) -> usize {
        let before = self.datasets.len();
        self.datasets.retain(|h, _| *h == Handle::ROOT);
        let removed = before.saturating_sub(self.datasets.len());
        let purged = self.memo.clear();
        tracing::info!(removed, purged, "deleted all datasets");
        removed
    }

    fn dataset_count(&self) -> usize {
        self.datasets.len()
    }
}
