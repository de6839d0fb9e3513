//! TCP transport for the remote protocol.
//!
//! Each message is a big-endian `u32` length followed by that many bytes of
//! postcard. Clients write [`Request`]s and read [`Frame`]s; any number of
//! operations share one connection and are told apart by their
//! [`OperationId`]. When a connection drops, the service unsubscribes every
//! operation that connection started.
//!
//! A message that cannot be decoded breaks the connection on either side:
//! the server closes it, and the client fails every operation still waiting
//! on it.

use super::channel::Channel;
use super::protocol::{Frame, FrameKind, Request};
use super::service::RemoteService;
use crate::config::ServiceConfig;
use crate::error::DatasetError;
use crate::handle::OperationId;
use anyhow::{Context, Result};
use dashmap::DashMap;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};

async fn read_message<R: AsyncRead + Unpin>(reader: &mut R, limit: usize) -> Result<Option<Vec<u8>>> {
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context("failed to read message length"),
    };
    if len > limit {
        return Err(DatasetError::Transport(format!(
            "message of {len} bytes exceeds the {limit} byte limit"
        ))
        .into());
    }
    let mut buf = vec![0; len];
    reader
        .read_exact(&mut buf)
        .await
        .context("failed to read message body")?;
    Ok(Some(buf))
}

async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> Result<()> {
    let len = u32::try_from(bytes.len()).context("message too large")?;
    writer.write_u32(len).await?;
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// A running TCP listener for one [`RemoteService`].
pub struct TcpServer {
    local_addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl TcpServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Endpoint string clients connected to this server report.
    pub fn endpoint(&self) -> String {
        format!("tcp://{}", self.local_addr)
    }

    /// Stop accepting and close every open connection.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = (&mut self.task).await;
        tracing::info!(addr = %self.local_addr, "tcp server stopped");
    }
}

/// Accept connections for `service` on `addr`.
///
/// # Errors
///
/// Fails if the address cannot be bound.
pub async fn serve(service: Arc<RemoteService>, addr: impl ToSocketAddrs) -> Result<TcpServer> {
    let listener = TcpListener::bind(addr)
        .await
        .context("failed to bind tcp listener")?;
    let local_addr = listener.local_addr()?;
    let (stop, mut stopped) = oneshot::channel();
    tracing::info!(addr = %local_addr, endpoint = service.endpoint(), "tcp server listening");

    let task = tokio::spawn(async move {
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                _ = &mut stopped => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(%peer, "accepted connection");
                        connections.spawn(handle_connection(Arc::clone(&service), stream, peer));
                    }
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }
        connections.shutdown().await;
    });

    Ok(TcpServer {
        local_addr,
        stop: Some(stop),
        task,
    })
}

/// Operations started over one connection. Whatever is still running when
/// the connection goes away (or its task is aborted) is unsubscribed.
struct Started {
    service: Arc<RemoteService>,
    peer: SocketAddr,
    ids: HashSet<OperationId>,
}

impl Started {
    fn insert(&mut self, id: OperationId) {
        if self.ids.len() >= 1024 {
            let service = &self.service;
            self.ids.retain(|id| service.is_active(*id));
        }
        self.ids.insert(id);
    }
}

impl Drop for Started {
    fn drop(&mut self) {
        let service = &self.service;
        let cancelled = self.ids.drain().filter(|id| service.unsubscribe(*id)).count();
        tracing::debug!(peer = %self.peer, cancelled, "connection closed");
    }
}

async fn handle_connection(service: Arc<RemoteService>, stream: TcpStream, peer: SocketAddr) {
    let limit = service.config().max_frame_bytes;
    let (reader, writer) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel::<Frame>();
    tokio::join!(
        read_requests(service, reader, tx, peer, limit),
        write_frames(writer, rx, limit),
    );
}

async fn read_requests(
    service: Arc<RemoteService>,
    mut reader: OwnedReadHalf,
    tx: mpsc::UnboundedSender<Frame>,
    peer: SocketAddr,
    limit: usize,
) {
    let mut started = Started {
        service: Arc::clone(&service),
        peer,
        ids: HashSet::new(),
    };
    loop {
        let bytes = match read_message(&mut reader, limit).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(%peer, error = %format!("{e:#}"), "dropping connection");
                break;
            }
        };
        match Request::decode(&bytes) {
            Ok(request) => {
                if !matches!(request, Request::Unsubscribe { .. }) {
                    started.insert(request.id());
                }
                service.dispatch(request, tx.clone());
            }
            Err(e) => {
                tracing::warn!(%peer, error = %e, "malformed request, dropping connection");
                break;
            }
        }
    }
}

/// Ends once every sender is gone: the reader's and those held by running
/// operations.
async fn write_frames(mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Frame>, limit: usize) {
    while let Some(frame) = rx.recv().await {
        let id = frame.id;
        let bytes = match frame.encode() {
            Ok(bytes) if bytes.len() <= limit => bytes,
            Ok(bytes) => {
                let message = format!("frame of {} bytes exceeds the {limit} byte limit", bytes.len());
                match Frame::new(id, FrameKind::OnError(message)).encode() {
                    Ok(bytes) => bytes,
                    Err(_) => continue,
                }
            }
            Err(e) => {
                tracing::warn!(%id, error = %e, "cannot encode frame");
                continue;
            }
        };
        if let Err(e) = write_message(&mut writer, &bytes).await {
            tracing::debug!(error = %e, "connection closed while writing");
            break;
        }
    }
}

/// Client side of a TCP connection to a remote service.
pub struct TcpChannel {
    endpoint: String,
    outgoing: mpsc::UnboundedSender<Request>,
    routes: Arc<DashMap<OperationId, mpsc::UnboundedSender<Frame>>>,
    closed: Arc<AtomicBool>,
}

impl TcpChannel {
    /// # Errors
    ///
    /// Fails if the connection cannot be established.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Arc<Self>> {
        Self::connect_with_limit(addr, ServiceConfig::default().max_frame_bytes).await
    }

    /// Connect, refusing incoming frames larger than `limit` bytes.
    ///
    /// # Errors
    ///
    /// Fails if the connection cannot be established.
    pub async fn connect_with_limit(addr: impl ToSocketAddrs, limit: usize) -> Result<Arc<Self>> {
        let stream = TcpStream::connect(addr)
            .await
            .context("failed to connect to remote service")?;
        let peer = stream.peer_addr()?;
        let endpoint = format!("tcp://{peer}");
        let (mut reader, mut writer) = stream.into_split();
        let (outgoing, mut requests) = mpsc::unbounded_channel::<Request>();
        let routes: Arc<DashMap<OperationId, mpsc::UnboundedSender<Frame>>> = Arc::default();

        tokio::spawn(async move {
            while let Some(request) = requests.recv().await {
                let written = match request.encode() {
                    Ok(bytes) => write_message(&mut writer, &bytes).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = written {
                    tracing::warn!(error = %format!("{e:#}"), "cannot send request");
                    break;
                }
            }
        });

        let closed = Arc::new(AtomicBool::new(false));
        let table = Arc::clone(&routes);
        let broken = Arc::clone(&closed);
        tokio::spawn(async move {
            loop {
                let frame = match read_message(&mut reader, limit).await {
                    Ok(Some(bytes)) => match Frame::decode(&bytes) {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::warn!(error = %e, "undecodable frame, dropping connection");
                            break;
                        }
                    },
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %format!("{e:#}"), "connection to remote service failed");
                        break;
                    }
                };
                let id = frame.id;
                if frame.kind.is_terminal() {
                    if let Some((_, route)) = table.remove(&id) {
                        let _ = route.send(frame);
                    }
                } else if let Some(route) = table.get(&id) {
                    let _ = route.send(frame);
                }
            }
            // Closing every route fails the streams still waiting on it.
            broken.store(true, Ordering::SeqCst);
            table.clear();
        });

        tracing::info!(%endpoint, "connected to remote service");
        Ok(Arc::new(Self {
            endpoint,
            outgoing,
            routes,
            closed,
        }))
    }
}

impl Channel for TcpChannel {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn call(&self, request: Request) -> Result<mpsc::UnboundedReceiver<Frame>> {
        let id = request.id();
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.insert(id, tx);
        if self.closed.load(Ordering::SeqCst) || self.outgoing.send(request).is_err() {
            self.routes.remove(&id);
            return Err(DatasetError::Transport(format!("connection to {} is closed", self.endpoint)).into());
        }
        Ok(rx)
    }

    fn cancel(&self, id: OperationId) {
        self.routes.remove(&id);
        let _ = self.outgoing.send(Request::Unsubscribe { id });
    }
}
