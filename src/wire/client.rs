//! Client proxy - the async wire-protocol Namespace implementation.
//!
//! [`NetworkNamespace`] owns the connection and speaks the protocol
//! natively as async methods ([`AsyncNamespace`]). [`BlockingNetworkNamespace`]
//! wraps it with a dedicated background runtime so it can implement the
//! synchronous [`Namespace`] trait and mount transparently into a [`Kernel`].
//!
//! [`Kernel`]: crate::nine_s::Kernel

use crate::nine_s::{self, channel as std_channel, Error, Namespace, Receiver, Result, Scroll};
use crate::wire::codec::{response_to_error, Op, Request, Response};
use crate::wire::framer::{encode_frame, Framer};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot};

/// Async counterpart of [`Namespace`].
///
/// Every operation returns an awaitable completion, matching the protocol's
/// client-side scheduling model. `watch` yields a `tokio::sync::mpsc`
/// receiver rather than the std-channel based [`Receiver`], since it is fed
/// directly by the connection's reader task.
#[async_trait]
pub trait AsyncNamespace: Send + Sync {
    async fn read(&self, path: &str) -> Result<Option<Scroll>>;
    async fn write(&self, path: &str, data: Value) -> Result<Scroll>;
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
    async fn watch(&self, pattern: &str) -> Result<mpsc::Receiver<Scroll>>;
    async fn close(&self) -> Result<()>;
}

enum Pending {
    Once(oneshot::Sender<Response>),
    Watch(mpsc::Sender<Scroll>),
}

struct Shared {
    next_tag: AtomicU64,
    out_tx: mpsc::Sender<Vec<u8>>,
    pending: StdMutex<HashMap<u64, Pending>>,
    closed: AtomicBool,
}

impl Shared {
    fn alloc_tag(&self) -> u64 {
        self.next_tag.fetch_add(1, Ordering::Relaxed)
    }

    async fn send_request(&self, req: &Request) -> Result<()> {
        let json = serde_json::to_string(req)
            .map_err(|e| Error::InvalidData(format!("failed to encode request: {}", e)))?;
        self.out_tx
            .send(encode_frame(&json))
            .await
            .map_err(|_| Error::Connection("wire writer task ended".to_string()))
    }

    async fn roundtrip(&self, op: Op, path: &str, data: Option<Value>) -> Result<Response> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        let tag = self.alloc_tag();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(tag, Pending::Once(tx));

        let req = Request {
            tag,
            op,
            path: path.to_string(),
            data,
        };

        if let Err(e) = self.send_request(&req).await {
            self.pending.lock().unwrap().remove(&tag);
            return Err(e);
        }

        rx.await
            .map_err(|_| Error::Connection("connection closed before response".to_string()))
    }
}

/// Reads frames off the socket and demultiplexes them by tag.
async fn reader_loop(mut read_half: tokio::net::tcp::OwnedReadHalf, shared: Arc<Shared>) {
    let mut framer = Framer::new();
    let mut buf = [0u8; 4096];

    loop {
        let n = match read_half.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        framer.push(&buf[..n]);

        while let Some(frame) = framer.next_frame() {
            let resp: Response = match serde_json::from_slice(&frame) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(error = %e, "wire client: dropping unparseable frame");
                    continue;
                }
            };
            dispatch_response(&shared, resp);
        }
    }

    fail_all_pending(&shared);
}

fn dispatch_response(shared: &Arc<Shared>, resp: Response) {
    let is_event = resp.event.unwrap_or(false);
    let mut pending = shared.pending.lock().unwrap();

    if is_event {
        if let Some(Pending::Watch(tx)) = pending.get(&resp.tag) {
            if let Some(scroll) = resp.scroll.clone() {
                if tx.try_send(scroll).is_err() {
                    tracing::warn!(tag = resp.tag, "wire client: watch receiver lagging or dropped");
                }
            }
        }
        return;
    }

    if let Some(Pending::Once(tx)) = pending.remove(&resp.tag) {
        let _ = tx.send(resp);
    }
}

fn fail_all_pending(shared: &Arc<Shared>) {
    shared.closed.store(true, Ordering::Release);
    let mut pending = shared.pending.lock().unwrap();
    for (_, entry) in pending.drain() {
        match entry {
            Pending::Once(tx) => {
                let _ = tx.send(Response::err(0, &Error::Connection("transport closed".to_string())));
            }
            Pending::Watch(_) => {} // dropping the sender ends the receiver's stream
        }
    }
}

/// Async, connection-owning implementation of the wire protocol client.
pub struct NetworkNamespace {
    shared: Arc<Shared>,
    reader_task: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    writer_task: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl NetworkNamespace {
    /// Dial `addr` and start the reader/writer tasks on the current runtime.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Arc<Self>> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::Connection(format!("connect failed: {}", e)))?;
        Ok(Self::from_stream(stream))
    }

    /// Wrap an already-established stream (used by tests and by callers
    /// that set up the socket themselves).
    pub fn from_stream(stream: TcpStream) -> Arc<Self> {
        let (read_half, mut write_half) = stream.into_split();
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);

        let shared = Arc::new(Shared {
            next_tag: AtomicU64::new(1),
            out_tx,
            pending: StdMutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });

        let writer_task = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if write_half.write_all(&frame).await.is_err() {
                    break;
                }
            }
        });

        let reader_shared = shared.clone();
        let reader_task = tokio::spawn(reader_loop(read_half, reader_shared));

        Arc::new(Self {
            shared,
            reader_task: std::sync::Mutex::new(Some(reader_task)),
            writer_task: std::sync::Mutex::new(Some(writer_task)),
        })
    }
}

#[async_trait]
impl AsyncNamespace for NetworkNamespace {
    async fn read(&self, path: &str) -> Result<Option<Scroll>> {
        nine_s::namespace::validate_path(path)?;
        let resp = self.shared.roundtrip(Op::Read, path, None).await?;
        if !resp.ok {
            return Err(response_to_error(&resp));
        }
        Ok(resp.scroll)
    }

    async fn write(&self, path: &str, data: Value) -> Result<Scroll> {
        nine_s::namespace::validate_path(path)?;
        let resp = self.shared.roundtrip(Op::Write, path, Some(data)).await?;
        if !resp.ok {
            return Err(response_to_error(&resp));
        }
        resp.scroll
            .ok_or_else(|| Error::Internal("write response missing scroll".to_string()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let resp = self.shared.roundtrip(Op::List, prefix, None).await?;
        if !resp.ok {
            return Err(response_to_error(&resp));
        }
        Ok(resp.paths.unwrap_or_default())
    }

    async fn watch(&self, pattern: &str) -> Result<mpsc::Receiver<Scroll>> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        let tag = self.shared.alloc_tag();
        let (ack_tx, ack_rx) = oneshot::channel();
        self.shared.pending.lock().unwrap().insert(tag, Pending::Once(ack_tx));

        let req = Request {
            tag,
            op: Op::Watch,
            path: pattern.to_string(),
            data: None,
        };
        if let Err(e) = self.shared.send_request(&req).await {
            self.shared.pending.lock().unwrap().remove(&tag);
            return Err(e);
        }

        let ack = ack_rx
            .await
            .map_err(|_| Error::Connection("connection closed before watch ack".to_string()))?;
        if !ack.ok {
            return Err(response_to_error(&ack));
        }

        let (event_tx, event_rx) = mpsc::channel(256);
        self.shared.pending.lock().unwrap().insert(tag, Pending::Watch(event_tx));
        Ok(event_rx)
    }

    async fn close(&self) -> Result<()> {
        self.shared.closed.store(true, Ordering::Release);
        if let Some(task) = self.reader_task.lock().unwrap().take() {
            task.abort();
        }
        if let Some(task) = self.writer_task.lock().unwrap().take() {
            task.abort();
        }
        fail_all_pending(&self.shared);
        Ok(())
    }
}

/// Blocking facade over [`NetworkNamespace`], suitable for mounting into a
/// synchronous [`Kernel`](crate::nine_s::Kernel). Owns a dedicated
/// multi-thread runtime used only to drive the async client.
pub struct BlockingNetworkNamespace {
    inner: Arc<NetworkNamespace>,
    runtime: tokio::runtime::Runtime,
}

impl BlockingNetworkNamespace {
    /// Dial `addr`, blocking the calling thread until the connection is
    /// established.
    pub fn connect(addr: &str) -> Result<Self> {
        let runtime = tokio::runtime::Runtime::new()
            .map_err(|e| Error::Internal(format!("failed to start wire client runtime: {}", e)))?;
        let addr = addr.to_string();
        let inner = runtime.block_on(NetworkNamespace::connect(addr))?;
        Ok(Self { inner, runtime })
    }
}

impl Namespace for BlockingNetworkNamespace {
    fn read(&self, path: &str) -> Result<Option<Scroll>> {
        self.runtime.block_on(self.inner.read(path))
    }

    fn write(&self, path: &str, data: Value) -> Result<Scroll> {
        self.runtime.block_on(self.inner.write(path, data))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.runtime.block_on(self.inner.list(prefix))
    }

    fn watch(&self, pattern: &str) -> Result<Receiver<Scroll>> {
        let mut event_rx = self.runtime.block_on(self.inner.watch(pattern))?;
        let (tx, rx) = std_channel::channel(256);

        // Bridges the async event stream into the blocking Receiver the
        // Namespace trait expects. Exits (and implicitly lets the tag's
        // subscription lapse server-side on connection activity) once the
        // caller drops its Receiver.
        self.runtime.spawn(async move {
            while let Some(scroll) = event_rx.recv().await {
                if tx.send(scroll).is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }

    fn close(&self) -> Result<()> {
        self.runtime.block_on(self.inner.close())
    }
}
