//! Server session - per-connection dispatch to a local Namespace.
//!
//! Each accepted connection gets one [`serve_connection`] task. Requests are
//! dispatched to the namespace (off the async executor via `spawn_blocking`,
//! since backends may block on I/O or CPU-bound decryption); watch
//! subscriptions retain a task that drains the namespace's blocking
//! [`Receiver`] and pushes events back down the same connection.

use crate::nine_s::{Error, Namespace, Scroll};
use crate::wire::codec::{Op, Request, Response};
use crate::wire::framer::{encode_frame, Framer};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// Drive one accepted connection to completion. Returns once the peer
/// disconnects or sends `close`.
pub async fn serve_connection(namespace: Arc<dyn Namespace>, stream: TcpStream) {
    let peer = stream.peer_addr().ok();
    tracing::debug!(?peer, "wire server: connection accepted");

    let (mut read_half, write_half) = stream.into_split();
    let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);

    let writer_task = tokio::spawn(async move {
        let mut write_half = write_half;
        while let Some(frame) = out_rx.recv().await {
            if write_half.write_all(&frame).await.is_err() {
                break;
            }
        }
    });

    let mut watches: HashMap<u64, tokio::task::JoinHandle<()>> = HashMap::new();
    let mut framer = Framer::new();
    let mut buf = [0u8; 4096];

    'conn: loop {
        let n = match read_half.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        framer.push(&buf[..n]);

        while let Some(frame) = framer.next_frame() {
            let req: Request = match serde_json::from_slice(&frame) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(error = %e, "wire server: dropping unparseable frame");
                    continue;
                }
            };

            tracing::trace!(tag = req.tag, op = ?req.op, path = %req.path, "wire server: dispatching request");

            if matches!(req.op, Op::Close) {
                let _ = send(&out_tx, Response::ok(req.tag)).await;
                break 'conn;
            }

            if matches!(req.op, Op::Unwatch) {
                if let Some(task) = watches.remove(&req.tag) {
                    task.abort();
                }
                let _ = send(&out_tx, Response::ok(req.tag)).await;
                continue;
            }

            if matches!(req.op, Op::Watch) {
                match namespace.watch(&req.path) {
                    Ok(mut rx) => {
                        let _ = send(&out_tx, Response::ok(req.tag)).await;
                        let tag = req.tag;
                        let push_tx = out_tx.clone();
                        let task = tokio::task::spawn_blocking(move || {
                            while let Some(scroll) = rx.recv() {
                                if push_tx.blocking_send(frame_of(Response::event(tag, scroll))).is_err() {
                                    break;
                                }
                            }
                        });
                        watches.insert(tag, task);
                    }
                    Err(e) => {
                        let _ = send(&out_tx, Response::err(req.tag, &e)).await;
                    }
                }
                continue;
            }

            let ns = namespace.clone();
            let resp = dispatch(ns, req).await;
            if send(&out_tx, resp).await.is_err() {
                break 'conn;
            }
        }
    }

    for (_, task) in watches.drain() {
        task.abort();
    }
    writer_task.abort();
    tracing::debug!(?peer, "wire server: connection closed");
}

/// Run a blocking Namespace operation on a blocking-pool thread.
async fn dispatch(namespace: Arc<dyn Namespace>, req: Request) -> Response {
    let tag = req.tag;
    let result = tokio::task::spawn_blocking(move || run_op(&*namespace, &req))
        .await
        .unwrap_or_else(|e| Err(Error::Internal(format!("dispatch task panicked: {}", e))));

    match result {
        Ok(resp) => resp,
        Err(e) => Response::err(tag, &e),
    }
}

fn run_op(namespace: &dyn Namespace, req: &Request) -> Result<Response, Error> {
    match req.op {
        Op::Read => {
            let scroll = namespace.read(&req.path)?;
            Ok(match scroll {
                Some(s) => Response::scroll(req.tag, s),
                None => Response::ok(req.tag),
            })
        }
        Op::Write => {
            let data = req
                .data
                .clone()
                .ok_or_else(|| Error::InvalidData("write request missing data".to_string()))?;
            let scroll = namespace.write(&req.path, data)?;
            Ok(Response::scroll(req.tag, scroll))
        }
        Op::List => {
            let paths = namespace.list(&req.path)?;
            Ok(Response::paths(req.tag, paths))
        }
        Op::Watch | Op::Unwatch | Op::Close => {
            unreachable!("handled before dispatch")
        }
    }
}

async fn send(out_tx: &mpsc::Sender<Vec<u8>>, resp: Response) -> Result<(), ()> {
    out_tx.send(frame_of(resp)).await.map_err(|_| ())
}

fn frame_of(resp: Response) -> Vec<u8> {
    let json = serde_json::to_string(&resp).unwrap_or_else(|_| {
        serde_json::to_string(&Response::err(resp.tag, &Error::Internal("encode failure".to_string())))
            .expect("fallback response always encodes")
    });
    encode_frame(&json)
}

/// Bind a `TcpListener` on `addr` and serve connections against `namespace`
/// until the returned future is dropped or the listener errors.
///
/// This is the one concrete transport driver this crate ships: enough to
/// exercise the wire protocol end to end, not a general transport
/// abstraction layer.
pub async fn listen(
    addr: impl tokio::net::ToSocketAddrs,
    namespace: Arc<dyn Namespace>,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(local_addr = ?listener.local_addr().ok(), "wire server: listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        tracing::debug!(?peer, "wire server: accepted connection");
        let ns = namespace.clone();
        tokio::spawn(serve_connection(ns, stream));
    }
}
