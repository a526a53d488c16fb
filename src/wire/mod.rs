//! Newline-delimited JSON wire protocol for remote Namespace access.
//!
//! A client (`NetworkNamespace` / `BlockingNetworkNamespace`) and a server
//! session (`serve_connection`) speak the same framing ([`framer`]) and
//! message shapes ([`codec`]) over a plain TCP stream. Requests are tagged
//! by the client so reads, writes, and long-lived watch subscriptions can be
//! multiplexed on a single connection.

pub mod client;
pub mod codec;
pub mod framer;
pub mod server;

pub use client::{AsyncNamespace, BlockingNetworkNamespace, NetworkNamespace};
pub use codec::{Op, Request, Response, DEFAULT_PORT};
pub use framer::{encode_frame, Framer};
pub use server::{listen, serve_connection};
