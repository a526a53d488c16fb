//! Universal hierarchical data store.
//!
//! Everything is a [`nine_s::Scroll`](crate::Scroll): a path, a JSON
//! payload, and metadata. A [`nine_s::Namespace`](crate::Namespace) exposes
//! five operations over scrolls (read, write, list, watch, close); a
//! [`nine_s::Kernel`](crate::Kernel) mounts namespaces at paths and routes
//! by longest prefix; a [`nine_s::Store`](crate::Store) layers history,
//! anchors, and optional encryption over a file-backed namespace.
//!
//! The `wire` feature adds a client/server pair that speaks the same
//! protocol over a TCP connection, so a mounted namespace can live in
//! another process or on another machine.

pub mod nine_s;

#[cfg(feature = "crypto")]
pub mod vault;

#[cfg(feature = "wire")]
pub mod wire;

pub use nine_s::*;
