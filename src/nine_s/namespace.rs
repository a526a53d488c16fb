//! Namespace - The universal interface
//!
//! Five operations. Frozen. Never a sixth.
//!
//! Ken Thompson: "Simplicity is the ultimate sophistication."
//! SICP: "Data abstraction - Use ≠ Representation"

#[cfg(feature = "std-channel")]
pub use super::channel::Receiver;

use super::scroll::Scroll;
use serde_json::Value;
use thiserror::Error;

/// Stub receiver for WASM builds (watch not supported)
#[cfg(not(feature = "std-channel"))]
pub struct Receiver<T>(std::marker::PhantomData<T>);

#[cfg(not(feature = "std-channel"))]
impl<T> Receiver<T> {
    /// Always returns None in WASM builds
    pub fn recv(&mut self) -> Option<T> {
        None
    }
}

/// Error types following 9S protocol specification
#[derive(Debug, Error)]
pub enum Error {
    #[error("path not found: {0}")]
    NotFound(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("namespace is closed")]
    Closed,

    #[error("operation timed out")]
    Timeout,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Namespace - The 5 frozen operations
///
/// All functionality in 9S emerges from these five operations.
/// Extensions are new Namespace implementations, not new operations.
pub trait Namespace: Send + Sync {
    /// Read a scroll by path
    ///
    /// Returns None if path doesn't exist (NOT an error)
    /// Returns Error on failure (permission, I/O, connection, etc.)
    fn read(&self, path: &str) -> Result<Option<Scroll>>;

    /// Write data at a path
    ///
    /// Creates or updates the Scroll at path.
    /// Returns the written Scroll with computed meta (hash, version, time).
    fn write(&self, path: &str, data: Value) -> Result<Scroll>;

    /// Write a full scroll (with schema hint)
    ///
    /// The schema in scroll.meta is preserved.
    /// Hash, version, and time are computed by the namespace.
    fn write_scroll(&self, scroll: Scroll) -> Result<Scroll> {
        // Default implementation - can be overridden
        self.write(&scroll.key, scroll.data)
    }

    /// List all paths under a prefix
    ///
    /// Returns empty vec if no matches (NOT an error)
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Watch for changes matching a pattern
    ///
    /// Returns a channel that receives Scrolls when matching paths change.
    /// Supports glob patterns: * (single segment), ** (any suffix)
    fn watch(&self, pattern: &str) -> Result<Receiver<Scroll>>;

    /// Close the namespace and release resources
    ///
    /// Cancels all active watches (channels close).
    /// Subsequent operations return Error::Closed.
    /// Idempotent - safe to call multiple times.
    fn close(&self) -> Result<()>;
}

/// Validate a literal scroll path per 9S spec.
///
/// # Security
/// - Rejects path traversal attempts (`..` and `.` segments)
/// - Rejects empty segments (no double slashes, no trailing slash)
/// - Rejects `*` anywhere - literal paths never carry wildcards
/// - Only allows alphanumeric, underscore, hyphen, and dot (within names)
pub fn validate_path(path: &str) -> Result<()> {
    validate_path_grammar(path, false)
}

/// Validate a watch pattern per 9S spec.
///
/// Same grammar as [`validate_path`], except the final segment may be the
/// literal wildcard `*` (matches one segment) or `**` (matches any suffix).
pub fn validate_pattern(pattern: &str) -> Result<()> {
    validate_path_grammar(pattern, true)
}

fn validate_path_grammar(path: &str, allow_trailing_wildcard: bool) -> Result<()> {
    if path.is_empty() {
        return Err(Error::InvalidPath("path cannot be empty".to_string()));
    }

    if !path.starts_with('/') {
        return Err(Error::InvalidPath("path must start with /".to_string()));
    }

    if path == "/" {
        return Ok(());
    }

    let segments: Vec<&str> = path[1..].split('/').collect();
    let last = segments.len() - 1;

    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            return Err(Error::InvalidPath(
                "empty path segment (double slash or trailing slash)".to_string(),
            ));
        }

        // SECURITY: Reject path traversal attempts
        if *segment == "." || *segment == ".." {
            return Err(Error::InvalidPath(
                "path traversal not allowed (. or .. segments)".to_string(),
            ));
        }

        if allow_trailing_wildcard && i == last && (*segment == "*" || *segment == "**") {
            continue;
        }

        for c in segment.chars() {
            if !c.is_ascii_alphanumeric() && c != '_' && c != '.' && c != '-' {
                return Err(Error::InvalidPath(format!(
                    "invalid character '{}' in path",
                    c
                )));
            }
        }
    }

    Ok(())
}

/// Check if a path matches a pattern (supports * and **)
pub fn path_matches(path: &str, pattern: &str) -> bool {
    // Exact match
    if path == pattern {
        return true;
    }

    // Single wildcard: /foo/* matches /foo/bar but not /foo/bar/baz
    if pattern.ends_with("/*") {
        let prefix = &pattern[..pattern.len() - 1];
        if path.starts_with(prefix) {
            let remainder = &path[prefix.len()..];
            // Should not contain any more slashes
            return !remainder.contains('/');
        }
        return false;
    }

    // Recursive wildcard: /foo/** matches /foo/bar, /foo/bar/baz, etc.
    if pattern.ends_with("/**") {
        let prefix = &pattern[..pattern.len() - 2];
        return path.starts_with(prefix);
    }

    false
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        // Property 11: any path built from valid segments validates; any path
        // containing a character outside [A-Za-z0-9_.-] is rejected.
        #[test]
        fn valid_segments_always_validate(segs in prop::collection::vec("[a-zA-Z0-9_.-]{1,8}", 1..6)) {
            let path = format!("/{}", segs.join("/"));
            prop_assert!(validate_path(&path).is_ok());
        }

        #[test]
        fn disallowed_char_always_rejected(bad in "[!@#$%^&()+=<>,;: ]") {
            let path = format!("/foo{}bar", bad);
            prop_assert!(validate_path(&path).is_err());
        }

        // Property 9: exact patterns (no trailing wildcard) match only themselves.
        #[test]
        fn exact_pattern_matches_only_itself(segs in prop::collection::vec("[a-zA-Z0-9_.-]{1,8}", 1..6), extra in "[a-zA-Z0-9_.-]{1,8}") {
            let path = format!("/{}", segs.join("/"));
            let other = format!("{}/{}", path, extra);
            prop_assert!(path_matches(&path, &path));
            prop_assert!(!path_matches(&other, &path));
        }
    }
}
