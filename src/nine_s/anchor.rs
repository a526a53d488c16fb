//! Anchor - Immutable checkpoints for Scrolls
//!
//! An anchor is a snapshot of a scroll's state at a point in time.
//! Anchors are immutable - once created, they cannot be modified.
//!
//! # Usage
//!
//! ```rust
//! use nine_s::{Scroll, Anchor};
//! use nine_s::anchor;
//! use serde_json::json;
//!
//! // Create a scroll
//! let scroll = Scroll::new("/notes/abc", json!({"title": "Important"}));
//!
//! // Create an anchor (checkpoint)
//! let anchor = anchor::create(&scroll, Some("v1.0"));
//!
//! // Verify integrity
//! assert!(anchor::verify(&anchor));
//!
//! // The anchor contains the full scroll state
//! assert_eq!(anchor.scroll.data["title"], "Important");
//! ```

use crate::nine_s::{current_time_millis, Scroll};
use serde::{Deserialize, Serialize};

/// An immutable checkpoint of a scroll's state
///
/// Anchors freeze a scroll at a specific point in time.
/// They include the full scroll content and a hash for integrity verification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Anchor {
    /// Unique anchor ID (hash prefix + timestamp)
    pub id: String,
    /// The full scroll state at this point
    pub scroll: Scroll,
    /// Content hash (SHA-256 hex) for verification
    pub hash: String,
    /// When the anchor was created (Unix millis)
    pub timestamp: i64,
    /// Optional human-readable label
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Optional description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Create an anchor from a scroll
///
/// The anchor captures the scroll's current state immutably.
/// An optional label can be provided for human reference.
pub fn create(scroll: &Scroll, label: Option<&str>) -> Anchor {
    use rand::RngCore;

    let hash = scroll.compute_hash();
    let timestamp = current_time_millis();
    // 8 CSPRNG bytes (16 hex chars) for uniqueness under concurrent same-millisecond creation
    let mut rand_bytes = [0u8; 8];
    rand::rngs::OsRng.fill_bytes(&mut rand_bytes);
    let id = format!("{}-{}-{}", &hash[..8], timestamp, hex::encode(rand_bytes));

    Anchor {
        id,
        scroll: scroll.clone(),
        hash,
        timestamp,
        label: label.map(String::from),
        description: None,
    }
}

/// Create an anchor with a description
pub fn create_with_description(scroll: &Scroll, label: Option<&str>, description: &str) -> Anchor {
    let mut anchor = create(scroll, label);
    anchor.description = Some(description.to_string());
    anchor
}

/// Verify an anchor's integrity
///
/// Returns true if the scroll content matches the stored hash.
pub fn verify(anchor: &Anchor) -> bool {
    anchor.scroll.compute_hash() == anchor.hash
}

/// Check if two anchors represent the same state
///
/// Two anchors are equivalent if their content hashes match,
/// even if they have different IDs or timestamps.
pub fn equivalent(a: &Anchor, b: &Anchor) -> bool {
    a.hash == b.hash
}

/// Extract just the scroll from an anchor
///
/// Useful when restoring from a checkpoint.
pub fn extract(anchor: &Anchor) -> Scroll {
    anchor.scroll.clone()
}

// ============================================================================
// Tests
// ============================================================================
