//! Store - versioned namespace storage with optional encryption and history
//!
//! The Store layers metadata stamping, patch/anchor history, and optional
//! encryption-at-rest around a File backend. Encryption is a configuration
//! choice (off by default) — see [`StoreConfig`].
//!
//! ## Isolation Through Per-App Keys
//!
//! When encryption is enabled via `Store::open`, each app owns its keys:
//! - Derived, not shared → compromising one app's key doesn't expose others
//! - No plaintext storage for that app → no data-at-rest exposure
//! - Key supplied by the caller → the caller chooses their security model
//!
//! ## Lexical Namespace Scoping
//!
//! Each app_key creates an isolated namespace:
//!
//! - `Store::open("myapp", &master_key)` → `~/.nine_s/myapp/` (encrypted)
//! - `Store::at(path, &key)` → custom location (for testing)
//!
//! ```text
//! ~/.nine_s/
//!   myapp/             <- Store::open("myapp", &master_key)
//!     _scrolls/          (encrypted AES-256-GCM)
//!     _history/          (plaintext patches for audit)
//!   other-app/         <- Store::open("other-app", &master_key)
//!     _scrolls/          (encrypted with DIFFERENT derived key)
//!     _history/
//! ```
//!
//! ## Cryptographic Isolation (HKDF)
//!
//! When using `Store::open()`, the master key is **not** used directly.
//! Instead, an app-specific key is derived using HKDF-SHA256:
//!
//! ```text
//! app_key_myapp     = HKDF(master_key, "myapp")     → 32-byte key
//! app_key_other_app = HKDF(master_key, "other-app") → different 32-byte key
//! ```
//!
//! This provides **cryptographic isolation**:
//! - Apps cannot decrypt each other's data even with filesystem access
//! - Master key compromise affects all apps, but individual key leak is isolated
//! - No way to derive master key from app-specific key (one-way function)
//!
//! ## Environment Override
//!
//! Set `NINE_S_ROOT` to override the default location:
//! ```bash
//! NINE_S_ROOT=/custom/path myapp
//! ```
//!
//! ## Auditable History
//!
//! Every write automatically creates a patch in `_history/`. Patches are
//! computed on plaintext for meaningful diffs. This provides:
//! - Full audit trail of all changes
//! - Ability to anchor (checkpoint) important states
//! - Restore to any previous anchor
//!
//! # Usage
//!
//! ```rust,ignore
//! // Requires crypto feature
//! use nine_s::{Store, Namespace};
//! use serde_json::json;
//!
//! // Use tempdir with test key (production uses derived keys)
//! let dir = tempfile::tempdir().unwrap();
//! let key = Store::test_key();
//! let store = Store::at(dir.path(), &key).unwrap();
//!
//! // Write a scroll (encrypted at rest, plaintext in memory)
//! store.write("/inbox/msg-1", json!({"subject": "hello"})).unwrap();
//!
//! // Read it back (transparently decrypted)
//! let scroll = store.read("/inbox/msg-1").unwrap().unwrap();
//! assert_eq!(scroll.data["subject"], "hello");
//!
//! // List all inbox scrolls
//! let paths = store.list("/inbox").unwrap();
//! assert!(paths.contains(&"/inbox/msg-1".to_string()));
//!
//! // Create an anchor (checkpoint)
//! let anchor = store.anchor("/inbox/msg-1", Some("v1")).unwrap();
//!
//! // View history
//! let patches = store.history("/inbox/msg-1").unwrap();
//! ```
//!
//! # Production Key Derivation
//!
//! In production, keys are derived from user onboarding:
//!
//! ```rust,ignore
//! // During user onboarding
//! let master_key = vault::crypto::derive_password_key(&passphrase, &salt);
//!
//! // Open encrypted store
//! let store = Store::open("myapp", &master_key)?;
//! ```

use super::anchor::{self, Anchor};
use super::backends::file::FileNamespace;
use super::namespace::{Error, Namespace, Receiver, Result};
use super::patch::{self, Patch, PatchOp};
use super::scroll::Scroll;
use serde_json::Value;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

#[cfg(feature = "crypto")]
use crate::vault::crypto::{seal_combined, unseal, unseal_combined, SealedValue};

/// Encrypt a whole Scroll (metadata and data together) into the on-disk
/// envelope `{ "_encrypted": base64(nonce || ciphertext || tag) }`.
#[cfg(feature = "crypto")]
fn encrypt_envelope(key: &[u8; 32], scroll: &Scroll) -> Result<Value> {
    let plaintext = serde_json::to_vec(scroll)
        .map_err(|e| Error::Internal(format!("Failed to serialize scroll: {}", e)))?;
    let combined = seal_combined(key, &plaintext)
        .map_err(|e| Error::Internal(format!("Encryption failed: {}", e)))?;
    Ok(serde_json::json!({ "_encrypted": combined }))
}

/// Decrypt an on-disk envelope back into a Scroll.
///
/// Accepts the canonical combined form and, for compatibility, the
/// two-field `SealedValue` form written by older versions of this store.
#[cfg(feature = "crypto")]
fn decrypt_envelope(key: &[u8; 32], data: Value) -> Result<Scroll> {
    if let Some(combined) = data.get("_encrypted").and_then(|v| v.as_str()) {
        let plaintext = unseal_combined(key, combined)
            .map_err(|e| Error::Internal(format!("Decryption failed: {}", e)))?;
        return serde_json::from_slice(&plaintext)
            .map_err(|e| Error::Internal(format!("Failed to parse scroll: {}", e)));
    }

    let sealed: SealedValue = serde_json::from_value(data)
        .map_err(|e| Error::Internal(format!("Failed to parse sealed data: {}", e)))?;
    let plaintext = unseal(key, &sealed)
        .map_err(|e| Error::Internal(format!("Decryption failed: {}", e)))?;
    serde_json::from_slice(&plaintext)
        .map_err(|e| Error::Internal(format!("Failed to parse scroll: {}", e)))
}

/// Statistics about a scroll's history
///
/// Useful for deciding when to compact and monitoring disk usage.
#[derive(Debug, Clone)]
pub struct HistoryStats {
    /// Number of patches in history
    pub patch_count: usize,
    /// Number of anchors
    pub anchor_count: usize,
    /// Total bytes used by patch files
    pub total_bytes: u64,
    /// Oldest patch sequence number (if any)
    pub oldest_seq: Option<u64>,
    /// Newest patch sequence number (if any)
    pub newest_seq: Option<u64>,
}

impl HistoryStats {
    /// Check if compaction is recommended
    ///
    /// Returns true if patch count exceeds 200 or total bytes exceeds 1MB.
    pub fn should_compact(&self) -> bool {
        self.patch_count > 200 || self.total_bytes > 1_000_000
    }
}

/// Statistics about scrolls under a prefix
#[derive(Debug, Clone, Default)]
pub struct PrefixStats {
    /// Number of scrolls under the prefix
    pub scroll_count: usize,
    /// Estimated total bytes (JSON size)
    pub total_bytes: u64,
    /// Oldest scroll timestamp (milliseconds)
    pub oldest_timestamp: Option<i64>,
    /// Newest scroll timestamp (milliseconds)
    pub newest_timestamp: Option<i64>,
}

impl PrefixStats {
    /// Check if pruning is recommended
    ///
    /// Returns true if scroll count exceeds 500.
    pub fn should_prune(&self) -> bool {
        self.scroll_count > 500
    }
}

/// Configuration for opening a [`Store`].
///
/// Defaults mirror the reference configuration: unencrypted, history enabled,
/// a 100-entry patch ring buffer and a 10-entry anchor ring buffer per key.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    encrypted: bool,
    #[cfg(feature = "crypto")]
    key: Option<[u8; 32]>,
    history: bool,
    max_patches: usize,
    max_anchors: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            encrypted: false,
            #[cfg(feature = "crypto")]
            key: None,
            history: true,
            max_patches: 100,
            max_anchors: 10,
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable encryption at rest. Requires a key (see [`StoreConfig::key`]).
    #[cfg(feature = "crypto")]
    pub fn encrypted(mut self, key: [u8; 32]) -> Self {
        self.encrypted = true;
        self.key = Some(key);
        self
    }

    pub fn history(mut self, enabled: bool) -> Self {
        self.history = enabled;
        self
    }

    pub fn max_patches(mut self, n: usize) -> Self {
        self.max_patches = n.max(1);
        self
    }

    pub fn max_anchors(mut self, n: usize) -> Self {
        self.max_anchors = n.max(1);
        self
    }
}

/// Store - versioned, optionally-encrypted namespace storage with history
///
/// The primary interface for durable, auditable storage. Each app gets an
/// isolated namespace via `Store::open(app_key, &key)`; encryption is a
/// configuration choice (see [`StoreConfig`]), off by default.
///
/// ## Lexical Namespace Scoping
///
/// - `Store::open("myapp", &master_key)` → `~/.nine_s/myapp/` (encrypted)
/// - `Store::at(path, &key)` → custom location (for testing)
/// - `Store::with_config(path, config)` → full control (encryption optional)
///
/// Every write creates a patch in `_history/` for auditability, ring-buffered
/// to `maxPatches`/`maxAnchors` automatically.
pub struct Store {
    inner: FileNamespace,
    base_dir: PathBuf,
    app_key: Option<String>,
    config: StoreConfig,
    #[cfg(feature = "crypto")]
    encryption_key: Option<[u8; 32]>,
}

impl Store {
    /// Open an encrypted store for an application
    ///
    /// Each app_key creates an isolated, encrypted namespace at `~/.nine_s/{app_key}/`.
    /// All data is encrypted at rest using AES-256-GCM.
    ///
    /// The key should come from user onboarding - when the user creates or restores
    /// their master key, derive an encryption key for the store.
    ///
    /// # Cryptographic Isolation (HKDF)
    ///
    /// The master key is **not** used directly. Instead, an app-specific key is
    /// derived using HKDF-SHA256:
    ///
    /// ```text
    /// app_encryption_key = HKDF(master_key, salt="nine_s_v1", info=app_key)
    /// ```
    ///
    /// This provides **cryptographic isolation** between apps:
    /// - Each app_key produces a unique derived encryption key
    /// - Apps cannot decrypt each other's data even with filesystem access
    /// - Compromising one app's data doesn't reveal the master key
    ///
    /// # Security
    /// - All scrolls encrypted at rest (AES-256-GCM)
    /// - App-specific key derived via HKDF (apps cryptographically isolated)
    /// - app_key validated: alphanumeric, hyphens, underscores only
    /// - No path traversal allowed
    /// - Each app isolated in its own namespace
    ///
    /// # Example
    /// ```rust,ignore
    /// // During onboarding, derive master key from user's passphrase
    /// let master_key = vault::crypto::derive_password_key(&passphrase, &salt);
    ///
    /// // Open encrypted store (app-specific key derived internally)
    /// let store = Store::open("myapp", &master_key)?;
    ///
    /// // All operations encrypt/decrypt transparently
    /// store.write("/inbox/msg-1", json!({"text": "..."}))?;
    /// let scroll = store.read("/inbox/msg-1")?.unwrap();
    /// ```
    #[cfg(feature = "crypto")]
    pub fn open(app_key: &str, master_key: &[u8; 32]) -> Result<Self> {
        validate_app_key(app_key)?;
        let root = nine_s_root()?;
        let path = root.join(app_key);

        // Derive app-specific encryption key using HKDF
        // This provides cryptographic isolation between apps
        let derived_key = crate::vault::crypto::derive_app_key(master_key, app_key);

        Self::at_internal(
            path,
            Some(app_key.to_string()),
            StoreConfig::default().encrypted(derived_key),
        )
    }

    /// Open an encrypted store at a custom path
    ///
    /// Use this for testing. Keys are mandatory - sovereignty requires encryption.
    #[cfg(feature = "crypto")]
    pub fn at(path: impl AsRef<std::path::Path>, key: &[u8; 32]) -> Result<Self> {
        Self::at_internal(path, None, StoreConfig::default().encrypted(*key))
    }

    /// Open a store at a custom path with explicit configuration.
    ///
    /// This is the general entry point: encryption, history tracking, and
    /// ring-buffer retention sizes are all configuration, not fixed by type.
    pub fn with_config(path: impl AsRef<std::path::Path>, config: StoreConfig) -> Result<Self> {
        Self::at_internal(path, None, config)
    }

    /// Generate a random test key
    ///
    /// Convenience method for tests. In production, keys come from user onboarding.
    #[cfg(feature = "crypto")]
    pub fn test_key() -> [u8; 32] {
        use rand::RngCore;
        let mut key = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut key);
        key
    }

    /// Internal: Create store with all options
    fn at_internal(
        path: impl AsRef<std::path::Path>,
        app_key: Option<String>,
        config: StoreConfig,
    ) -> Result<Self> {
        let base_dir = path.as_ref().to_path_buf();

        // Ensure history directory exists
        let history_dir = base_dir.join("_history");
        fs::create_dir_all(&history_dir)
            .map_err(|e| Error::Internal(format!("Failed to create history dir: {}", e)))?;

        #[cfg(feature = "crypto")]
        let encryption_key = config.key;

        Ok(Self {
            inner: FileNamespace::new(&base_dir)?,
            base_dir,
            app_key,
            config,
            #[cfg(feature = "crypto")]
            encryption_key,
        })
    }

    /// Get the app_key this store was opened with
    pub fn app_key(&self) -> Option<&str> {
        self.app_key.as_deref()
    }

    /// Get the filesystem path where scrolls are stored
    pub fn path(&self) -> &std::path::Path {
        self.inner.path()
    }

    /// Check if this store encrypts data at rest
    #[cfg(feature = "crypto")]
    pub fn is_encrypted(&self) -> bool {
        self.encryption_key.is_some()
    }

    // ========================================================================
    // Internal Read/Write (encryption-aware)
    // ========================================================================

    /// Read a scroll, respecting encryption if enabled
    #[cfg(feature = "crypto")]
    fn read_scroll(&self, path: &str) -> Result<Option<Scroll>> {
        match self.encryption_key {
            Some(ref key) => match self.inner.read(path)? {
                Some(sealed_scroll) => Ok(Some(decrypt_envelope(key, sealed_scroll.data)?)),
                None => Ok(None),
            },
            None => self.inner.read(path),
        }
    }

    /// Read a scroll (non-crypto fallback - just use inner)
    #[cfg(not(feature = "crypto"))]
    fn read_scroll(&self, path: &str) -> Result<Option<Scroll>> {
        self.inner.read(path)
    }

    /// Write a scroll, respecting encryption if enabled
    #[cfg(feature = "crypto")]
    fn write_scroll_internal(&self, scroll: Scroll) -> Result<Scroll> {
        // Get current state before write (decrypted if encrypted)
        let old = self.read_scroll(&scroll.key)?;

        // CSP: Derive sequence from filesystem (monotonic counter)
        let new_version = self.next_seq(&scroll.key);

        match self.encryption_key {
            Some(ref key) => {
                let mut versioned_scroll = scroll.clone();
                versioned_scroll.metadata.version = new_version;
                versioned_scroll.metadata.created_at = old
                    .as_ref()
                    .and_then(|s| s.metadata.created_at.clone())
                    .or_else(|| versioned_scroll.metadata.created_at.clone())
                    .or_else(|| Some(crate::nine_s::current_iso_time()));
                versioned_scroll.metadata.updated_at = Some(crate::nine_s::current_iso_time());
                versioned_scroll.metadata.hash = Some(versioned_scroll.compute_hash());

                let envelope = encrypt_envelope(key, &versioned_scroll)?;
                self.inner.write(&scroll.key, envelope)?;

                if self.config.history {
                    let mut patch = patch::diff::create(&scroll.key, old.as_ref(), &versioned_scroll);
                    patch.seq = new_version;
                    self.store_patch(&patch)?;
                }

                Ok(versioned_scroll)
            }
            None => {
                let mut versioned_scroll = scroll.clone();
                versioned_scroll.metadata.version = new_version;

                let result = self.inner.write_scroll(versioned_scroll.clone())?;

                if self.config.history {
                    let mut patch = patch::diff::create(&scroll.key, old.as_ref(), &versioned_scroll);
                    patch.seq = new_version;
                    self.store_patch(&patch)?;
                }

                Ok(result)
            }
        }
    }

    /// Write a scroll (non-crypto fallback - just use inner)
    #[cfg(not(feature = "crypto"))]
    fn write_scroll_internal(&self, scroll: Scroll) -> Result<Scroll> {
        let old = self.inner.read(&scroll.key)?;
        let new_version = self.next_seq(&scroll.key);

        let mut versioned_scroll = scroll.clone();
        versioned_scroll.metadata.version = new_version;

        let result = self.inner.write_scroll(versioned_scroll.clone())?;

        if self.config.history {
            let mut patch = patch::diff::create(&scroll.key, old.as_ref(), &versioned_scroll);
            patch.seq = new_version;
            self.store_patch(&patch)?;
        }

        Ok(result)
    }

    // ========================================================================
    // History Operations
    // ========================================================================

    /// Get the patch history for a scroll
    ///
    /// Returns all patches in chronological order (oldest first).
    pub fn history(&self, path: &str) -> Result<Vec<Patch>> {
        let history_dir = self.history_dir_for_path(path);

        if !history_dir.exists() {
            return Ok(Vec::new());
        }

        let patches_dir = history_dir.join("patches");
        if !patches_dir.exists() {
            return Ok(Vec::new());
        }

        let mut patches = Vec::new();

        for entry in fs::read_dir(&patches_dir)
            .map_err(|e| Error::Internal(format!("Failed to read history: {}", e)))?
        {
            let entry =
                entry.map_err(|e| Error::Internal(format!("Failed to read entry: {}", e)))?;
            let file_path = entry.path();

            if file_path.extension().map_or(false, |e| e == "json") {
                let file = File::open(&file_path)
                    .map_err(|e| Error::Internal(format!("Failed to open patch: {}", e)))?;
                let patch: Patch = serde_json::from_reader(BufReader::new(file))
                    .map_err(|e| Error::Internal(format!("Failed to parse patch: {}", e)))?;
                patches.push(patch);
            }
        }

        // Sort by sequence number
        patches.sort_by_key(|p| p.seq);

        Ok(patches)
    }

    /// Create an anchor (immutable checkpoint) for a scroll
    ///
    /// Anchors freeze the current state with an optional label.
    /// Use `restore()` to return to an anchored state.
    pub fn anchor(&self, path: &str, label: Option<&str>) -> Result<Anchor> {
        // Use self.read_scroll() which respects encryption when crypto feature is enabled
        let scroll = self.read_scroll(path)?
            .ok_or_else(|| Error::NotFound(path.to_string()))?;

        let anchor = anchor::create(&scroll, label);

        // Store anchor
        let anchors_dir = self.history_dir_for_path(path).join("anchors");
        fs::create_dir_all(&anchors_dir)
            .map_err(|e| Error::Internal(format!("Failed to create anchors dir: {}", e)))?;

        let anchor_path = anchors_dir.join(format!("{}.json", anchor.id));
        let file = File::create(&anchor_path)
            .map_err(|e| Error::Internal(format!("Failed to create anchor file: {}", e)))?;

        serde_json::to_writer_pretty(BufWriter::new(file), &anchor)
            .map_err(|e| Error::Internal(format!("Failed to write anchor: {}", e)))?;

        self.trim_anchors(path, &anchors_dir)?;

        Ok(anchor)
    }

    /// List all anchors for a scroll
    pub fn anchors(&self, path: &str) -> Result<Vec<Anchor>> {
        let anchors_dir = self.history_dir_for_path(path).join("anchors");

        if !anchors_dir.exists() {
            return Ok(Vec::new());
        }

        let mut anchors = Vec::new();

        for entry in fs::read_dir(&anchors_dir)
            .map_err(|e| Error::Internal(format!("Failed to read anchors: {}", e)))?
        {
            let entry =
                entry.map_err(|e| Error::Internal(format!("Failed to read entry: {}", e)))?;
            let file_path = entry.path();

            if file_path.extension().map_or(false, |e| e == "json") {
                let file = File::open(&file_path)
                    .map_err(|e| Error::Internal(format!("Failed to open anchor: {}", e)))?;
                let anchor: Anchor = serde_json::from_reader(BufReader::new(file))
                    .map_err(|e| Error::Internal(format!("Failed to parse anchor: {}", e)))?;
                anchors.push(anchor);
            }
        }

        // Sort by timestamp
        anchors.sort_by_key(|a| a.timestamp);

        Ok(anchors)
    }

    /// Reconstruct the state of a scroll at a specific point in history
    ///
    /// Returns the scroll as it existed after the given sequence number.
    /// This is read-only - it doesn't modify the current state.
    ///
    /// # Example
    /// ```rust,ignore
    /// let store = Store::at(path)?;
    /// store.write("/doc", json!({"v": 1}))?;  // seq 1
    /// store.write("/doc", json!({"v": 2}))?;  // seq 2
    /// store.write("/doc", json!({"v": 3}))?;  // seq 3
    ///
    /// let v2_state = store.state_at("/doc", 2)?;
    /// assert_eq!(v2_state.data["v"], 2);
    /// ```
    pub fn state_at(&self, path: &str, seq: u64) -> Result<Scroll> {
        let patches = self.history(path)?;

        if patches.is_empty() {
            return Err(Error::NotFound(path.to_string()));
        }

        // Patch sequence numbers are absolute (tied to the scroll's monotonic
        // version), so they survive ring-buffer pruning intact. `patches[0]`
        // carries a full snapshot whenever `parent == None` - either the true
        // genesis patch (seq 1) or a ring-buffer-trimmed patch that
        // `trim_patches_dir` rewrote as a standalone snapshot at its own seq.
        // Either way its base is `patches[0].seq - 1`; anything at or before
        // that has fallen out of the buffer and needs an anchor.
        let oldest = patches[0].seq;
        let newest = patches[patches.len() - 1].seq;

        if seq == 0 || seq > newest {
            return Err(Error::Internal(format!(
                "Invalid sequence number {}. Valid range: 1-{}",
                seq, newest
            )));
        }

        let (mut current, base_seq) = if patches[0].parent.is_none() {
            (Scroll::new(path, serde_json::json!({})), oldest - 1)
        } else {
            let anchors = self.anchors(path)?;
            let base = anchors
                .into_iter()
                .filter(|a| a.scroll.metadata.version < oldest)
                .max_by_key(|a| a.scroll.metadata.version)
                .ok_or_else(|| {
                    Error::Internal(format!(
                        "history for {} has been pruned past seq {} with no anchor to reconstruct from",
                        path, oldest
                    ))
                })?;
            let base_seq = base.scroll.metadata.version;
            (base.scroll, base_seq)
        };

        if seq <= base_seq {
            return Err(Error::Internal(format!(
                "Invalid sequence number {}. Valid range: {}-{}",
                seq,
                base_seq + 1,
                newest
            )));
        }

        for patch in patches.iter().filter(|p| p.seq > base_seq && p.seq <= seq) {
            current = patch::diff::apply(&current, patch)
                .map_err(|e| Error::Internal(format!("Failed to apply patch: {}", e)))?;
        }

        Ok(current)
    }

    /// Restore a scroll to an anchored state
    ///
    /// This creates a new version with the anchor's content.
    /// The restoration itself is recorded in history.
    pub fn restore(&self, path: &str, anchor_id: &str) -> Result<Scroll> {
        let anchors = self.anchors(path)?;
        let anchor = anchors
            .into_iter()
            .find(|a| a.id == anchor_id)
            .ok_or_else(|| Error::NotFound(format!("anchor:{}", anchor_id)))?;

        // Verify anchor integrity
        if !anchor::verify(&anchor) {
            return Err(Error::Internal("Anchor integrity check failed".to_string()));
        }

        // Write the restored content (creates new patch in history)
        // Use self.write_scroll_internal() which respects encryption
        self.write_scroll_internal(anchor.scroll)
    }

    // ========================================================================
    // History Pruning (Synthesis: Memory with Purpose)
    // ========================================================================

    /// Compact history by removing old patches
    ///
    /// Retains patches from `keep_since_seq` (inclusive) to the present.
    /// If `keep_since_seq` is None, retains patches since the last anchor
    /// or the last 100 patches, whichever is more.
    ///
    /// # Dialectics
    ///
    /// **Thesis**: Total history (audit everything)
    /// **Antithesis**: Disk exhaustion (store nothing)
    /// **Synthesis**: Anchor-bounded retention (keep what matters)
    ///
    /// # Example
    /// ```rust,ignore
    /// // Keep only patches from seq 50 onwards
    /// store.compact("/ledger", Some(50))?;
    ///
    /// // Auto-detect: keep since last anchor or last 100
    /// store.compact("/ledger", None)?;
    /// ```
    ///
    /// # Returns
    /// The number of patches removed.
    pub fn compact(&self, path: &str, keep_since_seq: Option<u64>) -> Result<usize> {
        let patches = self.history(path)?;
        if patches.is_empty() {
            return Ok(0);
        }

        // Determine retention threshold
        let threshold = match keep_since_seq {
            Some(seq) => seq,
            None => self.auto_retention_threshold(path, &patches)?,
        };

        // Delete patches older than threshold
        let patches_dir = self.history_dir_for_path(path).join("patches");
        let mut removed = 0;

        for patch in patches.iter().filter(|p| p.seq < threshold) {
            let patch_path = patches_dir.join(format!("{:08}.json", patch.seq));
            if patch_path.exists() {
                fs::remove_file(&patch_path)
                    .map_err(|e| Error::Internal(format!("Failed to remove patch: {}", e)))?;
                removed += 1;
            }
        }

        Ok(removed)
    }

    /// Compact all paths under a prefix
    ///
    /// Useful for periodic maintenance across a namespace.
    ///
    /// # Example
    /// ```rust,ignore
    /// // Compact all inbox history
    /// store.compact_all("/inbox")?;
    /// ```
    pub fn compact_all(&self, prefix: &str) -> Result<usize> {
        let paths = self.inner.list(prefix)?;
        let mut total_removed = 0;

        for path in paths {
            total_removed += self.compact(&path, None)?;
        }

        Ok(total_removed)
    }

    /// Get the retention threshold for auto-compaction
    ///
    /// Strategy:
    /// 1. If anchors exist, keep from the oldest anchor's seq
    /// 2. Otherwise, keep the last DEFAULT_RETENTION patches
    fn auto_retention_threshold(&self, path: &str, patches: &[Patch]) -> Result<u64> {
        const DEFAULT_RETENTION: u64 = 100;

        // Check for anchors
        let anchors = self.anchors(path)?;

        if anchors.is_empty() {
            // No anchors: keep last DEFAULT_RETENTION patches
            let current_seq = patches.last().map(|p| p.seq).unwrap_or(0);
            Ok(current_seq.saturating_sub(DEFAULT_RETENTION))
        } else {
            // Has anchors: find the oldest anchor's seq
            // We need to reconstruct what seq each anchor corresponds to
            // The anchor contains a scroll, which has metadata.version
            let oldest_anchor_seq = anchors
                .iter()
                .filter_map(|a| {
                    // The scroll's version tells us what seq it was anchored at
                    Some(a.scroll.metadata.version)
                })
                .min()
                .unwrap_or(1);

            Ok(oldest_anchor_seq)
        }
    }

    /// Get history statistics for a path
    ///
    /// Useful for deciding when to compact.
    pub fn history_stats(&self, path: &str) -> Result<HistoryStats> {
        let patches = self.history(path)?;
        let anchors = self.anchors(path)?;

        let patches_dir = self.history_dir_for_path(path).join("patches");
        let total_bytes: u64 = if patches_dir.exists() {
            fs::read_dir(&patches_dir)
                .map_err(|e| Error::Internal(e.to_string()))?
                .filter_map(|e| e.ok())
                .filter_map(|e| e.metadata().ok())
                .map(|m| m.len())
                .sum()
        } else {
            0
        };

        Ok(HistoryStats {
            patch_count: patches.len(),
            anchor_count: anchors.len(),
            total_bytes,
            oldest_seq: patches.first().map(|p| p.seq),
            newest_seq: patches.last().map(|p| p.seq),
        })
    }

    // ========================================================================
    // Signal/Event Pruning (Storage Backpressure)
    // ========================================================================

    /// Prune old scrolls under a prefix, keeping only the most recent N
    ///
    /// This is essential for directories that accumulate unbounded events:
    /// - `/signals/task-failure/*` - task failure notifications
    /// - `/audit/events/*` - audit event log
    /// - `/analytics/events/*` - analytics events
    ///
    /// # Dialectics
    ///
    /// **Thesis**: Log everything (total observability)
    /// **Antithesis**: Disk exhaustion (log nothing)
    /// **Synthesis**: Rolling window (keep recent, prune old)
    ///
    /// # Example
    /// ```rust,ignore
    /// // Keep only last 100 task failure signals
    /// store.prune("/signals/task-failure", 100)?;
    ///
    /// // Keep only last 1000 audit events
    /// store.prune("/audit/events", 1000)?;
    /// ```
    ///
    /// # Returns
    /// The number of scrolls removed.
    pub fn prune(&self, prefix: &str, keep_count: usize) -> Result<usize> {
        let paths = self.inner.list(prefix)?;

        if paths.len() <= keep_count {
            return Ok(0);
        }

        // Get scrolls with their timestamps for sorting
        let mut scrolls_with_time: Vec<(String, i64)> = Vec::new();
        for path in &paths {
            if let Ok(Some(scroll)) = self.inner.read(path) {
                // Use updated_at or created_at timestamp (stored as Unix millis string)
                let timestamp = scroll
                    .metadata
                    .updated_at
                    .as_ref()
                    .or(scroll.metadata.created_at.as_ref())
                    .map(|ts| super::scroll::iso_to_unix_millis(ts))
                    .unwrap_or(0);
                scrolls_with_time.push((path.clone(), timestamp));
            }
        }

        // Sort by timestamp (oldest first)
        scrolls_with_time.sort_by_key(|(_, ts)| *ts);

        // Calculate how many to remove
        let remove_count = scrolls_with_time.len().saturating_sub(keep_count);
        let mut removed = 0;

        // Remove oldest scrolls
        for (path, _) in scrolls_with_time.into_iter().take(remove_count) {
            if self.delete(&path).is_ok() {
                removed += 1;
            }
        }

        Ok(removed)
    }

    /// Prune scrolls older than a duration
    ///
    /// Removes scrolls under the prefix that are older than `max_age`.
    ///
    /// # Example
    /// ```rust,ignore
    /// use std::time::Duration;
    ///
    /// // Remove signals older than 7 days
    /// store.prune_older_than("/signals", Duration::from_secs(7 * 24 * 60 * 60))?;
    /// ```
    pub fn prune_older_than(
        &self,
        prefix: &str,
        max_age: std::time::Duration,
    ) -> Result<usize> {
        let paths = self.inner.list(prefix)?;
        let cutoff = super::current_time_millis() - (max_age.as_millis() as i64);
        let mut removed = 0;

        for path in paths {
            if let Ok(Some(scroll)) = self.inner.read(&path) {
                // Timestamps stored as Unix millis strings
                let timestamp = scroll
                    .metadata
                    .updated_at
                    .as_ref()
                    .or(scroll.metadata.created_at.as_ref())
                    .map(|ts| super::scroll::iso_to_unix_millis(ts))
                    .unwrap_or(i64::MAX); // Keep if no timestamp

                if timestamp < cutoff {
                    if self.delete(&path).is_ok() {
                        removed += 1;
                    }
                }
            }
        }

        Ok(removed)
    }

    /// Delete a scroll at the given path
    ///
    /// Removes the scroll file. Does NOT remove history (use compact for that).
    pub fn delete(&self, path: &str) -> Result<()> {
        // Delegate to inner namespace
        // FileNamespace stores at: _scrolls/{path}.json
        let clean_path = path.trim_start_matches('/');
        let file_path = self.base_dir.join("_scrolls").join(format!("{}.json", clean_path));

        if file_path.exists() {
            fs::remove_file(&file_path)
                .map_err(|e| Error::Internal(format!("Failed to delete scroll: {}", e)))?;
        }

        Ok(())
    }

    /// Get statistics about a prefix (for monitoring)
    pub fn prefix_stats(&self, prefix: &str) -> Result<PrefixStats> {
        let paths = self.inner.list(prefix)?;
        let mut total_bytes: u64 = 0;
        let mut oldest_timestamp: Option<i64> = None;
        let mut newest_timestamp: Option<i64> = None;

        for path in &paths {
            if let Ok(Some(scroll)) = self.inner.read(path) {
                // Estimate size from JSON
                if let Ok(json) = serde_json::to_string(&scroll) {
                    total_bytes += json.len() as u64;
                }

                // Timestamps stored as Unix millis strings
                let timestamp = scroll
                    .metadata
                    .updated_at
                    .as_ref()
                    .or(scroll.metadata.created_at.as_ref())
                    .map(|ts| super::scroll::iso_to_unix_millis(ts));

                if let Some(ts) = timestamp {
                    oldest_timestamp = Some(oldest_timestamp.map_or(ts, |old| old.min(ts)));
                    newest_timestamp = Some(newest_timestamp.map_or(ts, |old| old.max(ts)));
                }
            }
        }

        Ok(PrefixStats {
            scroll_count: paths.len(),
            total_bytes,
            oldest_timestamp,
            newest_timestamp,
        })
    }

    /// Explicitly trim a key's patch log to its most recent `keep_patches`
    /// entries (defaults to the store's configured `maxPatches`).
    ///
    /// Ring-buffer retention already happens automatically on every write;
    /// this exists for callers who lower the retention window after the
    /// fact and want the log trimmed to the new size immediately.
    pub fn prune_history(&self, path: &str, keep_patches: Option<usize>) -> Result<usize> {
        let patches_dir = self.history_dir_for_path(path).join("patches");
        self.trim_patches_dir(&patches_dir, keep_patches.unwrap_or(self.config.max_patches))
    }

    /// Apply [`Store::prune_history`] to every key under `prefix`.
    pub fn prune_all_history(&self, prefix: &str, keep_patches: Option<usize>) -> Result<usize> {
        let paths = self.inner.list(prefix)?;
        let mut total = 0;
        for path in paths {
            total += self.prune_history(&path, keep_patches)?;
        }
        Ok(total)
    }

    // ========================================================================
    // Internal: History storage
    // ========================================================================

    /// Get the history directory for a scroll path
    fn history_dir_for_path(&self, scroll_path: &str) -> PathBuf {
        // /foo/bar -> _history/foo/bar/
        let clean_path = scroll_path.trim_start_matches('/');
        self.base_dir.join("_history").join(clean_path)
    }

    /// Store a patch in history, then enforce ring-buffer retention so the
    /// log never grows past `maxPatches` entries for this key.
    fn store_patch(&self, patch: &Patch) -> Result<()> {
        let patches_dir = self.history_dir_for_path(&patch.key).join("patches");
        fs::create_dir_all(&patches_dir)
            .map_err(|e| Error::Internal(format!("Failed to create patches dir: {}", e)))?;

        // Use seq number for ordering
        let patch_path = patches_dir.join(format!("{:08}.json", patch.seq));
        let file = File::create(&patch_path)
            .map_err(|e| Error::Internal(format!("Failed to create patch file: {}", e)))?;

        serde_json::to_writer_pretty(BufWriter::new(file), patch)
            .map_err(|e| Error::Internal(format!("Failed to write patch: {}", e)))?;

        self.trim_patches_dir(&patches_dir, self.config.max_patches)?;

        Ok(())
    }

    /// Delete the oldest patch files in `dir` until at most `keep` remain.
    ///
    /// Before deleting, the new oldest retained patch is rewritten as a
    /// self-contained snapshot (a genesis-style `Replace{path:"", value}`
    /// with `parent: None`), so `state_at` can still reconstruct it without
    /// needing an anchor for the base that is about to be dropped.
    fn trim_patches_dir(&self, dir: &std::path::Path, keep: usize) -> Result<usize> {
        if !dir.exists() {
            return Ok(0);
        }

        let mut entries: Vec<(u64, PathBuf)> = fs::read_dir(dir)
            .map_err(|e| Error::Internal(format!("Failed to read history: {}", e)))?
            .flatten()
            .filter_map(|e| {
                let path = e.path();
                path.file_stem()
                    .and_then(|s| s.to_string_lossy().parse::<u64>().ok())
                    .map(|seq| (seq, path))
            })
            .collect();
        entries.sort_unstable_by_key(|(seq, _)| *seq);

        if entries.len() <= keep {
            return Ok(0);
        }

        let drop_count = entries.len() - keep;

        // Replay every patch up to and including the new oldest retained
        // one, so that patch can be rewritten as a standalone snapshot.
        let mut replay = Vec::with_capacity(drop_count + 1);
        for (_, path) in &entries[..=drop_count] {
            let file = File::open(path)
                .map_err(|e| Error::Internal(format!("Failed to open patch: {}", e)))?;
            let patch: Patch = serde_json::from_reader(BufReader::new(file))
                .map_err(|e| Error::Internal(format!("Failed to parse patch: {}", e)))?;
            replay.push(patch);
        }

        let key = replay[0].key.clone();
        let mut current = Scroll::new(&key, serde_json::json!({}));
        for patch in &replay {
            current = patch::diff::apply(&current, patch)
                .map_err(|e| Error::Internal(format!("Failed to replay patch: {}", e)))?;
        }

        let new_oldest = replay.last().expect("replay is non-empty");
        let snapshot = Patch {
            key,
            ops: vec![PatchOp::Replace {
                path: String::new(),
                value: current.data.clone(),
            }],
            parent: None,
            hash: new_oldest.hash.clone(),
            timestamp: new_oldest.timestamp,
            seq: new_oldest.seq,
        };

        let (_, new_oldest_path) = &entries[drop_count];
        let file = File::create(new_oldest_path)
            .map_err(|e| Error::Internal(format!("Failed to rewrite patch: {}", e)))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &snapshot)
            .map_err(|e| Error::Internal(format!("Failed to write patch: {}", e)))?;

        let mut removed = 0;
        for (_, path) in &entries[..drop_count] {
            fs::remove_file(path)
                .map_err(|e| Error::Internal(format!("Failed to remove patch: {}", e)))?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Delete the oldest anchor files in `dir` until at most `maxAnchors` remain.
    fn trim_anchors(&self, path: &str, anchors_dir: &std::path::Path) -> Result<()> {
        let mut anchors = self.anchors(path)?;
        if anchors.len() <= self.config.max_anchors {
            return Ok(());
        }
        anchors.sort_by_key(|a| a.timestamp);
        let drop_count = anchors.len() - self.config.max_anchors;
        for anchor in &anchors[..drop_count] {
            let anchor_path = anchors_dir.join(format!("{}.json", anchor.id));
            if anchor_path.exists() {
                fs::remove_file(&anchor_path)
                    .map_err(|e| Error::Internal(format!("Failed to remove anchor: {}", e)))?;
            }
        }
        Ok(())
    }

    /// Get the next sequence number for a path (CSP-style monotonic counter)
    ///
    /// # CSP Insight (Tony Hoare)
    ///
    /// The sequence number must be derived from the **existing state of the channel**
    /// (the filesystem), not from in-flight messages (scroll metadata). This is like
    /// Bitcoin's block height - determined by counting existing blocks.
    ///
    /// By reading the patches directory, we get the true sequence regardless of
    /// how many writes are in flight. The filesystem acts as our sequencing channel.
    fn next_seq(&self, path: &str) -> u64 {
        let patches_dir = self.history_dir_for_path(path).join("patches");

        if !patches_dir.exists() {
            return 1;
        }

        // Count existing patches by finding the highest sequence number
        let mut max_seq: u64 = 0;

        if let Ok(entries) = fs::read_dir(&patches_dir) {
            for entry in entries.flatten() {
                if let Some(name) = entry.path().file_stem() {
                    if let Ok(seq) = name.to_string_lossy().parse::<u64>() {
                        max_seq = max_seq.max(seq);
                    }
                }
            }
        }

        max_seq + 1
    }
}

/// Get the 9S root directory
///
/// Checks `NINE_S_ROOT` environment variable first, then falls back to `~/.nine_s`.
///
/// # Security
/// The env var allows container/sandbox environments to redirect storage
/// without affecting app logic.
#[cfg(feature = "crypto")]
fn nine_s_root() -> Result<PathBuf> {
    if let Ok(root) = std::env::var("NINE_S_ROOT") {
        return Ok(PathBuf::from(root));
    }
    dirs::home_dir()
        .map(|h| h.join(".nine_s"))
        .ok_or_else(|| Error::Internal("Could not determine home directory".to_string()))
}

/// Validate app_key for security
///
/// # Rules
/// - Must be 1-64 characters
/// - Only alphanumeric, hyphens, underscores allowed
/// - Cannot start with hyphen or underscore
/// - Cannot be "." or ".." (path traversal)
/// - Cannot contain path separators
#[cfg(any(feature = "crypto", test))]
fn validate_app_key(app_key: &str) -> Result<()> {
    // Length check
    if app_key.is_empty() {
        return Err(Error::InvalidPath("app_key cannot be empty".to_string()));
    }
    if app_key.len() > 64 {
        return Err(Error::InvalidPath(
            "app_key cannot exceed 64 characters".to_string(),
        ));
    }

    // Path traversal check
    if app_key == "." || app_key == ".." {
        return Err(Error::InvalidPath(
            "app_key cannot be path traversal sequence".to_string(),
        ));
    }

    // First character check
    let first = app_key.chars().next().unwrap();
    if first == '-' || first == '_' {
        return Err(Error::InvalidPath(
            "app_key cannot start with hyphen or underscore".to_string(),
        ));
    }

    // Character validation
    for c in app_key.chars() {
        if !c.is_ascii_alphanumeric() && c != '-' && c != '_' {
            return Err(Error::InvalidPath(format!(
                "app_key contains invalid character '{}'. Only alphanumeric, hyphen, underscore allowed",
                c
            )));
        }
    }

    Ok(())
}

// Namespace implementation with automatic history tracking
// When encryption_key is set, all data is encrypted at rest

impl Namespace for Store {
    fn read(&self, path: &str) -> Result<Option<Scroll>> {
        self.read_scroll(path)
    }

    fn write(&self, path: &str, data: Value) -> Result<Scroll> {
        let scroll = Scroll::new(path, data);
        self.write_scroll_internal(scroll)
    }

    fn write_scroll(&self, scroll: Scroll) -> Result<Scroll> {
        self.write_scroll_internal(scroll)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list(prefix)
    }

    fn watch(&self, pattern: &str) -> Result<Receiver<Scroll>> {
        // For encrypted stores, use watch_decrypted() instead
        // This returns raw (encrypted) scrolls for backwards compatibility
        self.inner.watch(pattern)
    }

    fn close(&self) -> Result<()> {
        self.inner.close()
    }
}

#[cfg(feature = "crypto")]
impl Store {
    /// Watch for changes with automatic decryption
    ///
    /// Unlike `watch()` from the Namespace trait, this method transparently
    /// decrypts scrolls before delivering them. This maintains the Store's
    /// abstraction that encryption is transparent.
    ///
    /// # Example
    /// ```rust,ignore
    /// let store = Store::at(path, &key)?;
    /// let mut rx = store.watch_decrypted("/inbox/*")?;
    ///
    /// while let Some(scroll) = rx.recv() {
    ///     // scroll.data is already decrypted
    ///     println!("Message: {}", scroll.data["text"]);
    /// }
    /// ```
    ///
    /// # Errors
    /// - Returns an error if the pattern is invalid
    /// - Individual scrolls that fail decryption are silently dropped
    ///   (logged to stderr) rather than failing the entire watch
    pub fn watch_decrypted(&self, pattern: &str) -> Result<Receiver<Scroll>> {
        use super::channel;

        match &self.encryption_key {
            Some(key) => {
                let mut inner_rx = self.inner.watch(pattern)?;
                let key = *key;

                // Create a new channel for decrypted scrolls
                let (tx, rx) = channel::channel::<Scroll>(64);

                // Spawn a thread to decrypt scrolls
                // (Using thread because Receiver is sync, not async)
                std::thread::spawn(move || {
                    while let Some(sealed_scroll) = inner_rx.recv() {
                        match decrypt_envelope(&key, sealed_scroll.data.clone()) {
                            Ok(scroll) => {
                                if tx.send(scroll).is_err() {
                                    // Receiver dropped, stop processing
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(
                                    key = %sealed_scroll.key,
                                    error = %e,
                                    "watch_decrypted: failed to decrypt scroll, skipping"
                                );
                            }
                        }
                    }
                });

                Ok(rx)
            }
            None => {
                // No encryption, just pass through
                self.inner.watch(pattern)
            }
        }
    }
}

// Non-crypto builds: Store is still available but cannot turn on encryption,
// since AES-GCM/HKDF live behind the crypto feature. Use FileNamespace or
// MemoryNamespace directly if persistence without history is all that's needed.
