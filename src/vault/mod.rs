//! Cryptographic primitives shared by [`crate::nine_s::store`] and
//! [`crate::nine_s::sealed`].
//!
//! - `crypto`: AES-256-GCM sealing, HKDF-SHA256 app-key derivation, PBKDF2
//!   password-based key derivation.

pub mod crypto;

pub use crypto::{
    derive_app_key, derive_password_key, generate_salt, seal, seal_combined, unseal,
    unseal_combined, CryptoError, SealedValue, PBKDF2_ITERATIONS,
};
