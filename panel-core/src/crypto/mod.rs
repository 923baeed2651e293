//! Authenticated encryption of secrets persisted by the orchestrator.
//!
//! - AES-256-GCM with a 128-bit IV and tag
//! - PBKDF2-HMAC-SHA512 (100 000 rounds) per-message key derivation
//! - Hex wire format `salt:iv:authTag:ciphertext`

pub mod codec;
pub mod legacy;
pub mod mask;

pub use codec::{is_encrypted_format, EncryptedBundle, EncryptionCodec, SecretMap};
pub use mask::mask_for_display;
