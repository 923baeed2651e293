//! AES-256-GCM encryption keyed by a server-wide secret.
//!
//! Every message gets a fresh random salt and IV; the AES key is derived from
//! the server secret and that salt with PBKDF2-HMAC-SHA512, so no two
//! messages share a key even though the secret is constant.
//!
//! Wire format (stable): `salt:iv:authTag:ciphertext`, each field hex encoded.

use crate::utils::errors::{OrchestratorError, Result};
use aes_gcm::{
    aead::{consts::U16, Aead, KeyInit},
    aes::Aes256,
    AesGcm, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, Secret};
use serde::{de::DeserializeOwned, Serialize};
use sha2::Sha512;
use std::collections::BTreeMap;
use zeroize::Zeroizing;

/// AES-256-GCM with a 128-bit IV.
type Aes256Gcm16 = AesGcm<Aes256, U16>;

pub const SALT_LENGTH: usize = 64;
pub const IV_LENGTH: usize = 16;
pub const TAG_LENGTH: usize = 16;
pub const KEY_LENGTH: usize = 32;
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Minimum accepted length of the server-wide secret.
pub const MIN_SECRET_LENGTH: usize = 32;

/// Flat string map used for secret bundles (certificate material, env vars).
pub type SecretMap = BTreeMap<String, String>;

/// Parsed but still encrypted bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedBundle {
    pub salt: Vec<u8>,
    pub iv: Vec<u8>,
    pub auth_tag: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl EncryptedBundle {
    /// Parses the 4-field wire format. Anything else is a `Format` error.
    pub fn parse(encoded: &str) -> Result<Self> {
        let parts: Vec<&str> = encoded.split(':').collect();
        if parts.len() != 4 {
            return Err(OrchestratorError::Format(format!(
                "expected 4 colon-separated fields, found {}",
                parts.len()
            )));
        }

        let field = |name: &str, value: &str| {
            hex::decode(value)
                .map_err(|e| OrchestratorError::Format(format!("{name} is not valid hex: {e}")))
        };

        let bundle = Self {
            salt: field("salt", parts[0])?,
            iv: field("iv", parts[1])?,
            auth_tag: field("authTag", parts[2])?,
            ciphertext: field("ciphertext", parts[3])?,
        };

        if bundle.salt.len() != SALT_LENGTH {
            return Err(OrchestratorError::Format(format!(
                "salt must be {SALT_LENGTH} bytes, found {}",
                bundle.salt.len()
            )));
        }
        if bundle.iv.len() != IV_LENGTH {
            return Err(OrchestratorError::Format(format!(
                "iv must be {IV_LENGTH} bytes, found {}",
                bundle.iv.len()
            )));
        }
        if bundle.auth_tag.len() != TAG_LENGTH {
            return Err(OrchestratorError::Format(format!(
                "authTag must be {TAG_LENGTH} bytes, found {}",
                bundle.auth_tag.len()
            )));
        }

        Ok(bundle)
    }

    pub fn encode(&self) -> String {
        [
            hex::encode(&self.salt),
            hex::encode(&self.iv),
            hex::encode(&self.auth_tag),
            hex::encode(&self.ciphertext),
        ]
        .join(":")
    }
}

/// Cheap structural check: four non-empty hex fields (ciphertext may be
/// empty for an empty plaintext).
pub fn is_encrypted_format(value: &str) -> bool {
    let parts: Vec<&str> = value.split(':').collect();
    parts.len() == 4
        && parts[..3].iter().all(|p| !p.is_empty())
        && parts
            .iter()
            .all(|p| p.len() % 2 == 0 && p.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Symmetric codec for secrets persisted by this core.
pub struct EncryptionCodec {
    secret: Secret<String>,
}

impl std::fmt::Debug for EncryptionCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionCodec")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl EncryptionCodec {
    pub fn new(secret: Secret<String>) -> Result<Self> {
        if secret.expose_secret().len() < MIN_SECRET_LENGTH {
            return Err(OrchestratorError::Config(format!(
                "encryption secret must be at least {MIN_SECRET_LENGTH} characters"
            )));
        }
        Ok(Self { secret })
    }

    fn derive_key(&self, salt: &[u8]) -> Zeroizing<[u8; KEY_LENGTH]> {
        let mut key = Zeroizing::new([0u8; KEY_LENGTH]);
        pbkdf2::pbkdf2_hmac::<Sha512>(
            self.secret.expose_secret().as_bytes(),
            salt,
            PBKDF2_ITERATIONS,
            key.as_mut_slice(),
        );
        key
    }

    fn cipher(&self, salt: &[u8]) -> Result<Aes256Gcm16> {
        let key = self.derive_key(salt);
        Aes256Gcm16::new_from_slice(key.as_slice())
            .map_err(|e| OrchestratorError::Config(format!("invalid derived key: {e}")))
    }

    /// Encrypts raw bytes into the 4-field wire format.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let mut salt = [0u8; SALT_LENGTH];
        let mut iv = [0u8; IV_LENGTH];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut iv);

        let cipher = self.cipher(&salt)?;
        let mut sealed = cipher
            .encrypt(Nonce::<U16>::from_slice(&iv), plaintext)
            .map_err(|_| OrchestratorError::Config("AES-GCM encryption failed".into()))?;

        // aes-gcm appends the tag to the ciphertext
        let tag_start = sealed.len() - TAG_LENGTH;
        let auth_tag = sealed.split_off(tag_start);

        Ok(EncryptedBundle {
            salt: salt.to_vec(),
            iv: iv.to_vec(),
            auth_tag,
            ciphertext: sealed,
        }
        .encode())
    }

    /// Decrypts a wire-format bundle. `Format` for malformed input,
    /// `Authentication` when the tag does not verify.
    pub fn decrypt(&self, encoded: &str) -> Result<Vec<u8>> {
        let bundle = EncryptedBundle::parse(encoded)?;
        let cipher = self.cipher(&bundle.salt)?;

        let mut sealed = Vec::with_capacity(bundle.ciphertext.len() + TAG_LENGTH);
        sealed.extend_from_slice(&bundle.ciphertext);
        sealed.extend_from_slice(&bundle.auth_tag);

        cipher
            .decrypt(Nonce::<U16>::from_slice(&bundle.iv), sealed.as_slice())
            .map_err(|_| OrchestratorError::Authentication)
    }

    pub fn encrypt_structured<T: Serialize>(&self, value: &T) -> Result<String> {
        let json = Zeroizing::new(serde_json::to_vec(value)?);
        self.encrypt(&json)
    }

    pub fn decrypt_structured<T: DeserializeOwned>(&self, encoded: &str) -> Result<T> {
        let json = Zeroizing::new(self.decrypt(encoded)?);
        Ok(serde_json::from_slice(&json)?)
    }

    pub fn encrypt_secret_map(&self, map: &SecretMap) -> Result<String> {
        self.encrypt_structured(map)
    }

    /// Decrypts a secret map, falling back to [`super::legacy::try_legacy_fallback`]
    /// for records written before encryption was introduced.
    pub fn decrypt_secret_map(&self, encoded: &str) -> Result<SecretMap> {
        match self.decrypt_structured::<SecretMap>(encoded) {
            Ok(map) => Ok(map),
            Err(e @ (OrchestratorError::Format(_) | OrchestratorError::Authentication)) => {
                #[allow(deprecated)]
                let legacy = super::legacy::try_legacy_fallback(encoded);
                legacy.ok_or_else(|| {
                    OrchestratorError::Decryption(format!(
                        "not an encrypted bundle or legacy record ({e})"
                    ))
                })
            }
            Err(e) => Err(OrchestratorError::Decryption(e.to_string())),
        }
    }
}
