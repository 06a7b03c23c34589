//! Credential records and the authenticated codec that protects them at rest
//!
//! Credential blobs travel between the web layer, the job store and the
//! sync engine as opaque tokens: AES-256-GCM over the serialized record,
//! with the nonce carried in the token envelope. Decrypted records exist in
//! memory only for the duration of one job execution.

use crate::{FerryError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use ring::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Version prefix on every token this codec emits
const TOKEN_PREFIX: &str = "fy1.";

/// Connection parameters for one warehouse.
///
/// Backend-specific fields (Snowflake account, BigQuery project/dataset,
/// bearer tokens) live in `params`.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Host address (empty for HTTP backends addressed via params)
    #[serde(default)]
    pub host: String,
    /// Port number (0 for backend default)
    #[serde(default)]
    pub port: u16,
    /// Database name
    #[serde(default)]
    pub database: Option<String>,
    /// Username
    #[serde(default)]
    pub username: Option<String>,
    /// Password or API secret
    #[serde(default)]
    pub password: Option<String>,
    /// Additional backend-specific parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
}

impl CredentialRecord {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    /// Get a parameter, falling back to the known fields
    pub fn get_string(&self, key: &str) -> Option<String> {
        if let Some(val) = self.params.get(key) {
            return Some(val.clone());
        }
        match key {
            "host" => Some(self.host.clone()),
            "database" => self.database.clone(),
            "username" | "user" => self.username.clone(),
            "password" => self.password.clone(),
            _ => None,
        }
    }
}

// Secrets stay out of logs even via {:?}.
impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("params", &self.params.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Symmetric encrypt/decrypt of credential records.
///
/// One server-held 256-bit key, injected at construction. Encryption is
/// AES-256-GCM with a fresh random nonce per token; the token is
/// `fy1.` + base64(nonce || ciphertext || tag).
pub struct CredentialCodec {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl CredentialCodec {
    /// Create a codec from a 256-bit key.
    pub fn new(key_bytes: &[u8; 32]) -> Self {
        let unbound = UnboundKey::new(&AES_256_GCM, key_bytes)
            .unwrap_or_else(|_| unreachable!("AES-256-GCM accepts any 32-byte key"));
        Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        }
    }

    /// Encrypt a record into an opaque token.
    pub fn encrypt(&self, record: &CredentialRecord) -> Result<String> {
        let plaintext = serde_json::to_vec(record)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| FerryError::CredentialDecrypt("nonce generation failed".into()))?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext;
        self.key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| FerryError::CredentialDecrypt("encryption failed".into()))?;

        let mut envelope = Vec::with_capacity(NONCE_LEN + in_out.len());
        envelope.extend_from_slice(&nonce_bytes);
        envelope.extend_from_slice(&in_out);

        Ok(format!("{}{}", TOKEN_PREFIX, BASE64.encode(envelope)))
    }

    /// Decrypt a token back into a record.
    ///
    /// Idempotent on the same token. Also accepts an already-decrypted JSON
    /// record (pass-through), since callers along the pipeline may receive
    /// either depending on where the blob originated. Error messages never
    /// carry the token or any decrypted material.
    pub fn decrypt(&self, input: &str) -> Result<CredentialRecord> {
        let trimmed = input.trim();

        // Pass-through: a serialized record that was never encrypted.
        if trimmed.starts_with('{') {
            tracing::debug!("credential blob arrived unencrypted, passing through");
            return serde_json::from_str(trimmed)
                .map_err(|_| FerryError::CredentialDecrypt("malformed credential record".into()));
        }

        let encoded = trimmed.strip_prefix(TOKEN_PREFIX).ok_or_else(|| {
            FerryError::CredentialDecrypt("unrecognized credential token format".into())
        })?;

        let envelope = BASE64
            .decode(encoded)
            .map_err(|_| FerryError::CredentialDecrypt("malformed credential token".into()))?;
        if envelope.len() <= NONCE_LEN {
            return Err(FerryError::CredentialDecrypt(
                "truncated credential token".into(),
            ));
        }

        let (nonce_bytes, ciphertext) = envelope.split_at(NONCE_LEN);
        let mut nonce_array = [0u8; NONCE_LEN];
        nonce_array.copy_from_slice(nonce_bytes);
        let nonce = Nonce::assume_unique_for_key(nonce_array);

        let mut in_out = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| {
                FerryError::CredentialDecrypt("authentication tag verification failed".into())
            })?;

        serde_json::from_slice(plaintext)
            .map_err(|_| FerryError::CredentialDecrypt("malformed credential record".into()))
    }
}

impl std::fmt::Debug for CredentialCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCodec").finish_non_exhaustive()
    }
}
