//! Envelope encryption and per-owner key management.
//!
//! Every stored payload is sealed with XChaCha20-Poly1305 under a key derived
//! per owner: Argon2id over the master secret with a random per-owner salt.
//! The envelope layout is `version (1 byte) ‖ nonce (24 bytes) ‖ ciphertext+tag`.
//! Opening an envelope whose tag does not verify yields [`DecryptFailed`] —
//! tampered or corrupted payloads are never partially decoded.
//!
//! Key material lives only in memory: [`MasterSecret`] and derived keys are
//! zeroized on drop, and the [`KeyCache`] evicts ciphers for owners that have
//! gone idle.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::RngCore;
use zeroize::{Zeroize, Zeroizing};

use crate::error::{MemoryError, Result};

/// Envelope format version.
const ENVELOPE_VERSION: u8 = 1;
/// XChaCha20 extended nonce length.
const NONCE_LEN: usize = 24;
/// Derived key length.
const KEY_LEN: usize = 32;
/// Per-owner KDF salt length.
pub const SALT_LEN: usize = 16;

/// Authentication failure while opening an envelope. Carries no detail on
/// purpose; the caller attaches the item identity.
#[derive(Debug)]
pub struct DecryptFailed;

/// The engine-wide master secret. Zeroized on drop and redacted from Debug.
pub struct MasterSecret(Zeroizing<Vec<u8>>);

impl MasterSecret {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterSecret([REDACTED])")
    }
}

/// Generate a fresh random per-owner KDF salt.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive an owner cipher from the master secret and the owner's salt.
///
/// Argon2id, 19 MiB / 2 passes — the OWASP interactive profile. The derived
/// key bytes are wiped once the cipher is constructed.
pub fn derive_owner_cipher(master: &MasterSecret, salt: &[u8]) -> Result<OwnerCipher> {
    let params = Params::new(19 * 1024, 2, 1, Some(KEY_LEN))
        .map_err(|e| MemoryError::Crypto(format!("bad argon2 params: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = [0u8; KEY_LEN];
    argon2
        .hash_password_into(master.expose(), salt, &mut key)
        .map_err(|e| MemoryError::Crypto(format!("key derivation failed: {e}")))?;

    let cipher = XChaCha20Poly1305::new((&key).into());
    key.zeroize();
    Ok(OwnerCipher { cipher })
}

/// An owner's authenticated-encryption handle.
#[derive(Clone)]
pub struct OwnerCipher {
    cipher: XChaCha20Poly1305,
}

impl OwnerCipher {
    /// Seal a plaintext into an envelope. The AAD binds the envelope to its
    /// record identity so ciphertexts cannot be swapped between rows.
    pub fn seal(&self, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(XNonce::from_slice(&nonce), Payload { msg: plaintext, aad })
            .map_err(|_| MemoryError::Crypto("encryption failed".into()))?;

        let mut envelope = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
        envelope.push(ENVELOPE_VERSION);
        envelope.extend_from_slice(&nonce);
        envelope.extend_from_slice(&ciphertext);
        Ok(envelope)
    }

    /// Open an envelope, verifying the authentication tag and the AAD binding.
    pub fn open(&self, aad: &[u8], envelope: &[u8]) -> std::result::Result<Vec<u8>, DecryptFailed> {
        if envelope.len() < 1 + NONCE_LEN || envelope[0] != ENVELOPE_VERSION {
            return Err(DecryptFailed);
        }
        let nonce = &envelope[1..1 + NONCE_LEN];
        let ciphertext = &envelope[1 + NONCE_LEN..];

        self.cipher
            .decrypt(XNonce::from_slice(nonce), Payload { msg: ciphertext, aad })
            .map_err(|_| DecryptFailed)
    }
}

/// AAD binding an envelope to its owner and item.
pub fn record_aad(owner_id: &str, item_id: &str) -> Vec<u8> {
    let mut aad = Vec::with_capacity(owner_id.len() + item_id.len() + 1);
    aad.extend_from_slice(owner_id.as_bytes());
    aad.push(b':');
    aad.extend_from_slice(item_id.as_bytes());
    aad
}

struct CachedCipher {
    cipher: OwnerCipher,
    last_used: Instant,
}

/// In-memory cache of derived owner ciphers.
///
/// Derivation is deliberately slow (Argon2id), so active owners keep their
/// cipher here; the sweep purges entries idle past the configured window to
/// bound how long key state stays resident.
pub struct KeyCache {
    master: MasterSecret,
    ciphers: HashMap<String, CachedCipher>,
    max_idle: Duration,
}

impl KeyCache {
    pub fn new(master: MasterSecret, max_idle: Duration) -> Self {
        Self {
            master,
            ciphers: HashMap::new(),
            max_idle,
        }
    }

    /// Get the cipher for an owner, deriving it on first use. Returns a clone
    /// so the cache lock need not be held while the cipher is in use.
    pub fn acquire(&mut self, owner_id: &str, salt: &[u8]) -> Result<OwnerCipher> {
        if !self.ciphers.contains_key(owner_id) {
            let cipher = derive_owner_cipher(&self.master, salt)?;
            self.ciphers.insert(
                owner_id.to_string(),
                CachedCipher { cipher, last_used: Instant::now() },
            );
        }
        let entry = self
            .ciphers
            .get_mut(owner_id)
            .expect("entry inserted above");
        entry.last_used = Instant::now();
        Ok(entry.cipher.clone())
    }

    /// Drop the cached cipher for an owner (used by wipe).
    pub fn release(&mut self, owner_id: &str) {
        self.ciphers.remove(owner_id);
    }

    /// Drop ciphers for owners idle past the configured window. Returns the
    /// number purged.
    pub fn purge_idle(&mut self) -> usize {
        let max_idle = self.max_idle;
        let before = self.ciphers.len();
        self.ciphers
            .retain(|_, entry| entry.last_used.elapsed() < max_idle);
        before - self.ciphers.len()
    }

    #[cfg(test)]
    pub fn cached_owner_count(&self) -> usize {
        self.ciphers.len()
    }
}
