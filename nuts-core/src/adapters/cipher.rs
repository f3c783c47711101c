//! Credential cipher backed by XChaCha20-Poly1305
//!
//! The key is derived with Argon2id from a passphrase and a per-install salt
//! kept next to the database. Output layout is `nonce || ciphertext`.

use std::fs;
use std::path::Path;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::RngCore;

use crate::domain::result::{Error, Result};
use crate::ports::CredentialCipher;

/// Argon2id parameters
const TIME_COST: u32 = 3;
const MEMORY_COST: u32 = 65536; // 64 MiB
const PARALLELISM: u32 = 4;
const KEY_LEN: usize = 32;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 24;

const SALT_FILE: &str = "credentials.salt";

pub struct ChaChaCredentialCipher {
    cipher: XChaCha20Poly1305,
}

impl ChaChaCredentialCipher {
    /// Derive the key from a passphrase and salt
    pub fn new(passphrase: &str, salt: &[u8]) -> Result<Self> {
        if passphrase.is_empty() {
            return Err(Error::Encryption("passphrase must not be empty".to_string()));
        }
        let key = derive_key(passphrase, salt)?;
        let cipher = XChaCha20Poly1305::new_from_slice(&key)
            .map_err(|e| Error::Encryption(format!("invalid key length: {}", e)))?;
        Ok(Self { cipher })
    }

    /// Open the cipher for a data directory, creating its salt on first use
    pub fn open(nuts_dir: &Path, passphrase: &str) -> Result<Self> {
        let salt = load_or_create_salt(nuts_dir)?;
        Self::new(passphrase, &salt)
    }
}

impl CredentialCipher for ChaChaCredentialCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|_| Error::Encryption("failed to encrypt credential".to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() <= NONCE_LEN {
            return Err(Error::Encryption("ciphertext too short".to_string()));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        self.cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Encryption("failed to decrypt credential (wrong key?)".to_string()))
    }
}

/// Derive encryption key from password using Argon2id
fn derive_key(passphrase: &str, salt: &[u8]) -> Result<[u8; KEY_LEN]> {
    let params = argon2::Params::new(MEMORY_COST, TIME_COST, PARALLELISM, Some(KEY_LEN))
        .map_err(|e| Error::Encryption(format!("failed to create argon2 params: {:?}", e)))?;
    let argon2 = argon2::Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let mut key = [0u8; KEY_LEN];
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| Error::Encryption(format!("failed to derive key: {:?}", e)))?;
    Ok(key)
}

fn load_or_create_salt(nuts_dir: &Path) -> Result<Vec<u8>> {
    let path = nuts_dir.join(SALT_FILE);
    if path.exists() {
        let content = fs::read_to_string(&path)?;
        let salt = hex::decode(content.trim())
            .map_err(|e| Error::Encryption(format!("invalid salt file {}: {}", path.display(), e)))?;
        if salt.len() != SALT_LEN {
            return Err(Error::Encryption(format!("invalid salt length in {}", path.display())));
        }
        return Ok(salt);
    }

    let mut salt = vec![0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    fs::write(&path, hex::encode(&salt))?;
    tracing::info!(path = %path.display(), "created credential salt");
    Ok(salt)
}
