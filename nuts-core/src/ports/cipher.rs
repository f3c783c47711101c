//! Credential cipher port

use crate::domain::result::Result;

/// Symmetric encryption for provider credentials at rest
pub trait CredentialCipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
}
