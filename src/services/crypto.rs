// Crypto Service
// Secure credential sealing using AES-256-GCM with a machine-derived key
// This approach doesn't rely on OS Keychain, making it stable across dev builds

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Digest;
use thiserror::Error;

const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;
// Application-specific salt for key derivation
const APP_SALT: &[u8] = b"Colloquy-Credential-Sealing-v1";

/// Sealed data as stored at rest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedData {
    /// Base64 encoded nonce
    pub nonce: String,
    /// Base64 encoded ciphertext
    pub ciphertext: String,
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key derivation error: {0}")]
    KeyDerivation(String),
    #[error("Encryption error: {0}")]
    Encryption(String),
    #[error("Decryption error: {0}")]
    Decryption(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Get the machine-derived encryption key
/// Deterministically derived from machine identifiers, so it is stable on the
/// same machine without external key storage.
pub fn get_or_create_master_key() -> Result<[u8; KEY_SIZE], CryptoError> {
    let machine_id = get_machine_id()?;
    Ok(derive_key_from_machine_id(&machine_id))
}

/// Get a stable machine identifier from hostname + username
fn get_machine_id() -> Result<String, CryptoError> {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown-host".to_string());
    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown-user".to_string());

    Ok(format!("{}-{}", hostname, username))
}

/// Derive encryption key from machine identifier using SHA-256
fn derive_key_from_machine_id(machine_id: &str) -> [u8; KEY_SIZE] {
    let mut hasher = sha2::Sha256::new();
    hasher.update(APP_SALT);
    hasher.update(machine_id.as_bytes());
    hasher.update(APP_SALT);

    let result = hasher.finalize();

    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&result);
    key
}

/// Encrypt a plaintext string using AES-256-GCM
pub fn encrypt(plaintext: &str) -> Result<EncryptedData, CryptoError> {
    let key = get_or_create_master_key()?;

    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| CryptoError::Encryption(format!("Failed to create cipher: {}", e)))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| CryptoError::Encryption(format!("Encryption failed: {}", e)))?;

    Ok(EncryptedData {
        nonce: BASE64.encode(nonce_bytes),
        ciphertext: BASE64.encode(ciphertext),
    })
}

/// Decrypt sealed data back to plaintext
pub fn decrypt(encrypted: &EncryptedData) -> Result<String, CryptoError> {
    let key = get_or_create_master_key()?;

    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| CryptoError::Decryption(format!("Failed to create cipher: {}", e)))?;

    let nonce_bytes = BASE64
        .decode(&encrypted.nonce)
        .map_err(|e| CryptoError::InvalidData(format!("Invalid nonce: {}", e)))?;

    if nonce_bytes.len() != NONCE_SIZE {
        return Err(CryptoError::InvalidData(format!(
            "Invalid nonce size: expected {}, got {}",
            NONCE_SIZE,
            nonce_bytes.len()
        )));
    }

    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = BASE64
        .decode(&encrypted.ciphertext)
        .map_err(|e| CryptoError::InvalidData(format!("Invalid ciphertext: {}", e)))?;

    let plaintext = cipher
        .decrypt(nonce, ciphertext.as_ref())
        .map_err(|e| CryptoError::Decryption(format!("Decryption failed: {}", e)))?;

    String::from_utf8(plaintext)
        .map_err(|e| CryptoError::Decryption(format!("Invalid UTF-8: {}", e)))
}
