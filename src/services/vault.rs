// Credential Vault
// Seals provider API keys with the crypto service and stores them in SQLite

use thiserror::Error;

use crate::repositories::ProviderRepository;
use crate::services::crypto::{self, CryptoError, EncryptedData};
use crate::utils::Database;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("Credential storage error: {0}")]
    Storage(String),
}

/// Stores provider API keys sealed at rest
#[derive(Clone)]
pub struct CredentialVault {
    repo: ProviderRepository,
}

impl CredentialVault {
    pub fn new(db: Database) -> Self {
        Self {
            repo: ProviderRepository::new(db),
        }
    }

    /// Seal and store an API key for a provider (replaces any existing key)
    pub fn store_credential(&self, provider_id: &str, api_key: &str) -> Result<(), VaultError> {
        let sealed = crypto::encrypt(api_key)?;
        self.repo
            .store_api_key(provider_id, &sealed.ciphertext, &sealed.nonce)
            .map_err(VaultError::Storage)
    }

    /// Load and unseal the API key for a provider
    pub fn load_credential(&self, provider_id: &str) -> Result<Option<String>, VaultError> {
        let sealed = self
            .repo
            .get_api_key(provider_id)
            .map_err(VaultError::Storage)?;

        match sealed {
            Some((ciphertext, nonce)) => {
                let plaintext = crypto::decrypt(&EncryptedData { nonce, ciphertext })?;
                Ok(Some(plaintext))
            }
            None => Ok(None),
        }
    }

    /// Remove the stored API key for a provider
    pub fn delete_credential(&self, provider_id: &str) -> Result<bool, VaultError> {
        self.repo.delete_api_key(provider_id).map_err(VaultError::Storage)
    }

    /// Check whether a provider has a stored API key
    pub fn has_credential(&self, provider_id: &str) -> Result<bool, VaultError> {
        self.repo.has_api_key(provider_id).map_err(VaultError::Storage)
    }
}
