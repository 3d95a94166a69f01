//! In-process wallet extension backed by ed25519 keys derived from seed phrases.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use anyhow::Result;
use async_trait::async_trait;
use ed25519_dalek::{Signer as _, SigningKey};
use sha2::{Digest, Sha256};
use shared::domain::{Account, AccountSource, ActorAddress};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

use crate::{Signer, WalletExtension};

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("no wallet extension registered for source {0}")]
    UnknownSource(AccountSource),
    #[error("wallet extension {0} denied access")]
    AccessDenied(AccountSource),
}

pub struct KeypairSigner {
    key: SigningKey,
}

impl KeypairSigner {
    pub fn from_seed_phrase(phrase: &str) -> Self {
        let seed: [u8; 32] = Sha256::digest(phrase.as_bytes()).into();
        Self {
            key: SigningKey::from_bytes(&seed),
        }
    }

    pub fn address(&self) -> ActorAddress {
        ActorAddress::new(format!(
            "0x{}",
            hex::encode(self.key.verifying_key().as_bytes())
        ))
    }
}

impl Signer for KeypairSigner {
    fn public_key(&self) -> Vec<u8> {
        self.key.verifying_key().to_bytes().to_vec()
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        Ok(self.key.sign(message).to_bytes().to_vec())
    }
}

#[derive(Default)]
pub struct DevWalletExtension {
    signers: HashMap<AccountSource, Arc<KeypairSigner>>,
    denied: RwLock<HashSet<AccountSource>>,
}

impl DevWalletExtension {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: impl Into<String>, seed_phrase: &str) -> Self {
        self.signers.insert(
            AccountSource::new(source),
            Arc::new(KeypairSigner::from_seed_phrase(seed_phrase)),
        );
        self
    }

    /// Account whose address matches the signer registered for `source`.
    pub fn account(&self, source: &str, name: &str) -> Option<Account> {
        let source = AccountSource::new(source);
        let signer = self.signers.get(&source)?;
        Some(Account::new(signer.address(), source).with_name(name))
    }

    /// Simulates the user rejecting the extension's access prompt.
    pub async fn deny(&self, source: &AccountSource) {
        self.denied.write().await.insert(source.clone());
    }

    pub async fn allow(&self, source: &AccountSource) {
        self.denied.write().await.remove(source);
    }
}

#[async_trait]
impl WalletExtension for DevWalletExtension {
    async fn signer_from_source(&self, source: &AccountSource) -> Result<Arc<dyn Signer>> {
        if self.denied.read().await.contains(source) {
            return Err(WalletError::AccessDenied(source.clone()).into());
        }
        let signer = self
            .signers
            .get(source)
            .cloned()
            .ok_or_else(|| WalletError::UnknownSource(source.clone()))?;
        info!(source = %source, "wallet: signer resolved");
        Ok(signer)
    }
}
