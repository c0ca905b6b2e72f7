//! [`CoreSession`]: the `LogCore` handle every store hands out.

use std::sync::Arc;

use concord_core::errors::{StorageError, StorageResult};
use concord_core::keys::CoreKey;
use concord_core::traits::{CoreKind, CoreOptions, LogCore};

use crate::backend::RawBackend;
use crate::cipher::BlockCipher;

/// A session on one core of a [`RawBackend`], encrypting blocks at rest
/// when the base carries an encryption key.
#[derive(Debug, Clone)]
pub struct CoreSession {
    key: CoreKey,
    kind: CoreKind,
    backend: Arc<dyn RawBackend>,
    cipher: Option<BlockCipher>,
}

impl CoreSession {
    pub fn open(
        backend: Arc<dyn RawBackend>,
        key: &CoreKey,
        options: &CoreOptions,
    ) -> StorageResult<Self> {
        backend.ensure_core(key, options.kind)?;
        Ok(Self {
            key: *key,
            kind: options.kind,
            cipher: options
                .encryption_key
                .as_ref()
                .map(|base| BlockCipher::new(base, key)),
            backend,
        })
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    fn seal(&self, index: u64, plaintext: &[u8]) -> Vec<u8> {
        match &self.cipher {
            Some(cipher) => cipher.encrypt(index, plaintext),
            None => plaintext.to_vec(),
        }
    }

    fn open_block(&self, index: u64, raw: Vec<u8>) -> StorageResult<Vec<u8>> {
        match &self.cipher {
            Some(cipher) => cipher.decrypt(index, &raw).ok_or_else(|| StorageError::Decrypt {
                key: self.key.short(),
                index,
            }),
            None => Ok(raw),
        }
    }

    fn local_length_or_zero(&self) -> u64 {
        match self.backend.local_length(&self.key) {
            Ok(length) => length,
            Err(e) => {
                tracing::warn!(core = %self.key.short(), error = %e, "failed to read core length");
                0
            }
        }
    }
}

impl LogCore for CoreSession {
    fn key(&self) -> CoreKey {
        self.key
    }

    fn kind(&self) -> CoreKind {
        self.kind
    }

    fn length(&self) -> u64 {
        self.local_length_or_zero()
    }

    fn signed_length(&self) -> u64 {
        let remote = self.backend.remote_length(&self.key).unwrap_or(0);
        self.local_length_or_zero().max(remote)
    }

    fn get(&self, index: u64) -> StorageResult<Option<Vec<u8>>> {
        let raw = match self.backend.read_local(&self.key, index)? {
            Some(raw) => Some(raw),
            None => self.backend.read_remote(&self.key, index)?,
        };
        raw.map(|raw| self.open_block(index, raw)).transpose()
    }

    fn append(&self, values: &[Vec<u8>]) -> StorageResult<u64> {
        let start = self.backend.local_length(&self.key)?;
        let blocks = values
            .iter()
            .enumerate()
            .map(|(i, v)| self.seal(start + i as u64, v))
            .collect();
        self.backend.append_local(&self.key, blocks)
    }

    fn truncate(&self, length: u64) -> StorageResult<()> {
        self.backend.truncate_local(&self.key, length)
    }

    fn copy_prologue(&self, source: &dyn LogCore, length: u64) -> StorageResult<()> {
        let mut blocks = Vec::with_capacity(length as usize);
        for index in 0..length {
            let block = source.get(index)?.ok_or_else(|| StorageError::BlockUnavailable {
                key: source.key().short(),
                index,
            })?;
            blocks.push(self.seal(index, &block));
        }
        tracing::debug!(
            from = %source.key().short(),
            to = %self.key.short(),
            length,
            "copied prologue"
        );
        self.backend.replace_local(&self.key, blocks)
    }

    fn checkout(&self, length: u64) -> StorageResult<()> {
        if self.backend.local_length(&self.key)? == length {
            return Ok(());
        }
        self.backend.adopt_remote(&self.key, length)
    }

    fn session(&self) -> Arc<dyn LogCore> {
        Arc::new(self.clone())
    }

    fn get_user_data(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.backend.get_user_data(&self.key, key)
    }

    fn set_user_data(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.backend.set_user_data(&self.key, key, value)
    }
}
