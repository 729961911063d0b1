use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::RwLock;

use crate::error::SignerError;
use crate::types::ChainId;

/// Storage key for a wallet record: one namespace per chain, one entry per
/// address. Key uniqueness is what guarantees no two wallets share a public
/// key within a chain.
pub fn wallet_path(chain: ChainId, address: &str) -> String {
    format!("wallets/{chain}/{address}")
}

/// The storage collaborator consumed by the signer. Implementations own any
/// locking or transaction discipline; the signer only reads a wallet before
/// signing and writes one once on derivation.
pub trait WalletStore {
    /// Returns the stored bytes, or `None` when the key has never been
    /// written.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SignerError>;

    fn put(&self, key: &str, value: Vec<u8>) -> Result<(), SignerError>;

    /// Returns the entry names directly under `prefix`, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>, SignerError>;
}

/// Directory-backed store: one file per key, nested per namespace.
pub struct FileStore {
    base_dir: PathBuf,
}

impl FileStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(key)
    }
}

impl WalletStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SignerError> {
        match fs::read(self.entry_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SignerError::Storage(e.to_string())),
        }
    }

    fn put(&self, key: &str, value: Vec<u8>) -> Result<(), SignerError> {
        let path = self.entry_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| SignerError::Storage(e.to_string()))?;
        }

        // Write to a temp file and rename so a torn write never leaves a
        // partial record behind.
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &value).map_err(|e| SignerError::Storage(e.to_string()))?;
        fs::rename(&temp_path, &path).map_err(|e| SignerError::Storage(e.to_string()))?;

        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, SignerError> {
        let dir = self.entry_path(prefix.trim_end_matches('/'));
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SignerError::Storage(e.to_string())),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| SignerError::Storage(e.to_string()))?;
            let path = entry.path();
            if !path.is_file() || path.extension().is_some_and(|ext| ext == "tmp") {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// In-memory store for tests and embedding.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WalletStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SignerError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| SignerError::Storage("wallet store lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: Vec<u8>) -> Result<(), SignerError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| SignerError::Storage("wallet store lock poisoned".to_string()))?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, SignerError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| SignerError::Storage("wallet store lock poisoned".to_string()))?;
        let mut names: Vec<String> = entries
            .keys()
            .filter_map(|key| key.strip_prefix(prefix))
            .filter(|name| !name.is_empty() && !name.contains('/'))
            .map(str::to_string)
            .collect();
        names.sort();
        Ok(names)
    }
}
