use crate::adapter::select_adapter;
use crate::error::SignerError;
use crate::storage::{WalletStore, wallet_path};
use crate::types::{ChainId, Wallet};

/// Request-scoped service tying the adapter registry to wallet storage.
/// A wallet is written once on derivation and only ever read afterwards;
/// signing never mutates stored state.
pub struct SignerBackend<S> {
    store: S,
}

impl<S: WalletStore> SignerBackend<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Derives a fresh wallet for `chain` and persists it keyed by address.
    pub fn create_wallet(&self, chain: ChainId) -> Result<Wallet, SignerError> {
        let adapter = select_adapter(chain);
        let wallet = adapter.derive_wallet()?;

        let key = wallet_path(chain, &wallet.public_key);
        let record = serde_json::to_vec(&wallet)
            .map_err(|e| SignerError::EncodingFailure(e.to_string()))?;
        self.store.put(&key, record)?;

        log::info!("stored new wallet at {key}");
        Ok(wallet)
    }

    /// Lists the stored wallet addresses for `chain`.
    pub fn list_wallets(&self, chain: ChainId) -> Result<Vec<String>, SignerError> {
        self.store.list(&format!("wallets/{chain}/"))
    }

    /// Signs `payload_json` with the stored wallet for `address` and returns
    /// the signed transaction hex.
    pub fn sign_transaction(
        &self,
        chain: ChainId,
        address: &str,
        payload_json: &str,
    ) -> Result<String, SignerError> {
        if address.is_empty() {
            return Err(SignerError::MissingField("address"));
        }
        if payload_json.is_empty() {
            return Err(SignerError::MissingField("payload"));
        }

        let key = wallet_path(chain, address);
        let record = self
            .store
            .get(&key)?
            .ok_or_else(|| SignerError::WalletNotFound(address.to_string()))?;
        let wallet: Wallet = serde_json::from_slice(&record)
            .map_err(|e| SignerError::Storage(format!("stored wallet at {key} is corrupt: {e}")))?;

        let adapter = select_adapter(chain);
        adapter.create_signed_transaction(&wallet, payload_json)
    }
}
