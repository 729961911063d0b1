use bitcoin::Network;

use crate::btc_adapter::BtcAdapter;
use crate::error::SignerError;
use crate::eth_adapter::EthAdapter;
use crate::types::{ChainId, Wallet};

/// Capability set every chain adapter implements. Adapters hold no state
/// beyond the network parameters fixed at construction, so one is built per
/// request and discarded.
pub trait BlockchainAdapter {
    /// Generates a fresh keypair in the chain's native encoding.
    fn derive_wallet(&self) -> Result<Wallet, SignerError>;

    /// Validates `payload_json`, builds the chain-specific transaction, signs
    /// it with the wallet's key and returns the serialized transaction as a
    /// lowercase hex string.
    fn create_signed_transaction(
        &self,
        wallet: &Wallet,
        payload_json: &str,
    ) -> Result<String, SignerError>;
}

/// Constructs the adapter for a chain. The variant set is closed, so the
/// lookup itself cannot fail; unknown identifiers are already rejected when
/// the string id is parsed into a [`ChainId`].
pub fn select_adapter(chain: ChainId) -> Box<dyn BlockchainAdapter> {
    match chain {
        ChainId::Eth => Box::new(EthAdapter::new()),
        ChainId::Btc => Box::new(BtcAdapter::new(Network::Bitcoin)),
        ChainId::BtcTestnet => Box::new(BtcAdapter::new(Network::Testnet)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SUPPORTED_CHAINS;

    #[test]
    fn every_chain_derives_a_wallet_in_its_native_encoding() {
        for chain in SUPPORTED_CHAINS {
            let wallet = select_adapter(chain).derive_wallet().unwrap();
            let expected_prefix = match chain {
                ChainId::Eth => "0x",
                ChainId::Btc => "bc1",
                ChainId::BtcTestnet => "tb1",
            };
            assert!(
                wallet.public_key.starts_with(expected_prefix),
                "{chain}: {}",
                wallet.public_key
            );
        }
    }
}
