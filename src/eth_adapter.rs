use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::primitives::{Address, Bytes, TxKind, U256};
use alloy::signers::local::PrivateKeySigner;
use serde::{Deserialize, Serialize};

use crate::adapter::BlockchainAdapter;
use crate::error::SignerError;
use crate::types::Wallet;

/// Gas limit for a plain value transfer.
const DEFAULT_GAS_LIMIT: u64 = 21_000;
/// 20 gwei.
const DEFAULT_GAS_PRICE: u64 = 20_000_000_000;

#[derive(Debug, Serialize, Deserialize)]
pub struct EthPayload {
    #[serde(rename = "chainId", default)]
    pub chain_id: u64,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub value: u64,
    #[serde(default)]
    pub data: String,
    #[serde(rename = "gas", default)]
    pub gas_limit: u64,
    #[serde(rename = "gasPrice", default)]
    pub gas_price: u64,
    #[serde(default)]
    pub nonce: u64,
}

/// Account-chain adapter. Assembles legacy transactions priced by the
/// caller-supplied nonce/gas fields and signs them with the payload's chain
/// id bound for replay protection.
#[derive(Default)]
pub struct EthAdapter;

impl EthAdapter {
    pub fn new() -> Self {
        Self
    }

    fn validate_payload(&self, payload_json: &str) -> Result<EthPayload, SignerError> {
        let mut payload: EthPayload =
            serde_json::from_str(payload_json).map_err(SignerError::InvalidPayload)?;

        if payload.to.is_empty() {
            return Err(SignerError::MissingField("to"));
        }
        // Defaults apply only when the supplied value is the zero value.
        if payload.gas_limit == 0 {
            payload.gas_limit = DEFAULT_GAS_LIMIT;
        }
        if payload.gas_price == 0 {
            payload.gas_price = DEFAULT_GAS_PRICE;
        }

        Ok(payload)
    }
}

impl BlockchainAdapter for EthAdapter {
    fn derive_wallet(&self) -> Result<Wallet, SignerError> {
        let signer = PrivateKeySigner::random();
        let address = signer.address();

        log::info!("derived new eth wallet: {address}");
        Ok(Wallet {
            public_key: address.to_string(),
            private_key: hex::encode(signer.to_bytes()),
        })
    }

    fn create_signed_transaction(
        &self,
        wallet: &Wallet,
        payload_json: &str,
    ) -> Result<String, SignerError> {
        let payload = self.validate_payload(payload_json)?;

        let signer: PrivateKeySigner = wallet
            .private_key
            .parse()
            .map_err(|e: alloy::signers::local::LocalSignerError| {
                SignerError::InvalidKey(e.to_string())
            })?;

        let to: Address = payload.to.parse().map_err(|e| SignerError::InvalidField {
            field: "to",
            reason: format!("{e}"),
        })?;

        let data = if payload.data.is_empty() {
            Vec::new()
        } else {
            let raw = payload.data.strip_prefix("0x").unwrap_or(&payload.data);
            hex::decode(raw).map_err(|e| SignerError::InvalidField {
                field: "data",
                reason: e.to_string(),
            })?
        };

        let mut tx = TxLegacy {
            chain_id: Some(payload.chain_id),
            nonce: payload.nonce,
            gas_price: u128::from(payload.gas_price),
            gas_limit: payload.gas_limit,
            to: TxKind::Call(to),
            value: U256::from(payload.value),
            input: Bytes::from(data),
        };

        let signature = signer
            .sign_transaction_sync(&mut tx)
            .map_err(|e| SignerError::SigningFailure(e.to_string()))?;
        let signed = tx.into_signed(signature);

        Ok(hex::encode(TxEnvelope::Legacy(signed).encoded_2718()))
    }
}
