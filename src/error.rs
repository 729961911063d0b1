use bitcoin::Network;
use bitcoin::key::FromWifError;
use thiserror::Error;

use crate::types::ScriptType;

/// Every failure is terminal for the request; nothing is retried internally
/// and no partially signed transaction is ever returned.
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("failed to decode payload: {0}")]
    InvalidPayload(#[source] serde_json::Error),

    #[error("payload must contain '{0}' field")]
    MissingField(&'static str),

    #[error("unsupported chain type: {0}")]
    UnsupportedChain(String),

    #[error("unsupported script type: {0}")]
    UnsupportedScriptType(String),

    #[error("{subject} is not valid for network {network}")]
    NetworkMismatch {
        subject: &'static str,
        network: Network,
    },

    #[error("UTXO {index}: scriptPubKey does not match the wallet's {expected} script")]
    ScriptMismatch { index: usize, expected: ScriptType },

    #[error("insufficient funds: total {total} sats, amount {amount} sats, fee {fee} sats")]
    InsufficientFunds { total: i64, amount: i64, fee: i64 },

    #[error("amount to send must be positive")]
    NonPositiveAmount,

    #[error("failed to decode WIF private key: {0}")]
    Wif(#[from] FromWifError),

    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("invalid '{field}' field: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },

    #[error("sighash computation failed for input {index}: {reason}")]
    Sighash { index: usize, reason: String },

    #[error("signing failed: {0}")]
    SigningFailure(String),

    #[error("encoding failed: {0}")]
    EncodingFailure(String),

    #[error("no wallet found for address: {0}")]
    WalletNotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
