//! Wallet derivation and signed-transaction construction for multiple chain
//! families behind a single adapter contract: UTXO-style building and
//! multi-script-type signing for Bitcoin mainnet/testnet, nonce/gas legacy
//! transactions with EIP-155 replay protection for Ethereum.

pub mod adapter;
pub mod backend;
pub mod btc_adapter;
pub mod btc_estimator;
pub mod error;
pub mod eth_adapter;
pub mod storage;
pub mod types;
