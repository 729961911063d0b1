use std::str::FromStr;

use bitcoin::address::NetworkUnchecked;
use bitcoin::consensus::encode;
use bitcoin::hashes::Hash;
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::secp256k1::{Message, Secp256k1, SecretKey, rand};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{
    Address, Amount, CompressedPublicKey, Network, NetworkKind, OutPoint, PrivateKey, ScriptBuf,
    Sequence, Transaction, TxIn, TxOut, Txid, Witness, absolute::LockTime, transaction::Version,
};
use serde::{Deserialize, Serialize};

use crate::adapter::BlockchainAdapter;
use crate::btc_estimator::{DUST_THRESHOLD_SATS, estimate_fee};
use crate::error::SignerError;
use crate::types::{ScriptType, Wallet};

/// One unspent output as supplied by the caller. Every UTXO in a payload is
/// consumed; there is no coin selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utxo {
    #[serde(default)]
    pub txid: String,
    #[serde(default)]
    pub value: i64,
    #[serde(default)]
    pub script_pub_key: String,
    #[serde(default)]
    pub script_pubkey_type: String,
    #[serde(default)]
    pub vout: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BtcPayload {
    #[serde(default)]
    pub recipient: String,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub fee_rate: f64,
    #[serde(default)]
    pub utxos: Vec<Utxo>,
}

/// UTXO-chain adapter. Stateless apart from the network parameters fixed at
/// construction; every address and key decoded during a request is validated
/// against that network.
pub struct BtcAdapter {
    network: Network,
}

impl BtcAdapter {
    pub fn new(network: Network) -> Self {
        Self { network }
    }

    fn validate_payload(&self, payload_json: &str) -> Result<BtcPayload, SignerError> {
        let payload: BtcPayload =
            serde_json::from_str(payload_json).map_err(SignerError::InvalidPayload)?;

        if !payload.fee_rate.is_finite() || payload.fee_rate < 0.0 {
            return Err(SignerError::InvalidField {
                field: "fee_rate",
                reason: format!("must be a finite non-negative rate, got {}", payload.fee_rate),
            });
        }

        Ok(payload)
    }

    /// Change always pays back to the wallet's own witness program, on the
    /// network this adapter was constructed with.
    fn change_address(&self, public_key: &CompressedPublicKey) -> Address {
        Address::p2wpkh(public_key, self.network)
    }

    fn build_signed_tx(
        &self,
        private_key: &PrivateKey,
        payload: &BtcPayload,
    ) -> Result<Transaction, SignerError> {
        let secp = Secp256k1::new();
        let public_key = private_key.public_key(&secp);
        let compressed = CompressedPublicKey::from_private_key(&secp, private_key)
            .map_err(|e| SignerError::InvalidKey(e.to_string()))?;

        // The scripts this wallet can spend, one per supported type. Every
        // supplied UTXO must match one of them exactly.
        let wallet_p2wpkh = ScriptBuf::new_p2wpkh(&compressed.wpubkey_hash());
        let wallet_p2pkh = ScriptBuf::new_p2pkh(&public_key.pubkey_hash());

        let recipient: Address<NetworkUnchecked> = payload.recipient.parse().map_err(
            |e: bitcoin::address::ParseError| SignerError::InvalidField {
                field: "recipient",
                reason: e.to_string(),
            },
        )?;
        if !recipient.is_valid_for_network(self.network) {
            return Err(SignerError::NetworkMismatch {
                subject: "destination address",
                network: self.network,
            });
        }
        let recipient = recipient.assume_checked();
        let destination_script = recipient.script_pubkey();
        let dest_type = ScriptType::from_script(&destination_script)?;

        let change_address = self.change_address(&compressed);
        if !change_address
            .as_unchecked()
            .is_valid_for_network(self.network)
        {
            return Err(SignerError::NetworkMismatch {
                subject: "change address",
                network: self.network,
            });
        }
        let change_script = change_address.script_pubkey();

        let mut inputs = Vec::with_capacity(payload.utxos.len());
        let mut prev_outs = Vec::with_capacity(payload.utxos.len());
        let mut input_types = Vec::with_capacity(payload.utxos.len());
        let mut total_input_value: i64 = 0;

        for (index, utxo) in payload.utxos.iter().enumerate() {
            let script_type = ScriptType::from_wire(&utxo.script_pubkey_type)?;

            let script_bytes =
                hex::decode(&utxo.script_pub_key).map_err(|e| SignerError::InvalidField {
                    field: "script_pub_key",
                    reason: format!("utxo {index}: {e}"),
                })?;
            let script_pubkey = ScriptBuf::from_bytes(script_bytes);

            let expected = match script_type {
                ScriptType::P2WPKH => &wallet_p2wpkh,
                ScriptType::P2PKH => &wallet_p2pkh,
            };
            if script_pubkey != *expected {
                return Err(SignerError::ScriptMismatch {
                    index,
                    expected: script_type,
                });
            }

            let txid = Txid::from_str(&utxo.txid).map_err(|e| SignerError::InvalidField {
                field: "txid",
                reason: format!("utxo {index}: {e}"),
            })?;
            let value = u64::try_from(utxo.value).map_err(|_| SignerError::InvalidField {
                field: "value",
                reason: format!("utxo {index}: negative value {}", utxo.value),
            })?;

            inputs.push(TxIn {
                previous_output: OutPoint::new(txid, utxo.vout),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            });
            prev_outs.push(TxOut {
                value: Amount::from_sat(value),
                script_pubkey,
            });
            input_types.push(script_type);
            total_input_value = total_input_value.checked_add(utxo.value).ok_or_else(|| {
                SignerError::InvalidField {
                    field: "value",
                    reason: format!("utxo {index}: total input value overflows"),
                }
            })?;
            log::debug!(
                "input {index}: txid={} vout={} value={} type={script_type}",
                utxo.txid,
                utxo.vout,
                utxo.value
            );
        }

        let estimate = estimate_fee(
            dest_type,
            &input_types,
            payload.amount,
            total_input_value,
            payload.fee_rate,
        )?;

        if payload.amount <= 0 {
            return Err(SignerError::NonPositiveAmount);
        }
        let change_value = total_input_value - payload.amount - estimate.estimated_fee;
        if change_value < 0 {
            return Err(SignerError::InsufficientFunds {
                total: total_input_value,
                amount: payload.amount,
                fee: estimate.estimated_fee,
            });
        }

        let mut outputs = vec![TxOut {
            value: Amount::from_sat(payload.amount as u64),
            script_pubkey: destination_script,
        }];
        if change_value >= DUST_THRESHOLD_SATS {
            log::debug!("change output: {change_value} sats to {change_address}");
            outputs.push(TxOut {
                value: Amount::from_sat(change_value as u64),
                script_pubkey: change_script,
            });
        } else if change_value > 0 {
            log::debug!(
                "change {change_value} sats is below the {DUST_THRESHOLD_SATS} sat dust threshold, folded into the fee"
            );
        }

        let mut tx = Transaction {
            version: Version::ONE,
            lock_time: LockTime::ZERO,
            input: inputs,
            output: outputs,
        };

        // Sighash pass first; signatures are applied once the cache releases
        // its borrow of the transaction.
        let mut sighashes = Vec::with_capacity(tx.input.len());
        {
            let mut cache = SighashCache::new(&mut tx);
            for (index, prev_out) in prev_outs.iter().enumerate() {
                let message = match input_types[index] {
                    ScriptType::P2WPKH => {
                        let sighash = cache
                            .p2wpkh_signature_hash(
                                index,
                                &prev_out.script_pubkey,
                                prev_out.value,
                                EcdsaSighashType::All,
                            )
                            .map_err(|e| SignerError::Sighash {
                                index,
                                reason: e.to_string(),
                            })?;
                        Message::from_digest(sighash.to_byte_array())
                    }
                    ScriptType::P2PKH => {
                        let sighash = cache
                            .legacy_signature_hash(
                                index,
                                &prev_out.script_pubkey,
                                EcdsaSighashType::All.to_u32(),
                            )
                            .map_err(|e| SignerError::Sighash {
                                index,
                                reason: e.to_string(),
                            })?;
                        Message::from_digest(sighash.to_byte_array())
                    }
                };
                sighashes.push(message);
            }
        }

        for (index, message) in sighashes.into_iter().enumerate() {
            let signature = bitcoin::ecdsa::Signature {
                signature: secp.sign_ecdsa(&message, &private_key.inner),
                sighash_type: EcdsaSighashType::All,
            };
            match input_types[index] {
                ScriptType::P2WPKH => {
                    tx.input[index].witness = Witness::p2wpkh(&signature, &compressed.0);
                }
                ScriptType::P2PKH => {
                    let sig_push = PushBytesBuf::try_from(signature.to_vec()).map_err(|_| {
                        SignerError::SigningFailure(format!(
                            "signature for input {index} exceeds push limits"
                        ))
                    })?;
                    tx.input[index].script_sig = Builder::new()
                        .push_slice(sig_push)
                        .push_key(&public_key)
                        .into_script();
                }
            }
            log::debug!("signed input {index} ({})", input_types[index]);
        }

        Ok(tx)
    }
}

impl BlockchainAdapter for BtcAdapter {
    fn derive_wallet(&self) -> Result<Wallet, SignerError> {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::new(&mut rand::thread_rng());
        let private_key = PrivateKey::new(secret_key, self.network);
        let public_key = CompressedPublicKey::from_private_key(&secp, &private_key)
            .map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        let address = Address::p2wpkh(&public_key, self.network);

        log::info!("derived new {} wallet: {address}", self.network);
        Ok(Wallet {
            public_key: address.to_string(),
            private_key: private_key.to_wif(),
        })
    }

    fn create_signed_transaction(
        &self,
        wallet: &Wallet,
        payload_json: &str,
    ) -> Result<String, SignerError> {
        let payload = self.validate_payload(payload_json)?;

        let private_key = PrivateKey::from_wif(&wallet.private_key)?;
        if private_key.network != NetworkKind::from(self.network) {
            return Err(SignerError::NetworkMismatch {
                subject: "wallet key",
                network: self.network,
            });
        }

        let tx = self.build_signed_tx(&private_key, &payload)?;
        Ok(encode::serialize_hex(&tx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btc_estimator::FeeEstimate;

    // Valid testnet P2WPKH address, used as a third-party destination.
    const TESTNET_RECIPIENT: &str = "tb1qpn5dddjnc2qwurpsm449l6uvggnjxwsetrnksx";
    const DUMMY_TXID: &str = "0000000000000000000000000000000000000000000000000000000000000000";

    fn testnet_adapter() -> BtcAdapter {
        BtcAdapter::new(Network::Testnet)
    }

    fn wallet_script_hex(wallet: &Wallet, network: Network) -> String {
        let address = wallet
            .public_key
            .parse::<Address<NetworkUnchecked>>()
            .unwrap()
            .require_network(network)
            .unwrap();
        hex::encode(address.script_pubkey().as_bytes())
    }

    fn wallet_p2pkh_script_hex(wallet: &Wallet) -> String {
        let secp = Secp256k1::new();
        let public_key = PrivateKey::from_wif(&wallet.private_key)
            .unwrap()
            .public_key(&secp);
        hex::encode(ScriptBuf::new_p2pkh(&public_key.pubkey_hash()).as_bytes())
    }

    fn utxo(script_hex: &str, script_type: &str, value: i64) -> Utxo {
        Utxo {
            txid: DUMMY_TXID.to_string(),
            value,
            script_pub_key: script_hex.to_string(),
            script_pubkey_type: script_type.to_string(),
            vout: 0,
        }
    }

    fn sign(adapter: &BtcAdapter, wallet: &Wallet, payload: &BtcPayload) -> Result<Transaction, SignerError> {
        let payload_json = serde_json::to_string(payload).unwrap();
        let signed_hex = adapter.create_signed_transaction(wallet, &payload_json)?;
        Ok(encode::deserialize(&hex::decode(&signed_hex).unwrap()).unwrap())
    }

    #[test]
    fn derived_wallet_round_trips_through_script_derivation() {
        let adapter = testnet_adapter();
        let wallet = adapter.derive_wallet().unwrap();
        assert!(wallet.public_key.starts_with("tb1"));

        let secp = Secp256k1::new();
        let private_key = PrivateKey::from_wif(&wallet.private_key).unwrap();
        let compressed = CompressedPublicKey::from_private_key(&secp, &private_key).unwrap();

        let address = wallet
            .public_key
            .parse::<Address<NetworkUnchecked>>()
            .unwrap()
            .require_network(Network::Testnet)
            .unwrap();
        assert_eq!(
            address.script_pubkey(),
            ScriptBuf::new_p2wpkh(&compressed.wpubkey_hash())
        );
    }

    #[test]
    fn signs_single_p2wpkh_input_with_change() {
        let adapter = testnet_adapter();
        let wallet = adapter.derive_wallet().unwrap();
        let script_hex = wallet_script_hex(&wallet, Network::Testnet);

        let payload = BtcPayload {
            recipient: TESTNET_RECIPIENT.to_string(),
            amount: 500_000,
            fee_rate: 10.0,
            utxos: vec![utxo(&script_hex, "v0_p2wpkh", 1_000_000)],
        };
        let tx = sign(&adapter, &wallet, &payload).unwrap();

        assert_eq!(tx.input.len(), 1);
        let witness = tx.input[0].witness.to_vec();
        assert_eq!(witness.len(), 2);
        assert_eq!(*witness[0].last().unwrap(), EcdsaSighashType::All as u8);
        assert_eq!(witness[1].len(), 33);
        assert!(tx.input[0].script_sig.is_empty());

        // one p2wpkh input, p2wpkh destination plus change: 68+31+31+11 = 141
        // vbytes at 10 sat/vb
        assert_eq!(tx.output.len(), 2);
        assert_eq!(tx.output[0].value, Amount::from_sat(500_000));
        assert_eq!(tx.output[1].value, Amount::from_sat(498_590));

        let outputs: i64 = tx.output.iter().map(|o| o.value.to_sat() as i64).sum();
        assert_eq!(outputs + 1_410, 1_000_000);
    }

    #[test]
    fn signs_mixed_input_types() {
        let adapter = testnet_adapter();
        let wallet = adapter.derive_wallet().unwrap();
        let wpkh_hex = wallet_script_hex(&wallet, Network::Testnet);
        let pkh_hex = wallet_p2pkh_script_hex(&wallet);

        let mut payload = BtcPayload {
            recipient: TESTNET_RECIPIENT.to_string(),
            amount: 120_000,
            fee_rate: 1.0,
            utxos: vec![
                utxo(&pkh_hex, "p2pkh", 100_000),
                utxo(&wpkh_hex, "v0_p2wpkh", 100_000),
            ],
        };
        payload.utxos[1].vout = 1;
        let tx = sign(&adapter, &wallet, &payload).unwrap();

        assert_eq!(tx.input.len(), 2);
        // legacy input carries a scriptSig, segwit input a witness
        assert!(!tx.input[0].script_sig.is_empty());
        assert!(tx.input[0].witness.is_empty());
        assert!(tx.input[1].script_sig.is_empty());
        assert_eq!(tx.input[1].witness.len(), 2);

        // 148 + 68 + 31 + 31 + 11 = 289 vbytes at 1 sat/vb
        assert_eq!(tx.output.len(), 2);
        assert_eq!(tx.output[1].value, Amount::from_sat(79_711));
    }

    #[test]
    fn dust_change_is_folded_into_the_fee() {
        let adapter = testnet_adapter();
        let wallet = adapter.derive_wallet().unwrap();
        let script_hex = wallet_script_hex(&wallet, Network::Testnet);

        // phase-one change of 400 sats is under the dust threshold
        let payload = BtcPayload {
            recipient: TESTNET_RECIPIENT.to_string(),
            amount: 50_000,
            fee_rate: 1.0,
            utxos: vec![utxo(&script_hex, "v0_p2wpkh", 50_510)],
        };
        let tx = sign(&adapter, &wallet, &payload).unwrap();

        assert_eq!(tx.output.len(), 1);
        assert_eq!(tx.output[0].value, Amount::from_sat(50_000));
    }

    #[test]
    fn change_address_tracks_adapter_network() {
        for network in [Network::Bitcoin, Network::Testnet] {
            let adapter = BtcAdapter::new(network);
            let wallet = adapter.derive_wallet().unwrap();

            let secp = Secp256k1::new();
            let private_key = PrivateKey::from_wif(&wallet.private_key).unwrap();
            let compressed = CompressedPublicKey::from_private_key(&secp, &private_key).unwrap();

            let change = adapter.change_address(&compressed);
            assert!(change.as_unchecked().is_valid_for_network(network));
            assert_eq!(change.to_string(), wallet.public_key);
        }
    }

    #[test]
    fn wallet_network_mismatch_is_rejected() {
        let mainnet = BtcAdapter::new(Network::Bitcoin);
        let testnet_wallet = testnet_adapter().derive_wallet().unwrap();
        let script_hex = wallet_script_hex(&testnet_wallet, Network::Testnet);

        let payload = BtcPayload {
            recipient: TESTNET_RECIPIENT.to_string(),
            amount: 10_000,
            fee_rate: 1.0,
            utxos: vec![utxo(&script_hex, "v0_p2wpkh", 100_000)],
        };
        let err = mainnet
            .create_signed_transaction(&testnet_wallet, &serde_json::to_string(&payload).unwrap())
            .unwrap_err();
        assert!(matches!(
            err,
            SignerError::NetworkMismatch {
                subject: "wallet key",
                ..
            }
        ));
    }

    #[test]
    fn destination_network_mismatch_is_rejected() {
        let adapter = testnet_adapter();
        let wallet = adapter.derive_wallet().unwrap();
        let script_hex = wallet_script_hex(&wallet, Network::Testnet);
        let mainnet_recipient = BtcAdapter::new(Network::Bitcoin)
            .derive_wallet()
            .unwrap()
            .public_key;

        let payload = BtcPayload {
            recipient: mainnet_recipient,
            amount: 10_000,
            fee_rate: 1.0,
            utxos: vec![utxo(&script_hex, "v0_p2wpkh", 100_000)],
        };
        let err = sign(&adapter, &wallet, &payload).unwrap_err();
        assert!(matches!(
            err,
            SignerError::NetworkMismatch {
                subject: "destination address",
                ..
            }
        ));
    }

    #[test]
    fn foreign_utxo_script_is_rejected() {
        let adapter = testnet_adapter();
        let wallet = adapter.derive_wallet().unwrap();
        let other_wallet = adapter.derive_wallet().unwrap();
        let foreign_script_hex = wallet_script_hex(&other_wallet, Network::Testnet);

        let payload = BtcPayload {
            recipient: TESTNET_RECIPIENT.to_string(),
            amount: 10_000,
            fee_rate: 1.0,
            utxos: vec![utxo(&foreign_script_hex, "v0_p2wpkh", 100_000)],
        };
        let err = sign(&adapter, &wallet, &payload).unwrap_err();
        assert!(matches!(err, SignerError::ScriptMismatch { index: 0, .. }));
    }

    #[test]
    fn unsupported_script_type_is_rejected() {
        let adapter = testnet_adapter();
        let wallet = adapter.derive_wallet().unwrap();
        let script_hex = wallet_script_hex(&wallet, Network::Testnet);

        let payload = BtcPayload {
            recipient: TESTNET_RECIPIENT.to_string(),
            amount: 10_000,
            fee_rate: 1.0,
            utxos: vec![utxo(&script_hex, "p2tr", 100_000)],
        };
        let err = sign(&adapter, &wallet, &payload).unwrap_err();
        assert!(matches!(err, SignerError::UnsupportedScriptType(s) if s == "p2tr"));
    }

    #[test]
    fn insufficient_funds_is_rejected() {
        let adapter = testnet_adapter();
        let wallet = adapter.derive_wallet().unwrap();
        let script_hex = wallet_script_hex(&wallet, Network::Testnet);

        let payload = BtcPayload {
            recipient: TESTNET_RECIPIENT.to_string(),
            amount: 50_000,
            fee_rate: 1.0,
            utxos: vec![utxo(&script_hex, "v0_p2wpkh", 1_000)],
        };
        let err = sign(&adapter, &wallet, &payload).unwrap_err();
        assert!(matches!(err, SignerError::InsufficientFunds { .. }));
    }

    #[test]
    fn non_positive_amount_is_rejected() {
        let adapter = testnet_adapter();
        let wallet = adapter.derive_wallet().unwrap();
        let script_hex = wallet_script_hex(&wallet, Network::Testnet);

        let payload = BtcPayload {
            recipient: TESTNET_RECIPIENT.to_string(),
            amount: 0,
            fee_rate: 1.0,
            utxos: vec![utxo(&script_hex, "v0_p2wpkh", 100_000)],
        };
        let err = sign(&adapter, &wallet, &payload).unwrap_err();
        assert!(matches!(err, SignerError::NonPositiveAmount));
    }

    #[test]
    fn malformed_payload_is_rejected() {
        let adapter = testnet_adapter();
        let wallet = adapter.derive_wallet().unwrap();
        let err = adapter
            .create_signed_transaction(&wallet, "{not json")
            .unwrap_err();
        assert!(matches!(err, SignerError::InvalidPayload(_)));
    }

    #[test]
    fn negative_fee_rate_is_rejected() {
        let adapter = testnet_adapter();
        let wallet = adapter.derive_wallet().unwrap();
        let err = adapter
            .create_signed_transaction(
                &wallet,
                r#"{"recipient":"x","amount":1,"fee_rate":-1.0,"utxos":[]}"#,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            SignerError::InvalidField {
                field: "fee_rate",
                ..
            }
        ));
    }

    #[test]
    fn signed_transaction_matches_the_estimate() {
        let adapter = testnet_adapter();
        let wallet = adapter.derive_wallet().unwrap();
        let script_hex = wallet_script_hex(&wallet, Network::Testnet);

        let payload = BtcPayload {
            recipient: TESTNET_RECIPIENT.to_string(),
            amount: 500_000,
            fee_rate: 1.0,
            utxos: vec![utxo(&script_hex, "v0_p2wpkh", 1_000_000)],
        };
        let tx = sign(&adapter, &wallet, &payload).unwrap();

        let estimate = estimate_fee(
            ScriptType::P2WPKH,
            &[ScriptType::P2WPKH],
            payload.amount,
            1_000_000,
            payload.fee_rate,
        )
        .unwrap();
        assert_eq!(
            estimate,
            FeeEstimate {
                estimated_fee: 141,
                change_value: 498_859,
                num_outputs: 2,
                tx_size: 141,
            }
        );
        assert_eq!(tx.output.len(), estimate.num_outputs);
        assert_eq!(tx.output[1].value.to_sat() as i64, estimate.change_value);
    }
}
