use std::fmt;
use std::str::FromStr;

use bitcoin::Script;
use serde::{Deserialize, Serialize};

use crate::error::SignerError;

/// Chain identifiers accepted by the adapter registry. The set is closed;
/// anything else is rejected before an adapter is constructed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ChainId {
    Eth,
    Btc,
    BtcTestnet,
}

pub const SUPPORTED_CHAINS: [ChainId; 3] = [ChainId::Eth, ChainId::Btc, ChainId::BtcTestnet];

impl ChainId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainId::Eth => "eth",
            ChainId::Btc => "btc",
            ChainId::BtcTestnet => "tbtc",
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainId {
    type Err = SignerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eth" => Ok(ChainId::Eth),
            "btc" => Ok(ChainId::Btc),
            "tbtc" => Ok(ChainId::BtcTestnet),
            other => Err(SignerError::UnsupportedChain(other.to_string())),
        }
    }
}

/// A derived keypair in its chain-native encoding: WIF + bech32 address for
/// the UTXO chains, raw hex key + checksummed address for the account chain.
/// Created once, persisted by the storage collaborator, read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub public_key: String,
    pub private_key: String,
}

/// The output script kinds this signer can spend and pay to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ScriptType {
    P2PKH,
    P2WPKH,
}

impl ScriptType {
    /// Classifies a scriptPubKey; anything other than the two supported
    /// kinds is rejected.
    pub fn from_script(script: &Script) -> Result<Self, SignerError> {
        if script.is_p2pkh() {
            Ok(ScriptType::P2PKH)
        } else if script.is_p2wpkh() {
            Ok(ScriptType::P2WPKH)
        } else {
            Err(SignerError::UnsupportedScriptType(script.to_hex_string()))
        }
    }

    /// Parses the wire name carried in UTXO payloads.
    pub fn from_wire(name: &str) -> Result<Self, SignerError> {
        match name {
            "p2pkh" => Ok(ScriptType::P2PKH),
            "v0_p2wpkh" => Ok(ScriptType::P2WPKH),
            other => Err(SignerError::UnsupportedScriptType(other.to_string())),
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            ScriptType::P2PKH => "p2pkh",
            ScriptType::P2WPKH => "v0_p2wpkh",
        }
    }
}

impl fmt::Display for ScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}
