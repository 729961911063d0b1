use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Directory holding the wallet store
    #[clap(short, long, value_parser, default_value = "wallet-store")]
    pub store_dir: PathBuf,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Derive a fresh wallet for a chain and persist it
    DeriveWallet {
        /// Chain identifier ("eth", "btc" or "tbtc")
        #[clap(short, long)]
        chain: String,
    },
    /// List stored wallet addresses for a chain
    ListWallets {
        /// Chain identifier ("eth", "btc" or "tbtc")
        #[clap(short, long)]
        chain: String,
    },
    /// Sign a transaction payload with a stored wallet
    Sign {
        /// Chain identifier ("eth", "btc" or "tbtc")
        #[clap(short, long)]
        chain: String,

        /// Address of the stored wallet to sign with
        #[clap(short, long)]
        address: String,

        /// Path to the chain-specific JSON transaction payload
        #[clap(short, long)]
        payload_file: PathBuf,

        /// Optional file to write the signed transaction hex to
        #[clap(short, long)]
        output_file: Option<PathBuf>,
    },
}
