use std::fs::{self, File};
use std::io::Write;
use std::str::FromStr;

use clap::Parser;

mod cli;

use cli::{CliArgs, Command};
use polysigner::backend::SignerBackend;
use polysigner::error::SignerError;
use polysigner::storage::FileStore;
use polysigner::types::ChainId;

fn main() -> Result<(), SignerError> {
    env_logger::init();

    let args = CliArgs::parse();
    log::debug!("parsed arguments: {:?}", args);

    let backend = SignerBackend::new(FileStore::new(args.store_dir.clone()));

    match args.command {
        Command::DeriveWallet { chain } => {
            let chain = ChainId::from_str(&chain)?;
            let wallet = backend.create_wallet(chain)?;
            println!("{}", wallet.public_key);
        }
        Command::ListWallets { chain } => {
            let chain = ChainId::from_str(&chain)?;
            for address in backend.list_wallets(chain)? {
                println!("{address}");
            }
        }
        Command::Sign {
            chain,
            address,
            payload_file,
            output_file,
        } => {
            let chain = ChainId::from_str(&chain)?;
            let payload = fs::read_to_string(&payload_file).map_err(|e| {
                log::error!("failed to read payload file {:?}", payload_file);
                SignerError::Io(e)
            })?;

            let signed = backend.sign_transaction(chain, &address, &payload)?;
            log::info!("signed transaction hex: {signed}");
            println!("{signed}");

            if let Some(path) = output_file {
                let mut file = File::create(&path)?;
                file.write_all(signed.as_bytes())?;
                log::info!("wrote signed transaction to {:?}", path);
            }
        }
    }

    Ok(())
}
