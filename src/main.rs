use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use structopt::StructOpt;

use zkt_migrator::chain::{ChainBackend, ChainConfig, GenesisConfig};
use zkt_migrator::config::Config;
use zkt_migrator::init_logger;
use zkt_migrator::migration::{MigrationError, StateMigrator};
use zkt_migrator::storage::{BlockStore, KVStore, RocksDBStore, StateChangesStore};

#[derive(Debug, StructOpt)]
#[structopt(name = "zkt-migrator", about = "Migrates ZK trie state to a Merkle Patricia Trie")]
struct Opt {
    /// Configuration file
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Log level, overrides the configuration
    #[structopt(long)]
    log_level: Option<String>,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Run the migration service until ctrl-c
    Run,
    /// Bulk migrate and validate, then catch up to the safe block
    Migrate,
    /// Validate the whole migrated state
    Validate,
    /// Print the migration checkpoint
    Status,
    /// Switch the chain to the MPT from the given block on
    Finalize {
        #[structopt(long)]
        block: u64,
    },
}

fn load_config(opt: &Opt) -> Config {
    match &opt.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load configuration from {:?}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    }
}

fn exit_on_error(e: MigrationError) -> ! {
    error!("{}", e);
    std::process::exit(if e.is_fatal() { 2 } else { 1 });
}

#[tokio::main]
async fn main() {
    let opt = Opt::from_args();
    let config = load_config(&opt);
    init_logger(opt.log_level.as_deref().unwrap_or(&config.node.log_level));

    let data_dir = &config.node.data_dir;
    if let Err(e) = std::fs::create_dir_all(data_dir) {
        error!("Failed to create data directory {:?}: {}", data_dir, e);
        std::process::exit(1);
    }
    let store: Arc<dyn KVStore> = match RocksDBStore::with_options(data_dir, config.storage.to_options()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to open database at {:?}: {}", data_dir, e);
            std::process::exit(1);
        }
    };
    let chain = match BlockStore::new(store.clone(), ChainConfig::default()) {
        Ok(chain) => Arc::new(chain),
        Err(e) => {
            error!("Failed to open block store: {}", e);
            std::process::exit(1);
        }
    };
    let genesis = match &config.node.genesis_path {
        Some(path) => match GenesisConfig::load(path) {
            Ok(genesis) => Some(genesis),
            Err(e) => {
                error!("Failed to load genesis from {:?}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => None,
    };

    let backend: Arc<dyn ChainBackend> = chain.clone();
    let migrator = match StateMigrator::new(config.migration.clone(), store.clone(), backend, genesis.as_ref()) {
        Ok(migrator) => migrator,
        Err(e) => exit_on_error(e),
    };

    match opt.cmd {
        Command::Run => {
            if let Err(e) = migrator.start() {
                exit_on_error(e);
            }
            let mut watch = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received ctrl-c");
                        break;
                    }
                    _ = watch.tick() => {
                        if migrator.is_halted() {
                            break;
                        }
                    }
                }
            }
            migrator.stop().await;
            if migrator.is_halted() {
                error!("State migration halted, refusing to continue");
                std::process::exit(2);
            }
        }
        Command::Migrate => {
            let worker = migrator.clone();
            match tokio::task::spawn_blocking(move || worker.migrate_to_safe_block()).await {
                Ok(Ok(number)) => info!("State migrated up to block {}", number),
                Ok(Err(e)) => exit_on_error(e),
                Err(e) => exit_on_error(MigrationError::Task(e.to_string())),
            }
        }
        Command::Validate => {
            let worker = migrator.clone();
            match tokio::task::spawn_blocking(move || worker.validate_migrated()).await {
                Ok(Ok(())) => info!("Migrated state is valid"),
                Ok(Err(e)) => exit_on_error(e),
                Err(e) => exit_on_error(MigrationError::Task(e.to_string())),
            }
        }
        Command::Status => {
            let migrated = migrator.migrated_ref();
            println!("migrated root:   0x{}", hex::encode(migrated.root()));
            println!("migrated block:  {}", migrated.block_number());
            match chain.safe_block() {
                Ok(Some(header)) => println!("safe block:      {}", header.number),
                Ok(None) => println!("safe block:      none"),
                Err(e) => warn!("Failed to read safe block: {}", e),
            }
            match StateChangesStore::new(store.clone()).pending_blocks() {
                Ok(pending) => println!("pending diffs:   {}", pending.len()),
                Err(e) => warn!("Failed to list pending diffs: {}", e),
            }
            let chain_config = chain.chain_config();
            println!(
                "chain config:    version={} zktrie={} mpt_time={:?}",
                chain_config.version, chain_config.zktrie, chain_config.mpt_time
            );
        }
        Command::Finalize { block } => {
            if let Err(e) = migrator.finalize(block).await {
                exit_on_error(e);
            }
            info!("Chain transitioned to MPT at block {}", block);
        }
    }
}
