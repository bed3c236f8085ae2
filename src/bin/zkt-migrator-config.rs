use log::{error, info};
use std::path::PathBuf;
use structopt::StructOpt;
use zkt_migrator::config::{Config, HasherKind};
use zkt_migrator::init_logger;

#[derive(Debug, StructOpt)]
#[structopt(name = "zkt-migrator-config", about = "zkt-migrator configuration tool")]
struct Opt {
    /// Generate a default configuration
    #[structopt(long)]
    generate: bool,

    /// Output file
    #[structopt(long, parse(from_os_str))]
    output: Option<PathBuf>,

    /// Input file to check and print
    #[structopt(long, parse(from_os_str))]
    input: Option<PathBuf>,

    /// Data directory
    #[structopt(long, parse(from_os_str))]
    data_dir: Option<PathBuf>,

    /// Genesis allocation file
    #[structopt(long, parse(from_os_str))]
    genesis: Option<PathBuf>,

    /// ZK trie hash function (poseidon, keccak)
    #[structopt(long)]
    hasher: Option<String>,

    /// Range workers for account and storage scans
    #[structopt(long)]
    workers: Option<usize>,
}

fn print_config(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(config_str) => println!("{}", config_str),
        Err(e) => {
            error!("Failed to serialize configuration: {}", e);
            std::process::exit(1);
        }
    }
}

fn main() {
    init_logger("info");
    let opt = Opt::from_args();

    if opt.generate {
        let mut config = Config::default();
        if let Some(data_dir) = opt.data_dir {
            config.node.data_dir = data_dir;
        }
        if let Some(genesis) = opt.genesis {
            config.node.genesis_path = Some(genesis);
        }
        if let Some(hasher) = opt.hasher {
            config.migration.hasher = match hasher.as_str() {
                "poseidon" => HasherKind::Poseidon,
                "keccak" => HasherKind::Keccak,
                other => {
                    error!("Unknown hasher: {}", other);
                    std::process::exit(1);
                }
            };
        }
        if let Some(workers) = opt.workers {
            config.migration.num_account_workers = workers;
            config.migration.num_storage_workers = workers;
        }
        if let Err(e) = config.validate() {
            error!("{}", e);
            std::process::exit(1);
        }

        match opt.output {
            Some(output) => match config.save(&output) {
                Ok(()) => info!("Configuration saved to {:?}", output),
                Err(e) => {
                    error!("Failed to save configuration: {}", e);
                    std::process::exit(1);
                }
            },
            None => print_config(&config),
        }
    } else if let Some(input) = opt.input {
        match Config::load(&input) {
            Ok(config) => print_config(&config),
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        let _ = Opt::clap().print_help();
        println!();
    }
}
