use clap::Parser;
use ehash_kv::consts::{BLOCK_SIZE, DEFAULT_GLOBAL_DEPTH};
use ehash_kv::repl::run_repl;
use ehash_kv::server::{run_server, DEFAULT_ADDR};
use ehash_kv::setup::{default_config, DEFAULT_DB_FILE};
use ehash_kv::stdin::process_from_stdin;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Key/value store on an extendible hash index.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Interactive prompt instead of reading commands from stdin
    #[arg(long, conflicts_with = "server")]
    repl: bool,

    /// Serve commands over TCP on this address
    #[arg(long, value_name = "ADDR", num_args = 0..=1, default_missing_value = DEFAULT_ADDR)]
    server: Option<String>,

    /// Data file; the index files are created next to it
    #[arg(long, default_value = DEFAULT_DB_FILE)]
    dataset: PathBuf,

    #[arg(long, default_value_t = BLOCK_SIZE)]
    block_size: usize,

    /// Hash bits the directory may use (1-64)
    #[arg(long, default_value_t = DEFAULT_GLOBAL_DEPTH)]
    global_depth: u8,
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ehash_kv=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = default_config(args.dataset)
        .with_block_size(args.block_size)
        .with_global_depth(args.global_depth);

    let result = if let Some(addr) = args.server {
        run_server(config, &addr).await
    } else if args.repl {
        run_repl(config).await
    } else {
        process_from_stdin(config).await
    };

    if let Err(err) = result {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
    // stdin may still be held by a blocking read
    std::process::exit(0);
}
