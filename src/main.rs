mod aggregate;
mod cli;
mod config;
mod kind;
mod materialize;
mod model;
mod reconcile;
mod source;
mod storage;
mod sync;

use std::io;
use std::process;

use tracing_subscriber::EnvFilter;

fn main() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fitsync=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    if let Err(e) = cli::run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
