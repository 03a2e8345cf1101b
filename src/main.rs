mod backup;
mod cli;
mod config;
mod database;
mod error;
mod log;
mod storage;

use clap::Parser;
use cli::Cli;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    let args = Cli::parse();
    log::init(args.verbose);

    info!("dbvault {} starting", env!("CARGO_PKG_VERSION"));

    let interrupts = Arc::new(AtomicUsize::new(0));
    let interrupts_clone = interrupts.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        let count = interrupts_clone.fetch_add(1, Ordering::SeqCst);

        if count == 0 {
            eprintln!("\nInterrupt received. Running backups will finish; press Ctrl+C again to force exit...");
        } else {
            eprintln!("\nForce exiting...");
            std::process::exit(130);
        }
    }) {
        warn!("Could not install Ctrl-C handler: {}", e);
    }

    match cli::run(args, interrupts).await {
        Ok(true) => {
            info!("Finished");
        }
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
