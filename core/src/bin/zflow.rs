//! Zflow CLI
//!
//! Parses, inspects and dry-runs Zflow scripts against the built-in echo
//! provider.

use zodel_core::cli;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::run_cli().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
