// Keystone entry point.
//
// Startup sequence:
// 1. Parse the command line
// 2. Load config (copying defaults on first run) and initialize tracing
// 3. Run the selected command; `serve` blocks until Ctrl+C / SIGTERM

use clap::Parser;
use keystone_server::cli::{self, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::run(Cli::parse()).await
}
