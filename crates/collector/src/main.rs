use anyhow::Result;
use clap::Parser;

use unitledger::cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let binary_name = env!("CARGO_BIN_NAME").replace('-', "_");
    let default_filter = format!("{binary_name}=info");
    unitledger_common::logging::init_logging(&args.verbosity, &binary_name, &default_filter)?;

    args.run().await
}
