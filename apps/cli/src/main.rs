//! awardsearch CLI: answer questions about award programs.
//!
//! Plans a query, retrieves the relevant program pages (from the freshness
//! cache when possible), and prints a synthesized answer with citations.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
