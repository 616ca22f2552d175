use anyhow::Result;
use beet_bot::{init_tracing, run_bot, Cli};
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run_bot(cli.runtime_config()).await
}
