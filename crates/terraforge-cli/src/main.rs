mod cli;
mod commands;
mod logging;

use clap::Parser;
use cli::Cli;

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.debug, cli.log_file.as_deref())?;
    commands::render::run(cli).await
}
