use clap::Parser;
use dotenv::dotenv;

mod cli;
mod config;
mod db;
mod deploy;
mod models;
mod networks;
mod wallet;
mod web3;

use cli::Cli;
use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    cli.apply_overrides(&mut config);

    log::debug!(
        "[main] database={} network={} migrations={}",
        config.database_url,
        config.network,
        config.migrations_dir.display()
    );

    cli::dispatch(cli, &config).await
}
