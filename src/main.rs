mod addons;
mod app;
mod archive;
mod backup;
mod cancel;
mod cli;
mod config;
mod digest;
mod download;
mod game;
mod laa;
mod manifest;
mod patch;
mod recipes;
mod revert;
mod scan;
#[cfg(test)]
mod testutil;
mod update;
mod version;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level())),
        )
        .with_writer(std::io::stderr)
        .init();

    cli::run(cli)
}
