//! ucd - uevent-router demonstration front-end
//!
//! Exercises the administrative API (coldboot trigger, manual inject)
//! and a passthrough `run` loop against a single synthetic container,
//! without requiring a real container manager to embed the library.

mod coldboot;
mod demo;
mod inject;
mod run;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ucd")]
#[command(about = "uevent-router demonstration front-end", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Drive the real kernel uevent socket against a demo container
    Run(run::RunArgs),

    /// Trigger a coldboot scan for a demo container
    Coldboot(coldboot::ColdbootArgs),

    /// Hand-build and inject a single uevent into a target pid
    Inject(inject::InjectArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run::run(args).await?,
        Command::Coldboot(args) => coldboot::run(args).await?,
        Command::Inject(args) => inject::run(args).await?,
    }
    Ok(())
}
