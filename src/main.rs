use anyhow::Result;
use clap::Parser;
use scribe::cli::{
    handle_invite_command, handle_reconcile, handle_run, handle_serve, load_config, Cli,
    CliCommand,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    if let CliCommand::Version = cli.command {
        println!("Scribe {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        CliCommand::Serve => handle_serve(config, cli.config).await,
        CliCommand::Reconcile(args) => handle_reconcile(config, args).await,
        CliCommand::Run(args) => handle_run(config, args).await,
        CliCommand::Invite(args) => handle_invite_command(config, args).await,
        CliCommand::Version => Ok(()),
    }
}
