use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::scheduler::TRIGGER_ENV;

#[derive(Parser, Debug)]
#[command(name = "scribe")]
#[command(about = "Meeting scribe: joins meetings and delivers what was said", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file (default: ~/.config/scribe/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Run the change-feed endpoint and the trigger dispatcher
    Serve,
    /// Apply a JSON-lines file of invite change events
    Reconcile(ReconcileCliArgs),
    /// Run one bot session for a fired trigger
    Run(RunCliArgs),
    /// Manage local invites
    Invite(InviteCliArgs),
    /// Print version information
    Version,
}

#[derive(ClapArgs, Debug)]
pub struct ReconcileCliArgs {
    /// One change event per line
    pub file: PathBuf,
}

#[derive(ClapArgs, Debug)]
pub struct RunCliArgs {
    /// Trigger payload as JSON
    #[arg(long, env = TRIGGER_ENV)]
    pub payload: Option<String>,
}

#[derive(ClapArgs, Debug)]
pub struct InviteCliArgs {
    #[command(subcommand)]
    pub command: InviteCommand,
}

#[derive(Subcommand, Debug)]
pub enum InviteCommand {
    /// Invite the scribe to a meeting
    Add(InviteAddArgs),
    /// Show invites, newest first
    List {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Withdraw an invite and its schedule entry
    Remove { id: String },
}

#[derive(ClapArgs, Debug)]
pub struct InviteAddArgs {
    /// Meeting name, used as the summary subject
    pub name: String,
    /// Chime, Webex or Teams
    #[arg(short, long)]
    pub platform: String,
    /// Meeting id (Chime, Webex) or join link (Teams)
    #[arg(short, long)]
    pub meeting: String,
    #[arg(long)]
    pub password: Option<String>,
    /// Meeting start as RFC 3339; omit to join right away
    #[arg(long)]
    pub at: Option<String>,
    /// Summary recipient, repeatable
    #[arg(short, long = "recipient")]
    pub recipients: Vec<String>,
}
