mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    config::ConfigSubcommand, member::MemberSubcommand, request::RequestSubcommand,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "roster",
    about = "Rank ladder reconciliation and approval workflows for a ranked community",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .roster/)
    #[arg(long, global = true, env = "ROSTER_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a roster project in the current directory
    Init {
        /// Community name written to config.yaml
        #[arg(long, default_value = "My Community")]
        name: String,
    },

    /// Print the rank ladder
    Ladder,

    /// Validate the project configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Reconcile member records with the role source
    Sync {
        /// Reconcile a single member
        #[arg(long)]
        member: Option<String>,
    },

    /// Keep reconciling: full passes on a timer plus targeted passes for
    /// members whose roles change
    Watch {
        /// Seconds between full passes (default: sync.interval_secs)
        #[arg(long)]
        interval: Option<u64>,
        /// Seconds between role source polls (default: sync.poll_secs)
        #[arg(long)]
        poll: Option<u64>,
    },

    /// Inspect and manage member records
    Member {
        #[command(subcommand)]
        subcommand: MemberSubcommand,
    },

    /// Open and act on approval workflows
    Request {
        #[command(subcommand)]
        subcommand: RequestSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Watch { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init { name } => cmd::init::run(&root, &name, cli.json),
        Commands::Ladder => cmd::ladder::run(&root, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
        Commands::Sync { member } => cmd::sync::run(&root, member.as_deref(), cli.json),
        Commands::Watch { interval, poll } => cmd::watch::run(&root, interval, poll),
        Commands::Member { subcommand } => cmd::member::run(&root, subcommand, cli.json),
        Commands::Request { subcommand } => cmd::request::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
