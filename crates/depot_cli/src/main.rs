//! Depot CLI - housekeeping for a store of bare git repositories.

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use depot_core::DepotError;
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "depot")]
#[command(about = "Janitor and update tooling for bare git repositories", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = "depot.toml")]
    config: PathBuf,

    /// Log at info level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Janitor runs
    Janitor {
        #[command(subcommand)]
        command: JanitorCommands,
    },
    /// Inspect and manage single repositories
    Repo {
        #[command(subcommand)]
        command: RepoCommands,
    },
    /// Fetch a repository from its remote
    Update {
        /// Repository name, e.g. github.com/org/repo
        name: String,
        /// Revision to make sure is present after the fetch
        #[arg(long)]
        rev: Option<String>,
    },
    /// Configuration file management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum JanitorCommands {
    /// Run one pass over every repository
    Run {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run periodically until interrupted
    Serve,
}

#[derive(Subcommand)]
enum RepoCommands {
    /// Show sentinel state, maintenance need and database record
    Status {
        /// Repository name
        name: String,
    },
    /// Flag a repository so the next janitor run removes it
    MarkCorrupt {
        /// Repository name
        name: String,
        /// Reason stored in the flag file
        #[arg(short, long, default_value = "marked corrupt by operator")]
        reason: String,
    },
    /// Register a repository in the database
    Register {
        /// Repository name
        name: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration, environment overrides included
    Show,
    /// Write a configuration file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = dispatch(cli).await;
    if let Err(err) = &result {
        if let Some(hint) = err
            .downcast_ref::<DepotError>()
            .and_then(DepotError::recovery_suggestion)
        {
            eprintln!("{} {}", style("hint:").cyan(), hint);
        }
    }
    result
}

async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Config { command } => match command {
            ConfigCommands::Show => commands::config::show(&cli.config),
            ConfigCommands::Init { force } => commands::config::init(&cli.config, force),
        },
        command => {
            let config = commands::load_config(&cli.config)?;
            match command {
                Commands::Janitor { command } => match command {
                    JanitorCommands::Run { json } => commands::janitor::run(config, json).await,
                    JanitorCommands::Serve => commands::janitor::serve(config).await,
                },
                Commands::Repo { command } => match command {
                    RepoCommands::Status { name } => commands::repo::status(&config, &name).await,
                    RepoCommands::MarkCorrupt { name, reason } => {
                        commands::repo::mark_corrupt(&config, &name, &reason)
                    }
                    RepoCommands::Register { name } => commands::repo::register(&config, &name),
                },
                Commands::Update { name, rev } => {
                    commands::update::run(&config, &name, rev.as_deref()).await
                }
                Commands::Config { .. } => unreachable!("handled above"),
            }
        }
    }
}
