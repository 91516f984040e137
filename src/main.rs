//! Conductor CLI entry point.

use anyhow::{Context, Result};
use clap::Parser;

use conductor::adapters::sqlite::create_pool;
use conductor::cli::{
    commands::{agent, event, init, serve, task, ticket},
    AgentSubcommand, Cli, Commands, EventSubcommand, TaskSubcommand, TicketSubcommand,
};
use conductor::infrastructure::{init_logging, ConfigLoader};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Init runs before any config or database exists.
    if let Commands::Init { force } = &cli.command {
        return init::handle_init(*force, cli.json).await;
    }

    let config = ConfigLoader::load().context("Failed to load configuration")?;
    let _log_guard = init_logging(&config.logging).context("Failed to initialize logging")?;

    if matches!(&cli.command, Commands::Serve) {
        return serve::handle_serve(config).await;
    }

    // Read-side commands share one pool over the configured database.
    let database_url = format!("sqlite:{}", config.database.path);
    let pool = create_pool(&database_url, None)
        .await
        .context("Failed to connect to database; run `conductor init` first")?;

    match cli.command {
        Commands::Init { .. } | Commands::Serve => unreachable!("handled above"),
        Commands::Agent(cmd) => match cmd.command {
            AgentSubcommand::List { status } => agent::handle_list(pool, status, cli.json).await,
            AgentSubcommand::Show { id } => agent::handle_show(pool, &id, cli.json).await,
        },
        Commands::Task(cmd) => match cmd.command {
            TaskSubcommand::List { status, ticket } => {
                task::handle_list(pool, status, ticket, cli.json).await
            }
            TaskSubcommand::Show { id } => task::handle_show(pool, &id, cli.json).await,
        },
        Commands::Ticket(cmd) => match cmd.command {
            TicketSubcommand::List { archived } => ticket::handle_list(pool, archived, cli.json).await,
            TicketSubcommand::Show { id } => ticket::handle_show(pool, &id, cli.json).await,
        },
        Commands::Event(cmd) => match cmd.command {
            EventSubcommand::Tail { topic, limit } => {
                event::handle_tail(pool, &topic, limit, cli.json).await
            }
        },
    }
}
