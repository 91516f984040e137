//! Command-line interface for the Conductor kernel.

pub mod commands;
pub mod display;

use clap::{Parser, Subcommand};

/// Multi-agent workflow orchestration kernel.
#[derive(Parser)]
#[command(name = "conductor", version, about, long_about = None)]
pub struct Cli {
    /// Emit machine-readable JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a project: write default config and create the database
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Run the kernel daemon (sweepers, dispatcher, diagnostic monitor)
    Serve,

    /// Inspect registered agents
    Agent(AgentCommands),

    /// Inspect tasks
    Task(TaskCommands),

    /// Inspect tickets
    Ticket(TicketCommands),

    /// Inspect the event journal
    Event(EventCommands),
}

#[derive(Parser)]
pub struct AgentCommands {
    #[command(subcommand)]
    pub command: AgentSubcommand,
}

#[derive(Subcommand)]
pub enum AgentSubcommand {
    /// List registered agents
    List {
        /// Filter by status (idle, running, failed, quarantined, unresponsive)
        #[arg(long)]
        status: Option<String>,
    },
    /// Show one agent
    Show { id: String },
}

#[derive(Parser)]
pub struct TaskCommands {
    #[command(subcommand)]
    pub command: TaskSubcommand,
}

#[derive(Subcommand)]
pub enum TaskSubcommand {
    /// List tasks
    List {
        /// Filter by status
        #[arg(long)]
        status: Option<String>,
        /// Filter by ticket
        #[arg(long)]
        ticket: Option<String>,
    },
    /// Show one task
    Show { id: String },
}

#[derive(Parser)]
pub struct TicketCommands {
    #[command(subcommand)]
    pub command: TicketSubcommand,
}

#[derive(Subcommand)]
pub enum TicketSubcommand {
    /// List tickets
    List {
        /// Include archived tickets
        #[arg(long)]
        archived: bool,
    },
    /// Show one ticket
    Show { id: String },
}

#[derive(Parser)]
pub struct EventCommands {
    #[command(subcommand)]
    pub command: EventSubcommand,
}

#[derive(Subcommand)]
pub enum EventSubcommand {
    /// List recent journal entries
    Tail {
        /// Topic pattern (exact or trailing wildcard, e.g. task.*)
        #[arg(long, default_value = "*")]
        topic: String,
        /// Maximum entries
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
}
