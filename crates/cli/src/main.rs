//! Crabdesk CLI — the main entry point.
//!
//! Commands:
//! - `onboard` — Initialize config & storage directory
//! - `chat`    — Interactive support session
//! - `review`  — List pending escalations and record reviewer decisions
//! - `history` — Show or search a user's durable interaction history

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "crabdesk",
    about = "Crabdesk — conversational support agent with human-in-the-loop review",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration and storage
    Onboard,

    /// Start an interactive support session
    Chat {
        /// User identifier
        #[arg(short, long)]
        user: String,

        /// Thread identifier (one conversation per thread)
        #[arg(short, long, default_value = "main")]
        thread: String,
    },

    /// List pending escalations, or record a reviewer decision
    Review {
        /// User identifier of the escalated session
        #[arg(long)]
        user: Option<String>,

        /// Thread identifier of the escalated session
        #[arg(long)]
        thread: Option<String>,

        /// Approve the escalation
        #[arg(long, conflicts_with = "reject")]
        approve: bool,

        /// Reject the escalation
        #[arg(long)]
        reject: bool,

        /// Reviewer feedback relayed to the user (the resolution text on
        /// approval)
        #[arg(short, long)]
        feedback: Option<String>,
    },

    /// Show a user's interaction history
    History {
        /// User identifier
        #[arg(short, long)]
        user: String,

        /// Maximum entries to show
        #[arg(short, long, default_value_t = 10)]
        limit: usize,

        /// Filter entries by keyword instead of listing the most recent
        #[arg(short, long)]
        search: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Chat { user, thread } => commands::chat::run(&user, &thread).await?,
        Commands::Review {
            user,
            thread,
            approve,
            reject,
            feedback,
        } => commands::review::run(user, thread, approve, reject, feedback).await?,
        Commands::History { user, limit, search } => {
            commands::history::run(&user, limit, search).await?;
        }
    }

    Ok(())
}
