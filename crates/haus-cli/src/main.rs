//! infrahaus - LXC provisioning worker CLI

use clap::{Parser, Subcommand};
use haus_cli::commands;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "infrahaus")]
#[command(author, version, about = "LXC container provisioning from declarative templates", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Container/service record database
    #[arg(long, global = true, default_value = "infrahaus.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the provisioning worker
    Worker {
        /// Directory of template JSON files
        #[arg(long, default_value = "templates")]
        templates: PathBuf,
    },

    /// Validate and enqueue a job payload from a JSON file
    Enqueue {
        /// Path to the job payload
        job: PathBuf,
    },

    /// List container records
    Containers,

    /// Reset an errored container back to pending so it can be retried
    Reset {
        /// Container id
        container_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Worker { templates } => commands::worker(&cli.db, &templates).await,
        Commands::Enqueue { job } => commands::enqueue(&job).await,
        Commands::Containers => commands::containers(&cli.db),
        Commands::Reset { container_id } => commands::reset(&cli.db, &container_id),
    }
}
