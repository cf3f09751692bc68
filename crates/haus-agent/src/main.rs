//! haus-agent - in-container configuration manager CLI

use clap::{Parser, Subcommand};
use haus_agent::{
    detect_system, SyncEngine, SyncOptions, SystemRunner, DEFAULT_CONFIG_ROOT, STATE_DIR,
};
use haus_config::ConfigRepo;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "haus-agent")]
#[command(author, version, about = "infrahaus in-container configuration manager", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply the config tree to this system
    Sync {
        /// Root of the config tree
        #[arg(long, default_value = DEFAULT_CONFIG_ROOT)]
        config_root: PathBuf,

        /// Durable state directory
        #[arg(long, default_value = STATE_DIR)]
        state_dir: PathBuf,

        /// Container user substituted into managed-file paths
        #[arg(long, default_value = "root")]
        user: String,

        /// Git repository to sync the config tree from
        #[arg(long)]
        repo_url: Option<String>,

        /// Branch for --repo-url
        #[arg(long, default_value = "main")]
        branch: String,

        /// Default timeout in seconds for custom package entries
        #[arg(long, default_value_t = 300)]
        custom_timeout: u64,
    },

    /// Print the detected OS and package manager
    Detect,
}

#[tokio::main(flavor = "current_thread")]
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
        Commands::Sync {
            config_root,
            state_dir,
            user,
            repo_url,
            branch,
            custom_timeout,
        } => {
            let mut opts = SyncOptions::new(config_root, state_dir);
            opts.user = user;
            opts.custom_timeout = Duration::from_secs(custom_timeout);
            opts.repo = repo_url.map(|url| ConfigRepo { url, branch });

            let engine = SyncEngine::new(Arc::new(SystemRunner), opts);
            match engine.run().await {
                Ok(report) => {
                    tracing::info!(
                        "sync finished: packages {}, files applied {}, scripts {}{}",
                        report.packages,
                        report.files_applied,
                        report.scripts_completed.len(),
                        if report.partial { " (partial)" } else { "" }
                    );
                    Ok(())
                }
                Err(e) => {
                    tracing::error!("sync failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Detect => {
            let runner = SystemRunner;
            let info = detect_system(&runner, std::path::Path::new("/etc/os-release"))?;
            println!("{} ({})", info.os_id, info.native_manager);
            Ok(())
        }
    }
}
