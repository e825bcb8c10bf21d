//! Rollout Guard CLI
//!
//! A command-line tool for syncing services, inspecting deployed versions
//! and steering batch syncs on a rollout guard server.

mod client;
mod commands;
mod config;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use commands::{batch, sync, versions};

/// Rollout Guard CLI
#[derive(Parser)]
#[command(name = "rgctl")]
#[command(author, version, about = "CLI for Rollout Guard", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via RG_API_URL env var)
    #[arg(long, env = "RG_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Target a cluster other than the server's default
#[derive(Args, Debug, Clone, Default)]
pub struct ClusterArgs {
    /// Cluster API server URL
    #[arg(long, requires = "sa_token")]
    pub cluster_url: Option<String>,

    /// Service-account token for --cluster-url
    #[arg(long, requires = "cluster_url")]
    pub sa_token: Option<String>,
}

impl From<ClusterArgs> for client::ClusterTarget {
    fn from(args: ClusterArgs) -> Self {
        Self {
            cluster_url: args.cluster_url,
            sa_token: args.sa_token,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sync one service to a version and replica count
    Sync {
        /// Deployment name
        service: String,

        /// Namespace (defaults to the config file's defaultNamespace)
        #[arg(long, short)]
        namespace: Option<String>,

        /// Desired image tag
        #[arg(long = "version", short = 'v')]
        desired_version: String,

        /// Desired replica count
        #[arg(long, short)]
        replicas: i32,

        /// Rollout poll interval in milliseconds
        #[arg(long)]
        poll_interval_ms: Option<u64>,

        /// Rollout timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        #[command(flatten)]
        cluster: ClusterArgs,
    },

    /// Show the live version of every deployment in a namespace
    Versions {
        /// Namespace (defaults to the config file's defaultNamespace)
        namespace: Option<String>,
    },

    /// Batch sync commands
    #[command(subcommand)]
    Batch(BatchCommands),
}

#[derive(Subcommand)]
pub enum BatchCommands {
    /// Start a batch from a JSON file of services
    Start {
        /// JSON array of {name, desiredVersion, desiredPodCount}
        #[arg(long)]
        file: PathBuf,

        /// Namespace (defaults to the config file's defaultNamespace)
        #[arg(long, short)]
        namespace: Option<String>,

        #[command(flatten)]
        cluster: ClusterArgs,
    },

    /// Resume a paused batch
    Resume {
        /// Batch ID
        batch_id: String,
    },

    /// Cancel a running or paused batch
    Cancel {
        /// Batch ID
        batch_id: String,
    },

    /// Show one batch, or all active batches
    Status {
        /// Batch ID
        batch_id: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run(Cli::parse()).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = config::Config::load()?;

    // Initialize client
    let client = client::ApiClient::new(&config.api_url(cli.api_url.as_deref()))?;

    // Execute command
    match cli.command {
        Commands::Sync {
            service,
            namespace,
            desired_version,
            replicas,
            poll_interval_ms,
            timeout_ms,
            cluster,
        } => {
            let request = client::SyncRequest {
                namespace: config.namespace(namespace)?,
                service_name: service,
                desired_version,
                desired_pod_count: replicas,
                target: cluster.into(),
                poll_interval_ms,
                timeout_ms,
            };
            sync::sync_service(&client, &request, cli.format).await?;
        }
        Commands::Versions { namespace } => {
            versions::show_versions(&client, &config.namespace(namespace)?, cli.format).await?;
        }
        Commands::Batch(batch_cmd) => match batch_cmd {
            BatchCommands::Start {
                file,
                namespace,
                cluster,
            } => {
                let namespace = config.namespace(namespace)?;
                batch::start_batch(&client, &namespace, &file, cluster.into(), cli.format).await?;
            }
            BatchCommands::Resume { batch_id } => {
                batch::resume_batch(&client, &batch_id, cli.format).await?;
            }
            BatchCommands::Cancel { batch_id } => {
                batch::cancel_batch(&client, &batch_id, cli.format).await?;
            }
            BatchCommands::Status { batch_id } => {
                batch::show_status(&client, batch_id.as_deref(), cli.format).await?;
            }
        },
    }

    Ok(())
}
