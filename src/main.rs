use anyhow::Result;
use bucketstore::{cli, config, core};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "bucketstore")]
#[command(version, about = "Simple object operations on one S3 bucket", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (environment variables are used when omitted)
    #[arg(long, global = true, env = "BUCKETSTORE_CONFIG")]
    config: Option<String>,

    /// Profile to use from config
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// List objects under a prefix
    Ls {
        /// s3://bucket/prefix or a prefix in the default bucket
        #[arg(default_value = "")]
        path: String,

        /// Maximum number of objects to show (0 = unlimited)
        #[arg(long, default_value = "0")]
        max_keys: usize,

        /// Print one JSON record per object
        #[arg(long)]
        json: bool,
    },

    /// Upload a local file
    Put {
        /// Local file
        source: String,

        /// s3://bucket/key (a trailing slash appends the file name)
        destination: String,

        /// Content type (guessed from the extension by default)
        #[arg(long)]
        content_type: Option<String>,
    },

    /// Download an object to a local file
    Get {
        /// s3://bucket/key
        source: String,

        /// Local file or directory
        destination: String,
    },

    /// Print an object to stdout
    Cat {
        /// s3://bucket/key
        source: String,
    },

    /// Remove an object
    Rm {
        /// s3://bucket/key
        path: String,
    },

    /// Show object info
    Stat {
        /// s3://bucket/key
        path: String,

        #[arg(long)]
        json: bool,
    },

    /// Check that a bucket is reachable
    Health {
        /// Bucket name (default bucket when omitted)
        bucket: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // One command at a time; a single-threaded runtime is enough
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let config = config::load_config(cli.config.as_deref(), cli.profile.as_deref())?;
    let core = core::Core::new(config).await?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    match cli.command {
        Commands::Ls {
            path,
            max_keys,
            json,
        } => cli::commands::cmd_ls(&core, &path, max_keys, json, &cancel).await,
        Commands::Put {
            source,
            destination,
            content_type,
        } => {
            cli::commands::cmd_put(&core, &source, &destination, content_type.as_deref(), &cancel)
                .await
        }
        Commands::Get {
            source,
            destination,
        } => cli::commands::cmd_get(&core, &source, &destination, &cancel).await,
        Commands::Cat { source } => cli::commands::cmd_cat(&core, &source, &cancel).await,
        Commands::Rm { path } => cli::commands::cmd_rm(&core, &path, &cancel).await,
        Commands::Stat { path, json } => {
            cli::commands::cmd_stat(&core, &path, json, &cancel).await
        }
        Commands::Health { bucket } => {
            cli::commands::cmd_health(&core, bucket.as_deref(), &cancel).await
        }
    }
}
