//! Thing shadow command-line client.
//!
//! Usage:
//!   thingshadow --thing <NAME> --endpoint <HOST> --cert <PEM> --key <PEM> <COMMAND>
//!
//! Connection options can also be set through `THINGSHADOW_*` environment
//! variables.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{ConnectArgs, OutputFormat};

/// Device shadow client
#[derive(Parser)]
#[command(name = "thingshadow")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    connect: ConnectArgs,

    /// Output format for received payloads
    #[arg(long, value_enum, default_value_t = OutputFormat::Raw, global = true)]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the shadow document
    Get,

    /// Delete the shadow document
    Delete,

    /// Publish an update request
    Update {
        /// JSON request; read from --file or stdin when omitted
        payload: Option<String>,

        /// Read the request from a file
        #[arg(short, long, conflicts_with = "payload")]
        file: Option<PathBuf>,

        /// Wait for the accepted or rejected answer
        #[arg(short, long)]
        wait: bool,
    },

    /// Publish to update/documents
    UpdateDocument {
        /// JSON document; read from --file or stdin when omitted
        payload: Option<String>,

        /// Read the document from a file
        #[arg(short, long, conflicts_with = "payload")]
        file: Option<PathBuf>,
    },

    /// Print update answers until interrupted
    Watch,

    /// Print messages on a custom topic
    Subscribe {
        /// Topic suffix under the thing's shadow prefix; may end in a wildcard
        suffix: String,

        /// Exit after this many messages
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },

    /// Publish to a custom topic
    Publish {
        /// Topic suffix under the thing's shadow prefix
        suffix: String,

        /// Payload; read from --file or stdin when omitted
        payload: Option<String>,

        /// Read the payload from a file
        #[arg(short, long, conflicts_with = "payload")]
        file: Option<PathBuf>,
    },

    /// Drop the broker subscription for a custom topic
    Unsubscribe {
        /// Topic suffix under the thing's shadow prefix
        suffix: String,
    },

    /// Fetch temporary credentials using the device certificate
    Credentials {
        /// Credentials endpoint URL
        #[arg(long, env = "THINGSHADOW_CREDENTIALS_URL")]
        url: String,

        /// Include the secret key and session token in the output
        #[arg(long)]
        show_secrets: bool,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let connect = &cli.connect;
    let format = cli.format;

    match cli.command {
        Commands::Get => commands::shadow::get(connect, format).await,
        Commands::Delete => commands::shadow::delete(connect, format).await,
        Commands::Update {
            payload,
            file,
            wait,
        } => commands::shadow::update(connect, payload, file, wait, format).await,
        Commands::UpdateDocument { payload, file } => {
            commands::shadow::update_document(connect, payload, file).await
        }
        Commands::Watch => commands::shadow::watch(connect, format).await,
        Commands::Subscribe { suffix, count } => {
            commands::topic::subscribe(connect, &suffix, count, format).await
        }
        Commands::Publish {
            suffix,
            payload,
            file,
        } => commands::topic::publish(connect, &suffix, payload, file).await,
        Commands::Unsubscribe { suffix } => commands::topic::unsubscribe(connect, &suffix).await,
        Commands::Credentials { url, show_secrets } => {
            commands::credentials::run(connect, &url, show_secrets, format).await
        }
        Commands::Version => {
            println!("thingshadow {}", env!("CARGO_PKG_VERSION"));
            println!("Shadow topic prefix: $aws/things/<thing>/shadow/");
            Ok(())
        }
    }
}
