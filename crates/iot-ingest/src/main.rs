use std::path::PathBuf;

use clap::{Parser, Subcommand};
use iot_ingest::cli::commands::{self, Context, SourceKind};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "iot-ingest")]
#[command(author, version, about = "Ingest IoT telemetry into hourly-aligned SQLite tables", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Readings database path
    #[arg(long, global = true, env = "IOT_INGEST_DB")]
    db: Option<PathBuf>,

    /// Pipeline config file (JSON)
    #[arg(long, global = true, env = "IOT_INGEST_CONFIG")]
    config: Option<PathBuf>,

    /// Processing timezone (IANA name), overrides the config file
    #[arg(long, global = true)]
    tz: Option<String>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, align and store readings for a date range
    Ingest {
        #[command(subcommand)]
        command: IngestCommands,
    },
    /// Print stored readings as column-oriented JSON
    Query {
        /// Provider table to read
        source: SourceKind,
        /// Start (YYYY-MM-DD[ HH:MM[:SS]] or RFC 3339)
        #[arg(long)]
        from: Option<String>,
        /// End, inclusive
        #[arg(long)]
        to: Option<String>,
        /// Pretty-print the JSON
        #[arg(long)]
        pretty: bool,
    },
    /// Show stored tables and failed windows
    Status,
    /// Re-ingest windows that failed in earlier runs
    Retry {
        source: SourceKind,
        /// Device serial (ZENTRA) or channel id (ThingSpeak)
        id: String,
        /// API key, overrides stored credentials
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long, env = "ZENTRA_API_KEY", hide = true)]
        zentra_api_key: Option<String>,
        #[arg(long, env = "THINGSPEAK_API_KEY", hide = true)]
        thingspeak_api_key: Option<String>,
    },
    /// Manage provider API keys
    Credentials {
        #[command(subcommand)]
        command: CredentialsCommands,
    },
}

#[derive(Subcommand)]
enum IngestCommands {
    /// ZENTRA Cloud device readings
    Zentra {
        /// Device serial number
        #[arg(short, long)]
        device: String,
        /// Range start (YYYY-MM-DD[ HH:MM[:SS]] or RFC 3339)
        #[arg(long)]
        from: String,
        /// Range end, inclusive
        #[arg(long)]
        to: String,
        /// API key, overrides stored credentials
        #[arg(long, env = "ZENTRA_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },
    /// ThingSpeak channel feed
    Thingspeak {
        /// Channel id
        #[arg(short, long)]
        channel: String,
        /// Range start (YYYY-MM-DD[ HH:MM[:SS]] or RFC 3339)
        #[arg(long)]
        from: String,
        /// Range end, inclusive
        #[arg(long)]
        to: String,
        /// Read API key, overrides stored credentials
        #[arg(long, env = "THINGSPEAK_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },
}

#[derive(Subcommand)]
enum CredentialsCommands {
    /// Store API keys (prompts when no flag is given)
    Set {
        #[arg(long)]
        zentra: Option<String>,
        #[arg(long)]
        thingspeak: Option<String>,
    },
    /// Show stored API keys, masked
    Show,
    /// Remove stored API keys
    Clear,
}

#[tokio::main]
async fn main() -> iot_ingest::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "iot_ingest=debug"
    } else {
        "iot_ingest=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", iot_ingest::error::format_user_error(&e));
        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> iot_ingest::Result<()> {
    let context = || Context::load(cli.config.as_deref(), cli.db.clone(), cli.tz.as_deref());

    match cli.command {
        Commands::Ingest { command } => match command {
            IngestCommands::Zentra {
                device,
                from,
                to,
                api_key,
            } => commands::ingest_zentra(context()?, device, from, to, api_key).await,
            IngestCommands::Thingspeak {
                channel,
                from,
                to,
                api_key,
            } => commands::ingest_thingspeak(context()?, channel, from, to, api_key).await,
        },
        Commands::Query {
            source,
            from,
            to,
            pretty,
        } => commands::query(context()?, source, from, to, pretty).await,
        Commands::Status => commands::status(context()?).await,
        Commands::Retry {
            source,
            id,
            api_key,
            zentra_api_key,
            thingspeak_api_key,
        } => {
            let api_key = api_key.or(match source {
                SourceKind::Zentra => zentra_api_key,
                SourceKind::Thingspeak => thingspeak_api_key,
            });
            commands::retry(context()?, source, id, api_key).await
        }
        Commands::Credentials { command } => match command {
            CredentialsCommands::Set { zentra, thingspeak } => {
                commands::set_credentials(zentra, thingspeak).await
            }
            CredentialsCommands::Show => commands::show_credentials().await,
            CredentialsCommands::Clear => commands::clear_credentials().await,
        },
    }
}
