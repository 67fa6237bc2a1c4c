use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "vox", about = "Real-time voice-dialog telephony server", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Robot directory holding config.json, prompt.txt, greeting.wav, tracks/
    #[arg(short, long, global = true, default_value = ".")]
    robot_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the telephony WebSocket server
    Serve {
        /// Override the configured WS port
        #[arg(long)]
        port: Option<u16>,

        /// Max WebSocket connections accepted per source IP per minute
        #[arg(long, default_value_t = 30)]
        max_connections_per_ip: u32,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Validate configuration and provider secrets without starting the server
    Doctor,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the fully merged configuration
    Show,
    /// Get a single config value by dotted path (e.g. "vad.energy_threshold")
    Get { key: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let config = vox_core::config::Config::load(&cli.robot_dir)?;

    match cli.command {
        Commands::Serve { port, max_connections_per_ip } => run_serve(config, port, max_connections_per_ip).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => println!("{}", serde_json::to_string_pretty(&config)?),
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{value}"),
                None => println!("(not set)"),
            },
        },
        Commands::Doctor => run_doctor(&config),
    }

    Ok(())
}

async fn run_serve(mut config: vox_core::config::Config, port: Option<u16>, max_connections_per_ip: u32) -> anyhow::Result<()> {
    if let Some(port) = port {
        config.ws_port = port;
    }

    let (warnings, errors) = config.validate();
    for w in &warnings {
        tracing::warn!("{w}");
    }
    if !errors.is_empty() {
        for e in &errors {
            tracing::error!("{e}");
        }
        anyhow::bail!("configuration is invalid, refusing to start");
    }

    let telemetry = build_telemetry(&config).await?;
    let config = Arc::new(config);
    let state = vox_gateway::server::ServerState::new(config, telemetry, max_connections_per_ip);

    tracing::info!("vox-gateway starting in {:?} mode", state.config.mode);
    vox_gateway::server::start(state).await
}

async fn build_telemetry(config: &vox_core::config::Config) -> anyhow::Result<Arc<vox_telemetry::Telemetry>> {
    use vox_telemetry::document_memory::InMemoryDocumentSink;
    use vox_telemetry::kv_memory::InMemoryKvSink;
    use vox_telemetry::relational_sqlite::SqliteRelationalSink;

    let dsn = format!("sqlite://{}/calls.db?mode=rwc", config.robot_dir.display());
    let relational = Arc::new(SqliteRelationalSink::connect(&dsn).await?);
    let document = Arc::new(InMemoryDocumentSink::new());
    let kv = Arc::new(InMemoryKvSink::new());
    Ok(Arc::new(vox_telemetry::Telemetry::new(relational, document, kv)))
}

fn run_doctor(config: &vox_core::config::Config) {
    let (warnings, errors) = config.validate();
    println!("robot dir:     {}", config.robot_dir.display());
    println!("mode:          {:?}", config.mode);
    println!("asr provider:  {}", config.asr.provider);
    println!("llm provider:  {}", config.llm.provider);
    println!("tts provider:  {}", config.tts.provider);
    println!("greeting:      {}", if config.greeting_wav.is_some() || !config.greeting_text.is_empty() { "configured" } else { "missing" });

    if warnings.is_empty() && errors.is_empty() {
        println!("\nno issues found");
        return;
    }
    if !warnings.is_empty() {
        println!("\nwarnings:");
        for w in &warnings {
            println!("  - {w}");
        }
    }
    if !errors.is_empty() {
        println!("\nerrors:");
        for e in &errors {
            println!("  - {e}");
        }
    }
}
