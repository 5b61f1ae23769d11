use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use roomcast_client::{logging, ClientConfig, HeadlessEngine, Session};

#[derive(Parser, Debug)]
#[command(name = "roomcast")]
#[command(about = "Roomcast SFU session client", long_about = None)]
struct Args {
    /// Config file (TOML, YAML or JSON)
    #[arg(long, env = "ROOMCAST_CONFIG")]
    config: Option<String>,

    /// Signaling server base URL, overrides the config file
    #[arg(long, env = "ROOMCAST_SERVER")]
    server: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Join, sync once, print the subscribable streams and leave
    Streams,
    /// Join and print session events until Ctrl-C
    Watch {
        /// Reconciliation interval in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,
    },
}

/// Load configuration, falling back to environment variables and defaults
fn load_config(path: Option<&str>) -> ClientConfig {
    if let Some(path) = path {
        if !std::path::Path::new(path).exists() {
            eprintln!("Config file {path} not found, using environment variables");
        }
    }
    ClientConfig::load(path).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}");
        eprintln!("Falling back to environment variables");
        ClientConfig::from_env().unwrap_or_else(|e| {
            eprintln!("Failed to load config: {e}");
            eprintln!("Using default configuration");
            ClientConfig::default()
        })
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load configuration
    let mut config = load_config(args.config.as_deref());
    if let Some(server) = args.server {
        config.signaling.base_url = server;
    }
    if let Command::Watch {
        interval_ms: Some(interval_ms),
    } = args.command
    {
        config.sync.interval_ms = interval_ms;
    }

    // 2. Validate (fail fast on misconfigurations)
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 3. Initialize logging
    logging::init_logging(&config.logging)?;
    info!(server = %config.signaling.base_url, "Roomcast starting...");

    // 4. Open the session
    let session = Session::new(config, Arc::new(HeadlessEngine::new()))?;
    session.join().await?;

    let outcome = match args.command {
        Command::Streams => print_streams(&session).await,
        Command::Watch { .. } => watch(&session).await,
    };

    // 5. Leave whatever happened above
    if let Some(e) = session.leave().await.error() {
        warn!(error = %e, "Leave notification failed");
    }
    outcome
}

async fn print_streams(session: &Session) -> Result<()> {
    session.sync().await?;
    for stream in session.peer_streams() {
        let kind = stream
            .info
            .kind
            .map_or_else(|| "-".to_string(), |kind| kind.to_string());
        let state = if stream.info.paused { "paused" } else { "live" };
        println!("{}\t{}\t{}\t{}", stream.peer_id, stream.media_tag, kind, state);
    }
    Ok(())
}

async fn watch(session: &Session) -> Result<()> {
    let mut events = session.events();
    let sync = session.start_sync();
    info!(peer_id = %session.peer_id(), "Watching room, press Ctrl-C to leave");

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!(error = %e, "Failed to listen for Ctrl-C");
                }
                info!("Shutting down...");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event stream lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
        if !session.is_joined() {
            warn!("Session ended");
            break;
        }
    }

    // Give an in-flight cycle a moment before leaving.
    if tokio::time::timeout(Duration::from_secs(5), sync.stop())
        .await
        .is_err()
    {
        warn!("Reconciliation loop did not stop in time");
    }
    Ok(())
}
