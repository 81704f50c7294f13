use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tether::config::{self, SessionConfig};
use tether::{CommandSchema, Dispatcher, Engine, Session, builtins};
use tether_protocol::Reply;

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Drive live objects by name over a WebSocket session")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the built-in catalog, one peer per session
    Serve {
        /// Host to bind and to report in lifecycle markers
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (0 picks a free one)
        #[arg(short, long)]
        port: Option<u16>,

        /// Config file (default: nearest tether.toml upward from the working directory)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Exit after the first session instead of serving the next one
        #[arg(long)]
        once: bool,
    },

    /// Send one command envelope and print the reply
    Send {
        /// Session URL
        #[arg(long, default_value = "ws://localhost:8001")]
        url: String,

        /// How long to wait for a reply
        #[arg(long, default_value = "5000")]
        timeout_ms: u64,

        /// Envelope JSON, e.g. '{"command": "run", "args": ["math:add", 1, 2]}'
        envelope: String,
    },

    /// List every loadable reference
    Catalog,

    /// Print the command envelope JSON Schema
    Schema,
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_module("tungstenite", log::LevelFilter::Warn)
        .filter_module("tokio_tungstenite", log::LevelFilter::Warn)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            host,
            port,
            config,
            once,
        } => {
            let mut config = load_config(config)?;
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(serve(config, once))?;
        }

        Commands::Send {
            url,
            timeout_ms,
            envelope,
        } => {
            let envelope: serde_json::Value =
                serde_json::from_str(&envelope).context("Envelope is not valid JSON")?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(send(&url, envelope, Duration::from_millis(timeout_ms)))?;
        }

        Commands::Catalog => {
            for reference in builtins::catalog().references() {
                println!("{reference}");
            }
        }

        Commands::Schema => {
            println!("{}", serde_json::to_string_pretty(&CommandSchema::document())?);
        }
    }

    Ok(())
}

fn load_config(explicit: Option<PathBuf>) -> Result<SessionConfig> {
    let path = match explicit {
        Some(path) => Some(path),
        None => config::discover(&std::env::current_dir()?),
    };
    match path {
        Some(path) => {
            log::info!("Using config {}", path.display());
            SessionConfig::load(&path).with_context(|| format!("Failed to load {}", path.display()))
        }
        None => Ok(SessionConfig::default()),
    }
}

/// Sessions run back to back over one registry until interrupted.
async fn serve(config: SessionConfig, once: bool) -> Result<()> {
    let dispatcher = Arc::new(Dispatcher::new(Engine::new(builtins::catalog())));

    loop {
        let session = Session::bind(config.clone(), Arc::clone(&dispatcher))
            .await
            .context("Failed to start session")?;
        let handle = session.handle();
        let mut serving = tokio::spawn(session.serve());

        let interrupted = tokio::select! {
            joined = &mut serving => {
                joined??;
                false
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                handle.stop();
                serving.await??;
                true
            }
        };

        if interrupted || once {
            return Ok(());
        }
        log::info!("Session ended, serving the next one");
    }
}

async fn send(url: &str, envelope: serde_json::Value, wait: Duration) -> Result<()> {
    let mut client = tether::Client::connect(url)
        .await
        .with_context(|| format!("Failed to connect to {url}"))?;

    let reply = client.request(&envelope, wait).await?;
    client.close().await?;

    match reply {
        Some(reply) => {
            println!("{}", serde_json::to_string_pretty(&reply)?);
            if let Reply::Error { .. } = reply {
                bail!("Command failed");
            }
            Ok(())
        }
        None => bail!("No reply within {}ms (envelope dropped?)", wait.as_millis()),
    }
}
