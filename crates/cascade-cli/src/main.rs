mod config;
mod config_watcher;

use cascade_core::{ChatRequest, ContentPart, MediaRef, Message, MessageContent};
use cascade_gateway::GatewayServer;
use cascade_router::{
    resolver, Dispatcher, EnvSecrets, OpenAiCompatBackend, SecretSource, TableHandle,
};
use clap::{Parser, Subcommand};
use config_watcher::{reload_into, ConfigWatcher};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cascade", about = "Cascade: provider-agnostic completion gateway with fallbacks")]
struct Cli {
    /// Path to config file (TOML, or JSON by extension)
    #[arg(short, long, default_value = "cascade.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
        /// Disable config hot reload
        #[arg(long)]
        no_watch: bool,
    },
    /// Validate the config file and report missing credentials
    Check,
    /// Print the candidate chain a request would cascade through
    Routes {
        /// Requested role id (default role when omitted)
        #[arg(short, long)]
        model: Option<String>,
        /// Plan for a request carrying an image
        #[arg(long)]
        media: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    if let Ok(path) = dotenvy::dotenv() {
        info!(path = %path.display(), "Loaded environment file");
    }

    let cli = Cli::parse();
    let config = config::load(&cli.config)?;
    let table = config.routing_table()?;
    let secrets: Arc<dyn SecretSource> = Arc::new(EnvSecrets);

    match cli.command {
        Commands::Serve {
            host,
            port,
            no_watch,
        } => {
            let host = host.unwrap_or(config.server.host);
            let port = port.unwrap_or(config.server.port);

            info!(
                profiles = table.profiles().len(),
                default_role = table.default_role(),
                "Routing table loaded"
            );
            let handle = TableHandle::new(table);

            let _watcher = if config.server.watch && !no_watch {
                Some(ConfigWatcher::start(
                    cli.config.clone(),
                    config.server.reload_debounce_ms,
                    reload_into(handle.clone()),
                )?)
            } else {
                None
            };

            let dispatcher = Arc::new(Dispatcher::new(
                handle,
                Arc::new(OpenAiCompatBackend::new()),
                secrets,
            ));
            let app = GatewayServer::build(dispatcher);

            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!("Cascade gateway listening on {addr}");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
            info!("Cascade gateway stopped");
        }
        Commands::Check => {
            let mut missing = 0;
            println!(
                "Configuration OK: {} profile(s), default role '{}'",
                table.profiles().len(),
                table.default_role()
            );
            for profile in table.profiles() {
                let resolved = resolver::normalize(profile)?;
                let status = if secrets.get(&resolved.api_key_variable).is_some() {
                    "ok"
                } else {
                    missing += 1;
                    "MISSING"
                };
                println!(
                    "  {:<16} {:<32} {} [{}]",
                    profile.role_id, resolved.vendor_model, resolved.api_key_variable, status
                );
            }
            if missing > 0 {
                warn!(missing, "Some credentials are not set; those candidates will fail");
                println!("\n{missing} credential(s) missing");
            }
        }
        Commands::Routes { model, media } => {
            let dispatcher = Dispatcher::new(
                TableHandle::new(table),
                Arc::new(OpenAiCompatBackend::new()),
                secrets,
            );
            let candidates = dispatcher.plan(&probe_request(model.as_deref(), media))?;
            println!("Candidate chain ({}):", candidates.len());
            for (i, c) in candidates.iter().enumerate() {
                println!(
                    "  {}. {:<16} {:<32} timeout={}s context={} key={}",
                    i + 1,
                    c.role_id,
                    c.vendor_model,
                    c.timeout.as_secs(),
                    c.context_tokens,
                    if c.api_key.is_some() { "set" } else { "missing" }
                );
            }
        }
    }

    Ok(())
}

/// A minimal request used to preview routing.
fn probe_request(model: Option<&str>, media: bool) -> ChatRequest {
    let content = if media {
        MessageContent::Parts(vec![
            ContentPart::Text {
                text: "describe".into(),
            },
            ContentPart::ImageUrl {
                image_url: MediaRef {
                    url: "https://example.invalid/probe.png".into(),
                    detail: None,
                },
            },
        ])
    } else {
        MessageContent::from("ping")
    };
    ChatRequest::new(model, vec![Message::user(content)])
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
