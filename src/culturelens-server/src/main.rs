//! CultureLens Server
//!
//! Serves cultural viewpoint comparisons over HTTP and narrates each
//! comparison through the local speakers.

mod http;

use clap::Parser;
use colored::Colorize;
use culturelens_core::{Comparator, Config, ProviderConfig, default_config};
use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "culturelens",
    version,
    about = "Compare how two cultures answer the same question",
    long_about = "An HTTP service that asks an OpenAI-compatible model for two cultural viewpoints, compares them, and reads the comparison aloud."
)]
struct Cli {
    /// TOML configuration file (built-in defaults when omitted)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides PORT and the config file)
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Address to bind
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED), value_name = "ADDR")]
    host: IpAddr,

    /// Disable spoken narration of comparisons
    #[arg(long)]
    no_narration: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let mut config: Config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => default_config(),
    };
    if cli.no_narration {
        config.narration.enabled = false;
    }

    // Get API configuration from environment
    let api_base = env::var("OPENAI_API_BASE")
        .or_else(|_| env::var("OPENAI_BASE_URL"))
        .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

    let api_key = env::var("OPENAI_API_KEY").unwrap_or_else(|_| {
        warn!("OPENAI_API_KEY not set. API calls may fail.");
        String::new()
    });

    let port = resolve_port(cli.port, env::var("PORT").ok().as_deref(), config.server.port);
    let addr = SocketAddr::new(cli.host, port);

    let provider = ProviderConfig::new(api_base, api_key);
    let comparator = Comparator::from_config(&config, &provider)?;

    print_header(&config, &provider, addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server is running on http://{}", addr);

    let comparator = Arc::new(comparator);
    axum::serve(listener, http::router(Arc::clone(&comparator)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    comparator.narrator().shutdown().await;
    info!("Server stopped");
    Ok(())
}

/// CLI flag, then `PORT`, then the config file. Unparsable values fall through.
fn resolve_port(cli: Option<u16>, env_port: Option<&str>, config_port: u16) -> u16 {
    if let Some(port) = cli {
        return port;
    }

    match env_port.map(str::trim).filter(|p| !p.is_empty()) {
        Some(raw) => match raw.parse() {
            Ok(port) => port,
            Err(_) => {
                warn!("Ignoring invalid PORT value '{}'", raw);
                config_port
            }
        },
        None => config_port,
    }
}

fn print_header(config: &Config, provider: &ProviderConfig, addr: SocketAddr) {
    println!();
    println!("{}", "═".repeat(60).bright_blue());
    println!("{}", "  CultureLens".bright_blue().bold());
    println!("{}", "═".repeat(60).bright_blue());
    println!("  {} {}", "Listening:".bold(), addr.to_string().bright_white());
    println!("  {} {}", "Provider: ".bold(), provider.api_base.dimmed());
    println!("  {} {}", "Model:    ".bold(), config.models.chat_model.bright_cyan());

    let narration = if config.narration.enabled {
        format!("{} ({})", config.models.voice, config.models.speech_model).green()
    } else {
        "disabled".to_string().yellow()
    };
    println!("  {} {}", "Narration:".bold(), narration);
    println!("{}", "─".repeat(60).dimmed());
    println!();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
