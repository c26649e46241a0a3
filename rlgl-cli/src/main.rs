//! rlgl: status sync server and pushing client.
//!
//! `rlgl serve` runs the hub and the read-side routes, `rlgl run` serves a
//! local YAML status document without a hub, `rlgl client` pushes a YAML
//! status document, `rlgl status` prints what the server holds and
//! `rlgl token` prints a fresh credential.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use rlgl_sync::readers::DEFAULT_EVENT_INTERVAL;
use rlgl_sync::server::{serve_local, ServerConfig, StatusServer, DEFAULT_SESSION_IDLE_TIMEOUT};
use rlgl_sync::{fetch_status, generate_token, StatusClient, StatusDocument};

#[derive(Parser, Debug)]
#[command(name = "rlgl")]
#[command(about = "Share contributor status between machines")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the status server
    Serve {
        /// Address to listen on
        #[arg(long, env = "RLGL_SERVER_ADDR", default_value = "0.0.0.0:8080")]
        addr: String,

        /// Credential push clients must present
        #[arg(long, env = "RLGL_TOKEN", hide_env_values = true)]
        token: String,

        /// Presence API endpoint
        #[arg(long, env = "RLGL_PRESENCE_API_URL", default_value = rlgl_sync::presence::DEFAULT_API_URL)]
        presence_api_url: String,

        /// Close push sessions idle for this many seconds (0 = never)
        #[arg(long, default_value_t = DEFAULT_SESSION_IDLE_TIMEOUT.as_secs())]
        idle_timeout_secs: u64,
    },

    /// Serve /config and /events from a local status document
    Run {
        /// Address to listen on
        #[arg(long, env = "RLGL_ADDR", default_value = "0.0.0.0:8080")]
        addr: String,

        /// Path to the YAML status document
        #[arg(long, env = "RLGL_CONFIG", default_value = "site.yaml")]
        config: PathBuf,
    },

    /// Push a status document to a server
    Client {
        /// WebSocket endpoint of the server
        #[arg(long, env = "RLGL_REMOTE_HOST", default_value = "ws://localhost:8080/ws")]
        server: String,

        /// Identity to push under
        #[arg(long, env = "RLGL_CLIENT_ID")]
        client_id: String,

        /// Credential for the server
        #[arg(long, env = "RLGL_TOKEN", hide_env_values = true)]
        token: String,

        /// Seconds between pushes
        #[arg(long, env = "RLGL_CLIENT_INTERVAL", default_value_t = 30)]
        interval_secs: u64,

        /// Push once and exit
        #[arg(long, env = "RLGL_CLIENT_ONCE")]
        once: bool,

        /// Path to the YAML status document
        #[arg(long, env = "RLGL_CONFIG", default_value = "rlgl.yaml")]
        config: PathBuf,
    },

    /// Print every document the server holds
    Status {
        /// HTTP root of the server
        #[arg(long, default_value = "http://localhost:8080")]
        server: String,
    },

    /// Print a new random credential
    Token,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Serve {
            addr,
            token,
            presence_api_url,
            idle_timeout_secs,
        } => {
            let config = ServerConfig {
                bind_addr: addr,
                auth_token: token,
                presence_api_url,
                session_idle_timeout: (idle_timeout_secs > 0)
                    .then(|| Duration::from_secs(idle_timeout_secs)),
                ..ServerConfig::default()
            };
            serve(config).await
        }
        Command::Run { addr, config } => {
            StatusDocument::load(&config)
                .with_context(|| format!("Failed to read {}", config.display()))?;
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("Failed to bind {addr}"))?;
            serve_local(listener, config, DEFAULT_EVENT_INTERVAL, shutdown_signal()).await?;
            Ok(())
        }
        Command::Client {
            server,
            client_id,
            token,
            interval_secs,
            once,
            config,
        } => {
            let mut client = StatusClient::new(server, client_id, token);
            let load = || StatusDocument::load(&config);
            if once {
                client.run_once(load).await?;
            } else {
                client
                    .run(Duration::from_secs(interval_secs.max(1)), load)
                    .await?;
            }
            Ok(())
        }
        Command::Status { server } => {
            let all = fetch_status(&server)
                .await
                .with_context(|| format!("Failed to fetch status from {server}"))?;
            println!("{}", serde_json::to_string_pretty(&all)?);
            Ok(())
        }
        Command::Token => {
            println!("{}", generate_token());
            Ok(())
        }
    }
}

async fn serve(config: ServerConfig) -> Result<()> {
    let addr = config.bind_addr.clone();
    let server = StatusServer::new(config).context("Invalid server configuration")?;
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    server.serve(listener, shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            log::error!("Failed to listen for shutdown signal: {e}");
            std::future::pending::<()>().await;
        }
    }
}
