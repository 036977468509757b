//! Conductor CLI
//!
//! Command-line access to a conductor's admin interface and app signals.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use client::{
    AdminWebsocket, AppWebsocket, ClientConfig, ConnectOptions, SigningCredentialsStore,
};
use protocol::messages::AppStatusFilter;
use serde_json::json;

/// Conductor CLI - inspect and manage a running conductor.
#[derive(Parser, Debug)]
#[command(name = "conductor-cli")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Admin interface URL, overriding the configuration
    #[arg(long, global = true, value_name = "URL")]
    pub admin_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Generate a new agent key
    GenerateAgent,

    /// List installed DNAs
    ListDnas,

    /// List cell ids of running cells
    ListCells,

    /// List installed apps and their cells
    ListApps {
        /// Only list apps in this status (enabled, disabled, running, stopped, paused)
        #[arg(long, value_parser = parse_status_filter)]
        status: Option<AppStatusFilter>,
    },

    /// List attached app interface ports
    ListInterfaces,

    /// Attach a new app interface
    AttachInterface {
        /// Port to listen on; the conductor picks one when omitted
        #[arg(long)]
        port: Option<u16>,
    },

    /// Enable an installed app
    EnableApp {
        /// Installed app id
        #[arg(long)]
        app_id: String,
    },

    /// Issue an app authentication token
    IssueToken {
        /// Installed app id
        #[arg(long)]
        app_id: String,

        /// Seconds until the token expires (0 = never)
        #[arg(long, default_value = "30")]
        expiry_seconds: u64,

        /// Allow the token to be used more than once
        #[arg(long)]
        multi_use: bool,
    },

    /// Print app signals until interrupted
    WatchSignals {
        /// App interface URL, overriding the configuration
        #[arg(long, value_name = "URL")]
        app_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(config_path) => ClientConfig::load(config_path)?,
        None => ClientConfig::load_default()?,
    };

    // Apply environment variable overrides
    config.apply_env_overrides();
    if let Some(url) = &cli.admin_url {
        config.connection.admin_url = url.clone();
    }
    if let Commands::WatchSignals {
        app_url: Some(url), ..
    } = &cli.command
    {
        config.connection.app_url = url.clone();
    }

    // Validate configuration
    config.validate()?;

    // Initialize tracing
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.log_level.to_lowercase()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let options = ConnectOptions::from_config(&config);

    if let Commands::WatchSignals { .. } = cli.command {
        return watch_signals(&config, &options).await;
    }

    let admin = AdminWebsocket::connect(&config.connection.admin_url, &options).await?;
    let output = run_admin_command(&admin, cli.command).await;
    admin.close().await;

    println!("{}", serde_json::to_string_pretty(&output?)?);
    Ok(())
}

async fn run_admin_command(
    admin: &AdminWebsocket,
    command: Commands,
) -> anyhow::Result<serde_json::Value> {
    let value = match command {
        Commands::GenerateAgent => {
            let agent = admin.generate_agent_pub_key().await?;
            json!({ "agent_pub_key": agent.to_string() })
        }
        Commands::ListDnas => {
            let dnas = admin.list_dnas().await?;
            json!(dnas.iter().map(ToString::to_string).collect::<Vec<_>>())
        }
        Commands::ListCells => {
            let cells = admin.list_cell_ids().await?;
            json!(cells
                .iter()
                .map(|cell| json!({
                    "dna_hash": cell.dna_hash().to_string(),
                    "agent_pub_key": cell.agent_pub_key().to_string(),
                }))
                .collect::<Vec<_>>())
        }
        Commands::ListApps { status } => {
            let apps = admin.list_apps(status).await?;
            json!(apps
                .iter()
                .map(|app| json!({
                    "installed_app_id": app.installed_app_id,
                    "cells": app
                        .cell_data
                        .iter()
                        .map(|cell| json!({
                            "role_name": cell.role_name,
                            "cell_id": cell.cell_id.to_string(),
                        }))
                        .collect::<Vec<_>>(),
                }))
                .collect::<Vec<_>>())
        }
        Commands::ListInterfaces => json!(admin.list_app_interfaces().await?),
        Commands::AttachInterface { port } => {
            json!({ "port": admin.attach_app_interface(port).await? })
        }
        Commands::EnableApp { app_id } => {
            let errors = admin.enable_app(&app_id).await?;
            json!({
                "installed_app_id": app_id,
                "errors": errors
                    .iter()
                    .map(|(cell, error)| json!({ "cell_id": cell.to_string(), "error": error }))
                    .collect::<Vec<_>>(),
            })
        }
        Commands::IssueToken {
            app_id,
            expiry_seconds,
            multi_use,
        } => {
            let issued = admin
                .issue_app_authentication_token(&app_id, expiry_seconds, !multi_use)
                .await?;
            json!({
                "token": issued.token,
                "expires_at": issued.expires_at,
                "single_use": issued.single_use,
            })
        }
        Commands::WatchSignals { .. } => {
            anyhow::bail!("watch-signals does not use the admin interface")
        }
    };
    Ok(value)
}

fn parse_status_filter(value: &str) -> Result<AppStatusFilter, String> {
    match value.to_ascii_lowercase().as_str() {
        "enabled" => Ok(AppStatusFilter::Enabled),
        "disabled" => Ok(AppStatusFilter::Disabled),
        "running" => Ok(AppStatusFilter::Running),
        "stopped" => Ok(AppStatusFilter::Stopped),
        "paused" => Ok(AppStatusFilter::Paused),
        other => Err(format!("unknown app status: {other}")),
    }
}

async fn watch_signals(config: &ClientConfig, options: &ConnectOptions) -> anyhow::Result<()> {
    let signer = Arc::new(SigningCredentialsStore::new(config.expiry_window())?);
    let app = AppWebsocket::connect(&config.connection.app_url, options, signer).await?;

    let _subscription = app.on_signal(|signal| {
        let payload = signal
            .decode::<serde_json::Value>()
            .unwrap_or_else(|_| json!({ "bytes": signal.payload.len() }));
        let line = json!({
            "cell_id": signal.cell_id.to_string(),
            "zome_name": signal.zome_name,
            "payload": payload,
        });
        println!("{line}");
    });

    tracing::info!(url = %config.connection.app_url, "Watching signals, press Ctrl-C to stop");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("Interrupted, closing connection");
            app.close().await;
        }
        info = app.connection().closed() => {
            tracing::warn!(code = ?info.code, reason = %info.reason, "Conductor closed the connection");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_issue_token() {
        let cli = Cli::try_parse_from([
            "conductor-cli",
            "--admin-url",
            "ws://localhost:1234",
            "issue-token",
            "--app-id",
            "forum",
            "--multi-use",
        ])
        .unwrap();

        assert_eq!(cli.admin_url.as_deref(), Some("ws://localhost:1234"));
        match cli.command {
            Commands::IssueToken {
                app_id,
                expiry_seconds,
                multi_use,
            } => {
                assert_eq!(app_id, "forum");
                assert_eq!(expiry_seconds, 30);
                assert!(multi_use);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_attach_interface_port_is_optional() {
        let cli = Cli::try_parse_from(["conductor-cli", "attach-interface"]).unwrap();
        assert!(matches!(cli.command, Commands::AttachInterface { port: None }));

        let cli = Cli::try_parse_from(["conductor-cli", "attach-interface", "--port", "30000"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::AttachInterface { port: Some(30000) }
        ));
    }

    #[test]
    fn test_cli_list_apps_status() {
        let cli = Cli::try_parse_from(["conductor-cli", "list-apps", "--status", "Running"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::ListApps {
                status: Some(AppStatusFilter::Running)
            }
        ));

        assert!(Cli::try_parse_from(["conductor-cli", "list-apps", "--status", "asleep"]).is_err());
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["conductor-cli"]).is_err());
    }

    #[test]
    fn test_cli_verify() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
