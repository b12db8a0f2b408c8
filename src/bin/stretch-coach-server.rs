// ABOUTME: Server binary wiring configuration, logging, and the HTTP surface
// ABOUTME: Loads environment configuration and runs the service until shutdown
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Stretch Coach Contributors

//! # Stretch Coach Server Binary
//!
//! Starts the stretching guide API: corpus index, generation backend,
//! `SQLite` session and account storage, and the HTTP routes.

use anyhow::Result;
use clap::Parser;
use stretch_coach::{config::ServerConfig, logging::LoggingConfig, server};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "stretch-coach-server")]
#[command(about = "Stretch Coach - personalized stretching guides over HTTP")]
pub struct Args {
    /// Override HTTP port
    #[arg(long)]
    http_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logging first so config loading can report what it resolved
    LoggingConfig::from_env().init()?;

    let mut config = ServerConfig::from_env()?;
    if let Some(http_port) = args.http_port {
        config.http_port = http_port;
    }

    info!(
        "Starting Stretch Coach server on {}:{}",
        config.http_host, config.http_port
    );

    if let Err(e) = server::run(config).await {
        error!("Server exited with error: {e}");
        return Err(e.into());
    }

    Ok(())
}
