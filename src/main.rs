// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use mixlite::config::{self, ConfigSource};
use mixlite::engine;
use mixlite::proxy;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mixlite", about = "Two-stage reasoning relay behind one model name")]
struct Cli {
    /// Path to the mixlite.yaml config file
    #[arg(long, default_value = "mixlite.yaml", env = "MIXLITE_CONFIG")]
    config: PathBuf,

    /// Port to listen on (overrides listen_port in the config)
    #[arg(long, env = "MIXLITE_PORT")]
    port: Option<u16>,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0", env = "MIXLITE_HOST")]
    host: IpAddr,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let source = config::FileSource { path: cli.config };
    let config = match config::load_config(&source) {
        Ok(c) => std::sync::Arc::new(c),
        Err(e) => {
            tracing::error!(config = %source.origin(), "failed to load config: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        config = %source.origin(),
        version = %config.version,
        hybrid_model = %config.hybrid_model_name,
        thinking_model = %config.thinking.upstream.model,
        output_model = %config.output.upstream.model,
        show_cot = config.show_cot,
        tool_passthrough = config.output.tool_passthrough,
        "config loaded"
    );

    let addr = SocketAddr::new(cli.host, cli.port.unwrap_or(config.listen_port));
    let app = proxy::build_router(engine::build_engine(config));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind to address");

    tracing::info!(%addr, "mixlite listening");

    axum::serve(listener, app)
        .await
        .expect("server error");
}
