use actix_web::{web, App, HttpServer};
use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;

mod agent;
mod api;
mod cli;
mod config;
mod metrics;
mod models;
mod services;
mod state;

use agent::Agent;
use api::{get_metrics, get_snapshot, health};
use cli::CommandArgs;
use config::Config;
use state::new_state;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = CommandArgs::parse();

    log::info!("Starting VPS Agent...");
    let config = Config::load(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?;
    let node = config.agent_settings.node_name();
    log::info!(
        "Configuration loaded: node={}, interval={:?}, {} project(s)",
        node,
        config.agent_settings.interval(),
        config.projects.len()
    );

    let state = new_state(&node);
    let mut agent = Agent::new(config, &node, state.clone())?;

    if args.once {
        let metrics = agent.collect().await?;
        println!("{}", serde_json::to_string_pretty(&metrics)?);
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let driver = agent.spawn(shutdown_rx)?;

    print_banner(&args, &node);

    let bind_address = format!("{}:{}", args.address, args.port);
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .route("/metrics", web::get().to(get_metrics))
            .route("/api/snapshot", web::get().to(get_snapshot))
            .route("/health", web::get().to(health))
    })
    .bind(&bind_address)
    .with_context(|| format!("failed to bind status server to {}", bind_address))?
    .run();

    let served = server.await;

    log::info!("Received shutdown signal, stopping agent driver...");
    let _ = shutdown_tx.send(true);
    if driver.join().is_err() {
        log::error!("Agent driver thread panicked");
    }
    log::info!("VPS Agent stopped.");

    served.context("status server failed")
}

fn print_banner(args: &CommandArgs, node: &str) {
    println!("╔═══════════════════════════════════════════════════════════╗");
    println!("║      VPS Agent v{:<42}║", env!("CARGO_PKG_VERSION"));
    println!("║      Project metrics, plugins and remote tasks            ║");
    println!("╚═══════════════════════════════════════════════════════════╝");
    println!();
    println!("🚀 Status server starting on http://{}:{}", args.address, args.port);
    println!("🖥  Node: {}", node);
    println!();
    println!("📋 Available endpoints:");
    println!("  GET    /metrics                - Prometheus metrics");
    println!("  GET    /api/snapshot           - Last collected snapshot");
    println!("  GET    /health                 - Health check");
    println!("═══════════════════════════════════════════════════════════");
}
