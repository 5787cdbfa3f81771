// src/main.rs

mod control;
mod events_ws;
use dotenv::dotenv;
use std::{error::Error, net::SocketAddr, sync::Arc};
use log::{info, warn, error};
use warp::Filter;
use swarm_observer_lib::{
    Context,                  // broadcast context
    CoordinatorService,       // session lifecycle
    SwarmConfig,
    sink::{FrameLogDisplay, InfluxSink, NodeRedSink, Telemetry, TelemetrySink},
};

/* RUST_LOG=swarm_observer_lib=debug,swarm_observer_server=info \
cargo run -p swarm_observer-server */

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> Result<(), Box<dyn Error>> {
    // ──────── ① Load .env if present ────────
    let dotenv_loaded = dotenv();

    // initialize logger and panic hook
    env_logger::init();
    std::panic::set_hook(Box::new(|info| {
        error!("Thread panic: {:?}", info);
    }));
    if let Err(e) = dotenv_loaded {
        warn!("No .env file loaded: {}", e);
    }

    // ──────── ② SWARM_* settings ────────
    let config = SwarmConfig::from_env()?;
    info!(
        "Swarm group {}:{} (bind {}), tick {:?}",
        config.group, config.port, config.bind_addr, config.tick_period
    );

    // ──────── 1) Telemetry sinks ────────
    let mut sinks: Vec<Arc<dyn TelemetrySink>> = Vec::new();
    if config.line_url.is_some() || config.bar_url.is_some() {
        sinks.push(Arc::new(NodeRedSink::new(
            config.line_url.clone(),
            config.bar_url.clone(),
            config.tick_period,
        )?));
    }
    if let Some(influx) = &config.influx {
        info!("Influx: {} bucket={}", influx.url, influx.bucket);
        sinks.push(Arc::new(InfluxSink::new(influx)?));
    }

    // build shared broadcast context (holds a broadcast::Sender<_>)
    let ctx = Context::new(1024);
    let coordinator = Arc::new(CoordinatorService::new(
        config.clone(),
        ctx,
        Box::new(FrameLogDisplay::new()),
        Telemetry::new(sinks),
    ));

    // ──────── 2) Optional session at launch ────────
    if config.autostart {
        match coordinator.start().await {
            Ok(addr) => info!("Session autostarted on {}", addr),
            Err(e) => error!("Autostart failed: {}", e),
        }
    } else {
        info!("POST /control/press to start logging and matrix visualization.");
    }

    // ──────── 3) HTTP (health + control + events) ────────
    let health = warp::path!("health").map(|| "OK");
    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["OPTIONS", "GET", "POST"])
        .allow_headers(vec!["content-type", "accept", "last-event-id", "origin"]);
    let routes = health
        .or(control::routes(coordinator.clone()))
        .or(events_ws::ws_routes(coordinator.clone()))
        .with(cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    info!("HTTP  : {} (health, status, control, events)", addr);
    info!("WS    : {}/ws", addr);

    let (_, server) = warp::serve(routes).bind_with_graceful_shutdown(addr, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for ctrl-c: {}", e);
        }
        info!("Interrupted by user.");
    });
    server.await;

    // ──────── 4) Tear down like a stop press ────────
    coordinator.shutdown().await;
    info!("Program terminated.");
    Ok(())
}
