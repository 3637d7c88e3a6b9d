/**
 * AICO FIRE KERNEL - Point d'entrée du service de télémétrie
 *
 * RÔLE : Orchestration : config, pipeline, appareils, liaison MQTT, démo, API HTTP.
 *
 * ARCHITECTURE : broker MQTT (ou démo) -> pipeline -> observers + API REST.
 * ARRÊT : Ctrl-C -> arrêt HTTP, démo puis superviseur MQTT (timers annulés).
 */

use aicofire_kernel::config::load_config;
use aicofire_kernel::http::{self, AppState};
use aicofire_kernel::mqtt::spawn_mqtt_supervisor;
use aicofire_kernel::simulator::spawn_demo;
use aicofire_kernel::{LoggingObserver, TelemetryPipeline};
use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("aicofire_kernel=info")))
        .init();

    let cfg = load_config().await.context("loading configuration")?;
    let catalog = cfg.catalog().context("building sensor catalog")?;

    let pipeline = TelemetryPipeline::new(cfg.store.clone(), catalog, &cfg.alerts, cfg.frame.layout);
    for info in &cfg.devices {
        pipeline.register_device(info.clone()).with_context(|| format!("registering device {}", info.id))?;
    }
    if pipeline.device(&cfg.mqtt.device_id).is_none() && !cfg.store.auto_register {
        tracing::warn!(device_id = %cfg.mqtt.device_id, "mqtt.device_id is not a registered device, frames will be rejected");
    }
    pipeline.subscribe(Arc::new(LoggingObserver));

    // La démo remplace le broker
    let (mqtt, demo) = if cfg.demo.enabled {
        let demo = spawn_demo(&cfg.demo, cfg.mqtt.device_id.clone(), cfg.frame.layout, pipeline.clone());
        (None, Some(demo))
    } else {
        let mqtt = spawn_mqtt_supervisor(cfg.mqtt.clone(), cfg.reconnect.clone(), pipeline.clone());
        (Some(mqtt), None)
    };

    let app_state = AppState {
        pipeline: pipeline.clone(),
        mqtt: mqtt.as_ref().map(|m| m.control()),
        api_key: cfg.http.api_key.clone(),
    };
    let app = http::build_router(app_state);

    let addr: SocketAddr = cfg.http.bind.parse().with_context(|| format!("invalid http bind {}", cfg.http.bind))?;
    let listener = TcpListener::bind(addr).await.with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, devices = cfg.devices.len(), demo = cfg.demo.enabled, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutdown requested");
        })
        .await
        .context("http server")?;

    if let Some(demo) = demo {
        demo.stop().await;
    }
    if let Some(mqtt) = mqtt {
        mqtt.shutdown().await;
    }
    tracing::info!("kernel stopped");
    Ok(())
}
