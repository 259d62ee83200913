mod config;
mod db;
mod dispatch;
mod error;
mod flags;
mod mqtt;
mod normalize;
mod recorder;
mod router;
mod session;
mod state;
mod web;

use anyhow::Result;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet};
use std::{env, sync::Arc};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use db::Db;
use mqtt::{SharedTransport, Topics};
use router::Routed;
use state::SystemState;
use web::AppState;

/// Outbound request queue depth for the MQTT client.
const MQTT_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> Result<()> {
    // ── Logging ─────────────────────────────────────────────────────
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let mut cfg = config::load(&config_path)?;
    cfg.apply_env();
    cfg.validate()?;

    // ── Database ────────────────────────────────────────────────────
    let db = Db::connect(&cfg.database.url).await?;
    db.migrate().await?;

    let mirrored = match db.load_system_flags().await {
        Ok(flags) => flags,
        Err(e) => {
            warn!("ignoring stored system flags: {e:#}");
            None
        }
    };
    info!(url = %cfg.database.url, ?mirrored, "db ready");

    // ── Shared state (ephemeral, live view) ─────────────────────────
    let shared = SystemState::shared();
    {
        let mut st = shared.write().await;
        st.flags_mirror = mirrored;
        st.record_system("hub started".to_string());
    }

    let topics = Arc::new(Topics::new(&cfg.topics.root));

    // ── MQTT ────────────────────────────────────────────────────────
    let mut mqttoptions = MqttOptions::new(&cfg.mqtt.client_id, &cfg.mqtt.host, cfg.mqtt.port);
    mqttoptions.set_keep_alive(cfg.mqtt.keep_alive());
    mqttoptions.set_clean_session(true);

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, MQTT_CAPACITY);
    let transport: SharedTransport = Arc::new(client);

    // ── Web server ──────────────────────────────────────────────────
    let app = AppState {
        shared: Arc::clone(&shared),
        db: db.clone(),
        topics: Arc::clone(&topics),
        transport: Arc::clone(&transport),
    };
    let web_port = cfg.web.port;
    tokio::spawn(async move {
        if let Err(e) = web::serve(app, web_port).await {
            error!("web server stopped: {e:#}");
        }
    });

    // ── History recorder ────────────────────────────────────────────
    tokio::spawn(recorder::run(
        Arc::clone(&shared),
        db.clone(),
        cfg.recorder.interval(),
    ));

    info!(
        host = %cfg.mqtt.host,
        port = cfg.mqtt.port,
        root = topics.root(),
        "connecting to broker"
    );

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                let routed = {
                    let mut st = shared.write().await;
                    match router::route(&mut st, &topics, &p.topic, &p.payload) {
                        Ok(routed) => Some(routed),
                        Err(e) => {
                            warn!(topic = %p.topic, "{e}");
                            st.record_error(e.to_string());
                            None
                        }
                    }
                };
                match routed {
                    Some(Routed::System(flags)) => db.mirror_system_flags(flags).await,
                    Some(Routed::Ignored) => debug!(topic = %p.topic, "unhandled topic"),
                    _ => {}
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                if let Err(e) = session::on_connected(&shared, transport.as_ref(), &topics).await {
                    error!("session setup failed: {e}");
                    shared.write().await.record_error(format!("session setup failed: {e}"));
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                session::on_disconnected(&shared, "broker sent disconnect").await;
            }
            Ok(_) => {}
            Err(e) => {
                session::on_disconnected(&shared, &e.to_string()).await;
                sleep(cfg.mqtt.reconnect_delay()).await;
            }
        }
    }
}
