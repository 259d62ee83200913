mod controller;
mod sim;

use anyhow::Result;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::{env, time::Duration};
use time::OffsetDateTime;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use controller::{Controller, Outgoing};
use sim::{EnvSim, Scenario};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn send(client: &AsyncClient, (topic, payload): Outgoing) {
    if let Err(e) = client.try_publish(&topic, QoS::AtLeastOnce, false, payload) {
        warn!(%topic, "publish error: {e}");
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    // Env config
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env_or("MQTT_PORT", 1883);
    let root = env::var("TOPIC_ROOT").unwrap_or_else(|_| "FarmSmart".to_string());
    let sample_every_s = env_or::<u64>("SAMPLE_EVERY_S", 5).max(1);
    let scenario = Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_default());
    let system_status = env::var("SIM_SYSTEM_STATUS").ok().filter(|s| !s.is_empty());

    let mut mqttoptions = MqttOptions::new("farmsmart-node", broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 32);

    // Relay side: follow commands, answer status requests.
    let relay_client = client.clone();
    let mut relays = Controller::new(&root);
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("node connected to mqtt");
                    for topic in relays.subscriptions() {
                        if let Err(e) = relay_client.try_subscribe(&topic, QoS::AtLeastOnce) {
                            warn!(%topic, "subscribe error: {e}");
                        }
                    }
                    for out in relays.status_all() {
                        send(&relay_client, out);
                    }
                    if let Some(status) = &system_status {
                        let ts = OffsetDateTime::now_utc().unix_timestamp();
                        send(&relay_client, relays.system_status(status, ts));
                        info!(%status, "system status raised");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(p))) => {
                    debug!(topic = %p.topic, "command received");
                    for out in relays.handle(&p.topic, &p.payload) {
                        info!(topic = %out.0, "relay status");
                        send(&relay_client, out);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("mqtt error: {e}. retrying...");
                    sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });

    let mut sim = EnvSim::new(scenario);
    info!(%root, scenario = %sim.scenario(), every_s = sample_every_s, "publishing readings");

    loop {
        let sample = sim.sample();
        let mut messages = sim::messages(&root, &sample);
        if sim.glitch() {
            let idx = fastrand::usize(..messages.len());
            messages[idx].1 = sim::glitch_payload();
            debug!(topic = %messages[idx].0, "glitched reading");
        }

        for (topic, body) in messages {
            if let Err(e) = client
                .publish(&topic, QoS::AtLeastOnce, false, body.to_string())
                .await
            {
                warn!(%topic, "publish error: {e}");
            }
        }
        debug!(?sample, "published readings");

        sleep(Duration::from_secs(sample_every_s)).await;
    }
}
