//! Broker connection lifecycle.
//!
//! Missed messages are never replayed, so every (re)connect resubscribes and
//! asks the field controller for a full status snapshot.

use rumqttc::QoS;
use tracing::{info, warn};

use crate::error::HubError;
use crate::mqtt::{Topics, Transport};
use crate::state::SharedState;

/// Payload of the "request all status" message.
pub const REQUEST_ALL: &str = "all";

/// Handle a ConnAck: resubscribe, request status once, then mark connected.
///
/// The hub only reports connected once the session is fully set up, so a
/// failed subscribe leaves toggles refused until the next ConnAck.
pub async fn on_connected(
    shared: &SharedState,
    transport: &dyn Transport,
    topics: &Topics,
) -> Result<(), HubError> {
    let subs = topics.subscriptions();
    for topic in &subs {
        transport.subscribe(topic, QoS::AtLeastOnce)?;
    }
    info!(count = subs.len(), "subscribed");

    transport.publish(
        &topics.request_status(),
        QoS::AtMostOnce,
        REQUEST_ALL.into(),
    )?;
    info!("status snapshot requested");

    let mut st = shared.write().await;
    st.mqtt_connected = true;
    st.record_system("mqtt connected".to_string());
    info!(root = topics.root(), "mqtt connected");
    Ok(())
}

/// Handle a broker disconnect or event-loop error.
pub async fn on_disconnected(shared: &SharedState, reason: &str) {
    warn!(reason, "mqtt disconnected");
    let mut st = shared.write().await;
    let was_connected = std::mem::replace(&mut st.mqtt_connected, false);
    if was_connected {
        st.record_error(format!("mqtt disconnected: {reason}"));
    }
}

// ===========================================================================
// Tests
// ===========================================================================
