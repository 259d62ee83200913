//! Inbound message routing: topic + payload in, state mutation out.
//!
//! Called once per message, in arrival order, with the state write lock
//! held by the caller.

use serde_json::Value;
use tracing::{debug, info};

use crate::error::HubError;
use crate::flags::SystemFlags;
use crate::mqtt::{
    parse_device_status, parse_system_status, AquariumReadingMsg, SensorTopic, TopicKind, Topics,
};
use crate::normalize::{normalize, normalize_field, Reading, SensorChannel};
use crate::state::{Device, SystemState};

/// What a routed message changed.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    Sensors(Vec<(SensorChannel, Reading)>),
    Device { device: Device, on: bool },
    System(SystemFlags),
    /// Topic not configured; dropped silently.
    Ignored,
}

pub fn route(
    state: &mut SystemState,
    topics: &Topics,
    topic: &str,
    payload: &[u8],
) -> Result<Routed, HubError> {
    let Some(kind) = topics.classify(topic) else {
        debug!(topic, "ignoring unconfigured topic");
        return Ok(Routed::Ignored);
    };

    match kind {
        TopicKind::SystemStatus => route_system(state, payload),
        // A device status is plain text whether or not it also parses as
        // JSON, so the malformed-payload fallback and the normal path agree.
        TopicKind::DeviceStatus(device) => {
            let on = parse_device_status(payload);
            state.set_device(device, on, true);
            state.record_device(device, on);
            Ok(Routed::Device { device, on })
        }
        TopicKind::Sensor(sensor) => {
            let data: Value = serde_json::from_slice(payload)
                .map_err(|e| HubError::ParseFailure(format!("{topic}: {e}")))?;
            let readings = sensor_readings(sensor, &data)
                .map_err(|e| HubError::ParseFailure(format!("{topic}: {e}")))?;

            for (channel, reading) in &readings {
                state.set_sensor(*channel, *reading);
            }
            state.record_reading(describe(&readings));
            Ok(Routed::Sensors(readings))
        }
    }
}

/// Full reset, then apply the requested flag.
fn route_system(state: &mut SystemState, payload: &[u8]) -> Result<Routed, HubError> {
    let msg = parse_system_status(payload)?;
    let next = state.flags().apply(msg.request);
    state.set_flags(next);

    info!(request = ?msg.request, timestamp = ?msg.timestamp, "system status received");
    state.record_system(format!(
        "system status: emergency={} recovery={}",
        next.emergency(),
        next.recovery()
    ));
    Ok(Routed::System(next))
}

fn sensor_readings(
    sensor: SensorTopic,
    data: &Value,
) -> Result<Vec<(SensorChannel, Reading)>, serde_json::Error> {
    let single = |c: SensorChannel| vec![(c, normalize(c, data))];

    Ok(match sensor {
        // Each field independently; Unknown ones are still written.
        SensorTopic::Air => SensorChannel::AIR
            .into_iter()
            .map(|c| (c, normalize_field(c, data)))
            .collect(),
        SensorTopic::WaterTemp => single(SensorChannel::WaterTemperature),
        SensorTopic::Ph => single(SensorChannel::Ph),
        SensorTopic::Ec => single(SensorChannel::Ec),
        // No Unknown fallback: the whole message is rejected if any field is
        // missing or non-numeric. Values arrive in display units.
        SensorTopic::Aquarium => {
            let msg: AquariumReadingMsg = serde_json::from_value(data.clone())?;
            vec![
                (
                    SensorChannel::WaterTemperature,
                    Reading::new(msg.temperature, SensorChannel::WaterTemperature.precision()),
                ),
                (
                    SensorChannel::Ph,
                    Reading::new(msg.ph, SensorChannel::Ph.precision()),
                ),
                (
                    SensorChannel::Ec,
                    Reading::new(msg.ec, SensorChannel::Ec.precision()),
                ),
            ]
        }
    })
}

fn describe(readings: &[(SensorChannel, Reading)]) -> String {
    readings
        .iter()
        .map(|(c, r)| format!("{c}={r}"))
        .collect::<Vec<_>>()
        .join(", ")
}

// ===========================================================================
// Tests
// ===========================================================================
