use rumqttc::{AsyncClient, QoS};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::HubError;
use crate::flags::FlagRequest;
use crate::state::Device;

// ---------------------------------------------------------------------------
// Topic layout
// ---------------------------------------------------------------------------

/// Sensor topics published by the field controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorTopic {
    /// `<root>/SCDsensor/pub`: temperature, humidity, co2 together.
    Air,
    WaterTemp,
    Ph,
    Ec,
    /// `<root>/aquariumSensor/pub`: temperature, ph, ec together.
    Aquarium,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    Sensor(SensorTopic),
    DeviceStatus(Device),
    SystemStatus,
}

/// Hierarchical topic names under one root, e.g. `FarmSmart/ph/pub`.
#[derive(Debug, Clone)]
pub struct Topics {
    root: String,
}

impl Topics {
    pub fn new(root: &str) -> Self {
        Self {
            root: root.trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn sensor(&self, t: SensorTopic) -> String {
        let segment = match t {
            SensorTopic::Air => "SCDsensor",
            SensorTopic::WaterTemp => "watertemp",
            SensorTopic::Ph => "ph",
            SensorTopic::Ec => "ec",
            SensorTopic::Aquarium => "aquariumSensor",
        };
        format!("{}/{segment}/pub", self.root)
    }

    /// Where commands for `device` are published.
    pub fn control(&self, device: Device) -> String {
        format!("{}/{}/sub", self.root, device.topic_segment())
    }

    /// Where `device` reports its own state.
    pub fn status(&self, device: Device) -> String {
        format!("{}/{}/status", self.root, device.topic_segment())
    }

    pub fn system_status(&self) -> String {
        format!("{}/system/status", self.root)
    }

    pub fn request_status(&self) -> String {
        format!("{}/request/status", self.root)
    }

    /// Every topic the hub listens on.
    pub fn subscriptions(&self) -> Vec<String> {
        let sensors = [
            SensorTopic::Air,
            SensorTopic::WaterTemp,
            SensorTopic::Ph,
            SensorTopic::Ec,
            SensorTopic::Aquarium,
        ];
        sensors
            .into_iter()
            .map(|t| self.sensor(t))
            .chain(Device::ALL.into_iter().map(|d| self.status(d)))
            .chain(std::iter::once(self.system_status()))
            .collect()
    }

    /// Classify an inbound topic. `None` for anything not configured.
    pub fn classify(&self, topic: &str) -> Option<TopicKind> {
        let rest = topic.strip_prefix(self.root.as_str())?.strip_prefix('/')?;
        let parts: Vec<&str> = rest.split('/').collect();
        if parts.len() != 2 {
            return None;
        }
        match (parts[0], parts[1]) {
            ("SCDsensor", "pub") => Some(TopicKind::Sensor(SensorTopic::Air)),
            ("watertemp", "pub") => Some(TopicKind::Sensor(SensorTopic::WaterTemp)),
            ("ph", "pub") => Some(TopicKind::Sensor(SensorTopic::Ph)),
            ("ec", "pub") => Some(TopicKind::Sensor(SensorTopic::Ec)),
            ("aquariumSensor", "pub") => Some(TopicKind::Sensor(SensorTopic::Aquarium)),
            ("system", "status") => Some(TopicKind::SystemStatus),
            (segment, "status") => Device::from_topic_segment(segment).map(TopicKind::DeviceStatus),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// MQTT message types
// ---------------------------------------------------------------------------

/// Combined aquarium reading. Every field is required and numeric; the
/// values are already in display units.
#[derive(Debug, Deserialize)]
pub(crate) struct AquariumReadingMsg {
    pub(crate) temperature: f64,
    pub(crate) ph: f64,
    pub(crate) ec: f64,
}

/// Parsed `<root>/system/status` message.
#[derive(Debug)]
pub(crate) struct SystemStatusMsg {
    pub(crate) request: FlagRequest,
    pub(crate) timestamp: Option<serde_json::Value>,
}

/// Parse a `{status, timestamp}` payload. A missing or unrecognised status
/// clears both flags; only a payload that is not JSON is a failure.
pub(crate) fn parse_system_status(payload: &[u8]) -> Result<SystemStatusMsg, HubError> {
    let v: serde_json::Value = serde_json::from_slice(payload)
        .map_err(|e| HubError::ParseFailure(format!("system status: {e}")))?;
    Ok(SystemStatusMsg {
        request: FlagRequest::from_status(v.get("status").and_then(|s| s.as_str())),
        timestamp: v.get("timestamp").cloned(),
    })
}

/// `"1"` means on, anything else means off.
pub(crate) fn parse_device_status(payload: &[u8]) -> bool {
    String::from_utf8_lossy(payload).trim() == "1"
}

/// Command payload for a device control topic.
pub(crate) fn device_command(on: bool) -> &'static str {
    if on {
        "1"
    } else {
        "0"
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Outbound side of the broker connection. Both calls only enqueue a
/// request; the event loop does the network I/O.
pub trait Transport: Send + Sync {
    fn publish(&self, topic: &str, qos: QoS, payload: Vec<u8>) -> Result<(), HubError>;
    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), HubError>;
}

pub type SharedTransport = Arc<dyn Transport>;

impl Transport for AsyncClient {
    fn publish(&self, topic: &str, qos: QoS, payload: Vec<u8>) -> Result<(), HubError> {
        self.try_publish(topic, qos, false, payload)?;
        Ok(())
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), HubError> {
        self.try_subscribe(topic, qos)?;
        Ok(())
    }
}


// ===========================================================================
// Tests
// ===========================================================================
