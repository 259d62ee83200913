use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::flags::SystemFlags;
use crate::normalize::{Reading, SensorChannel};

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    AquariumLight,
    PlantLight1,
    PlantLight2,
    UpMotor,
}

impl Device {
    pub const ALL: [Device; 4] = [
        Device::AquariumLight,
        Device::PlantLight1,
        Device::PlantLight2,
        Device::UpMotor,
    ];

    /// Topic segment used by the field controller, e.g. `plantLight1`.
    pub fn topic_segment(self) -> &'static str {
        match self {
            Device::AquariumLight => "aquariumLight",
            Device::PlantLight1 => "plantLight1",
            Device::PlantLight2 => "plantLight2",
            Device::UpMotor => "upMotor",
        }
    }

    pub fn from_topic_segment(segment: &str) -> Option<Self> {
        Device::ALL
            .into_iter()
            .find(|d| d.topic_segment() == segment)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Device::AquariumLight => "aquarium_light",
            Device::PlantLight1 => "plant_light_1",
            Device::PlantLight2 => "plant_light_2",
            Device::UpMotor => "up_motor",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts both the API name (`plant_light_1`) and the topic segment
/// (`plantLight1`).
impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Device::ALL
            .into_iter()
            .find(|d| d.as_str() == s || d.topic_segment() == s)
            .ok_or_else(|| format!("unknown device '{s}'"))
    }
}

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct SystemState {
    pub started_at: Instant,
    pub mqtt_connected: bool,
    /// Flags persisted by the previous run, shown to the UI for warm start.
    /// Never used to seed `flags`.
    pub flags_mirror: Option<SystemFlags>,
    sensors: BTreeMap<SensorChannel, SensorState>,
    devices: BTreeMap<Device, DeviceState>,
    flags: SystemFlags,
    events: VecDeque<SystemEvent>,
}

#[derive(Clone, Copy, Default)]
pub struct SensorState {
    pub reading: Reading,
    pub last_seen: Option<OffsetDateTime>,
}

#[derive(Clone, Copy, Default, Serialize)]
pub struct DeviceState {
    pub on: bool,
    /// Set by an optimistic write, cleared by the next authoritative one.
    pub pending: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_changed: Option<OffsetDateTime>,
}

#[derive(Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Reading,
    Device,
    Command,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct SensorView {
    pub value: Reading,
    pub display: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_seen: Option<OffsetDateTime>,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub mqtt_connected: bool,
    pub sensors: BTreeMap<SensorChannel, SensorView>,
    pub devices: BTreeMap<Device, DeviceState>,
    pub flags: SystemFlags,
    pub flags_mirror: Option<SystemFlags>,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl Default for SystemState {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemState {
    /// Every sensor unknown, every device off, both flags clear.
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            mqtt_connected: false,
            flags_mirror: None,
            sensors: SensorChannel::ALL
                .into_iter()
                .map(|c| (c, SensorState::default()))
                .collect(),
            devices: Device::ALL
                .into_iter()
                .map(|d| (d, DeviceState::default()))
                .collect(),
            flags: SystemFlags::CLEAR,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    pub fn shared() -> SharedState {
        Arc::new(RwLock::new(Self::new()))
    }

    // -- Sensors ------------------------------------------------------------

    /// Last write wins; arrival order is taken as recency order.
    pub fn set_sensor(&mut self, channel: SensorChannel, reading: Reading) {
        self.sensors.insert(
            channel,
            SensorState {
                reading,
                last_seen: Some(OffsetDateTime::now_utc()),
            },
        );
    }

    #[cfg(test)]
    pub fn sensor(&self, channel: SensorChannel) -> Reading {
        self.sensor_state(channel).reading
    }

    pub fn sensor_state(&self, channel: SensorChannel) -> SensorState {
        self.sensors.get(&channel).copied().unwrap_or_default()
    }

    // -- Devices ------------------------------------------------------------

    /// Authoritative writes come from the device's own status topic and
    /// always override. Optimistic writes are predictions that the next
    /// authoritative write may revert.
    pub fn set_device(&mut self, device: Device, on: bool, authoritative: bool) {
        let entry = self.devices.entry(device).or_default();
        if entry.on != on || entry.last_changed.is_none() {
            entry.last_changed = Some(OffsetDateTime::now_utc());
        }
        entry.on = on;
        entry.pending = !authoritative;
    }

    pub fn device(&self, device: Device) -> bool {
        self.device_state(device).on
    }

    pub fn device_state(&self, device: Device) -> DeviceState {
        self.devices.get(&device).copied().unwrap_or_default()
    }

    // -- Flags --------------------------------------------------------------

    pub fn flags(&self) -> SystemFlags {
        self.flags
    }

    /// `SystemFlags` cannot hold both flags set, so every stored pair is
    /// already reconciled.
    pub fn set_flags(&mut self, next: SystemFlags) {
        self.flags = next;
    }

    // -- Events -------------------------------------------------------------

    pub fn record_reading(&mut self, detail: String) {
        self.push_event(EventKind::Reading, detail);
    }

    pub fn record_device(&mut self, device: Device, on: bool) {
        let state_str = if on { "ON" } else { "OFF" };
        self.push_event(EventKind::Device, format!("{device} reported {state_str}"));
    }

    pub fn record_command(&mut self, detail: String) {
        self.push_event(EventKind::Command, detail);
    }

    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    #[cfg(test)]
    pub fn events(&self) -> impl Iterator<Item = &SystemEvent> {
        self.events.iter()
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            mqtt_connected: self.mqtt_connected,
            sensors: self
                .sensors
                .iter()
                .map(|(c, s)| {
                    (
                        *c,
                        SensorView {
                            value: s.reading,
                            display: s.reading.to_string(),
                            last_seen: s.last_seen,
                        },
                    )
                })
                .collect(),
            devices: self.devices.clone(),
            flags: self.flags,
            flags_mirror: self.flags_mirror,
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -- Initial state ------------------------------------------------------

    #[test]
    fn new_state_is_all_unknown_and_off() {
        let st = SystemState::new();
        for c in SensorChannel::ALL {
            assert_eq!(st.sensor(c), Reading::Unknown);
            assert!(st.sensor_state(c).last_seen.is_none());
        }
        for d in Device::ALL {
            assert!(!st.device(d));
            assert!(!st.device_state(d).pending);
        }
        assert_eq!(st.flags(), SystemFlags::CLEAR);
        assert!(!st.mqtt_connected);
    }

    // -- Sensors ------------------------------------------------------------

    #[test]
    fn set_sensor_last_write_wins() {
        let mut st = SystemState::new();
        st.set_sensor(SensorChannel::Ph, Reading::new(7.1, 2));
        st.set_sensor(SensorChannel::Ph, Reading::Unknown);
        assert_eq!(st.sensor(SensorChannel::Ph), Reading::Unknown);
        assert!(st.sensor_state(SensorChannel::Ph).last_seen.is_some());
    }

    // -- Devices ------------------------------------------------------------

    #[test]
    fn optimistic_write_is_pending_until_authoritative() {
        let mut st = SystemState::new();
        st.set_device(Device::UpMotor, true, false);
        assert!(st.device(Device::UpMotor));
        assert!(st.device_state(Device::UpMotor).pending);

        st.set_device(Device::UpMotor, false, true);
        assert!(!st.device(Device::UpMotor));
        assert!(!st.device_state(Device::UpMotor).pending);
    }

    #[test]
    fn authoritative_write_sets_last_changed() {
        let mut st = SystemState::new();
        st.set_device(Device::PlantLight2, false, true);
        assert!(st.device_state(Device::PlantLight2).last_changed.is_some());
    }

    #[test]
    fn device_from_str_accepts_both_spellings() {
        assert_eq!("plant_light_1".parse::<Device>(), Ok(Device::PlantLight1));
        assert_eq!("plantLight1".parse::<Device>(), Ok(Device::PlantLight1));
        assert_eq!("upMotor".parse::<Device>(), Ok(Device::UpMotor));
        assert!("fan".parse::<Device>().is_err());
    }

    #[test]
    fn device_topic_segment_roundtrip() {
        for d in Device::ALL {
            assert_eq!(Device::from_topic_segment(d.topic_segment()), Some(d));
        }
        assert_eq!(Device::from_topic_segment("system"), None);
    }

    // -- Events -------------------------------------------------------------

    #[test]
    fn event_ring_is_bounded() {
        let mut st = SystemState::new();
        for i in 0..(MAX_EVENTS + 25) {
            st.record_system(format!("event {i}"));
        }
        assert_eq!(st.events().count(), MAX_EVENTS);
        assert_eq!(st.events().next().unwrap().detail, "event 25");
    }

    // -- Snapshot -----------------------------------------------------------

    #[test]
    fn status_snapshot_serializes_expected_shape() {
        let mut st = SystemState::new();
        st.set_sensor(SensorChannel::WaterTemperature, Reading::new(23.5, 1));
        st.set_device(Device::AquariumLight, true, true);
        st.set_flags(SystemFlags::EMERGENCY);
        st.record_system("hello".into());

        let json = serde_json::to_value(st.to_status()).unwrap();
        assert_eq!(json["sensors"]["water_temperature"]["value"], 23.5);
        assert_eq!(json["sensors"]["water_temperature"]["display"], "23.5");
        assert_eq!(json["sensors"]["ph"]["value"], serde_json::Value::Null);
        assert_eq!(json["sensors"]["ph"]["display"], "--");
        assert_eq!(json["devices"]["aquarium_light"]["on"], true);
        assert_eq!(json["flags"]["emergency"], true);
        assert_eq!(json["flags"]["recovery"], false);
        assert_eq!(json["events"][0]["kind"], "system");
    }

    #[test]
    fn snapshot_is_detached_from_later_writes() {
        let mut st = SystemState::new();
        let before = st.to_status();
        st.set_device(Device::UpMotor, true, true);
        assert!(!before.devices[&Device::UpMotor].on);
    }
}
