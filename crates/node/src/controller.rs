//! Simulated field controller: relays that follow `/sub` commands and report
//! their state on `/status`.

use serde_json::json;

/// Topic segments of the relay outputs, in status-report order.
pub const DEVICES: [&str; 4] = ["aquariumLight", "plantLight1", "plantLight2", "upMotor"];

/// Outbound publish produced by the controller.
pub type Outgoing = (String, Vec<u8>);

pub struct Controller {
    root: String,
    relays: [bool; 4],
}

impl Controller {
    pub fn new(root: &str) -> Self {
        Self {
            root: root.trim_end_matches('/').to_string(),
            relays: [false; 4],
        }
    }

    /// Device command topics plus the status-request topic.
    pub fn subscriptions(&self) -> Vec<String> {
        DEVICES
            .iter()
            .map(|d| format!("{}/{d}/sub", self.root))
            .chain(std::iter::once(format!("{}/request/status", self.root)))
            .collect()
    }

    /// Apply one inbound message and return what must be published in reply.
    pub fn handle(&mut self, topic: &str, payload: &[u8]) -> Vec<Outgoing> {
        let Some(rest) = topic
            .strip_prefix(self.root.as_str())
            .and_then(|r| r.strip_prefix('/'))
        else {
            return Vec::new();
        };

        if rest == "request/status" {
            return self.status_all();
        }

        let Some(segment) = rest.strip_suffix("/sub") else {
            return Vec::new();
        };
        let Some(idx) = DEVICES.iter().position(|d| *d == segment) else {
            return Vec::new();
        };

        self.relays[idx] = String::from_utf8_lossy(payload).trim() == "1";
        vec![self.status(idx)]
    }

    /// Current state of every relay.
    pub fn status_all(&self) -> Vec<Outgoing> {
        (0..DEVICES.len()).map(|i| self.status(i)).collect()
    }

    fn status(&self, idx: usize) -> Outgoing {
        let payload = if self.relays[idx] { "1" } else { "0" };
        (
            format!("{}/{}/status", self.root, DEVICES[idx]),
            payload.as_bytes().to_vec(),
        )
    }

    /// `{root}/system/status` message raising `status` ("emergency",
    /// "recovery" or anything else to clear).
    pub fn system_status(&self, status: &str, unix_ts: i64) -> Outgoing {
        let body = json!({ "status": status, "timestamp": unix_ts });
        (
            format!("{}/system/status", self.root),
            body.to_string().into_bytes(),
        )
    }
}

// ===========================================================================
// Tests
// ===========================================================================
