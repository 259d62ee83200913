//! User-initiated commands: device toggles and local system-flag toggles.

use rumqttc::QoS;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::HubError;
use crate::flags::{SystemFlag, SystemFlags};
use crate::mqtt::{device_command, Topics, Transport};
use crate::state::{Device, SharedState};

/// Result of a successful device toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Toggled {
    pub device: Device,
    /// State that was requested from the device.
    pub on: bool,
    pub flags: SystemFlags,
    /// True when the motor start cleared `recovery`.
    pub recovery_cleared: bool,
}

/// Publish the negation of `device`'s current state to its control topic.
///
/// Lights change only when their status echo arrives. The up motor is
/// applied optimistically, and starting it clears `recovery` right away.
/// The write lock is held for the whole call so a toggle never interleaves
/// with message routing.
pub async fn toggle(
    shared: &SharedState,
    transport: &dyn Transport,
    topics: &Topics,
    device: Device,
) -> Result<Toggled, HubError> {
    let mut st = shared.write().await;
    if !st.mqtt_connected {
        warn!(%device, "toggle refused: mqtt not connected");
        return Err(HubError::NotConnected);
    }

    let next = !st.device(device);
    let qos = match device {
        Device::UpMotor => QoS::AtLeastOnce,
        _ => QoS::AtMostOnce,
    };

    if let Err(e) = transport.publish(&topics.control(device), qos, device_command(next).into()) {
        st.record_error(format!("{device} command failed: {e}"));
        return Err(e);
    }

    let state_str = if next { "ON" } else { "OFF" };
    info!(%device, on = next, "device command sent");
    st.record_command(format!("{device} set {state_str}"));

    let mut recovery_cleared = false;
    if device == Device::UpMotor {
        st.set_device(device, next, false);
        if next && st.flags().recovery() {
            let flags = st.flags().on_motor_on();
            st.set_flags(flags);
            recovery_cleared = true;
            info!("recovery cleared by motor start");
            st.record_system("recovery cleared by motor start".to_string());
        }
    }

    Ok(Toggled {
        device,
        on: next,
        flags: st.flags(),
        recovery_cleared,
    })
}

/// Local EMERGENCY / RECOVERY button. Nothing is published.
pub async fn toggle_flag(shared: &SharedState, flag: SystemFlag) -> SystemFlags {
    let mut st = shared.write().await;
    let next = st.flags().toggle(flag);
    st.set_flags(next);
    st.record_system(format!(
        "{flag:?} toggled: emergency={} recovery={}",
        next.emergency(),
        next.recovery()
    ));
    next
}

// ===========================================================================
// Tests
// ===========================================================================
