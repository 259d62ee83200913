//! System flags (`emergency` / `recovery`) and the rules that keep them
//! mutually exclusive.
//!
//! [`SystemFlags`] can only be built in a valid state, so any value that
//! reaches the state store already satisfies "at most one flag set".

use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "FlagPair")]
pub struct SystemFlags {
    emergency: bool,
    recovery: bool,
}

/// Unchecked wire form, validated on deserialization.
#[derive(Deserialize)]
struct FlagPair {
    emergency: bool,
    recovery: bool,
}

impl TryFrom<FlagPair> for SystemFlags {
    type Error = String;

    fn try_from(p: FlagPair) -> Result<Self, Self::Error> {
        SystemFlags::from_pair(p.emergency, p.recovery)
            .ok_or_else(|| "emergency and recovery cannot both be set".to_string())
    }
}

/// One of the two named flags, as addressed by a local toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemFlag {
    Emergency,
    Recovery,
}

/// What an inbound system-status message asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagRequest {
    Emergency,
    Recovery,
    Clear,
}

impl FlagRequest {
    /// Map a `status` string; anything unrecognised clears both flags.
    pub fn from_status(status: Option<&str>) -> Self {
        match status {
            Some("emergency") => FlagRequest::Emergency,
            Some("recovery") => FlagRequest::Recovery,
            _ => FlagRequest::Clear,
        }
    }
}

impl FromStr for SystemFlag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "emergency" => Ok(SystemFlag::Emergency),
            "recovery" => Ok(SystemFlag::Recovery),
            _ => Err(format!("unknown system flag '{s}'")),
        }
    }
}

impl SystemFlags {
    pub const CLEAR: SystemFlags = SystemFlags {
        emergency: false,
        recovery: false,
    };
    pub const EMERGENCY: SystemFlags = SystemFlags {
        emergency: true,
        recovery: false,
    };
    pub const RECOVERY: SystemFlags = SystemFlags {
        emergency: false,
        recovery: true,
    };

    /// Build from a raw pair; `None` when both are set.
    pub fn from_pair(emergency: bool, recovery: bool) -> Option<Self> {
        (!(emergency && recovery)).then_some(SystemFlags {
            emergency,
            recovery,
        })
    }

    pub fn emergency(&self) -> bool {
        self.emergency
    }

    pub fn recovery(&self) -> bool {
        self.recovery
    }

    /// Full reset, then set the requested flag. The previous pair never
    /// leaks into the result.
    pub fn apply(self, requested: FlagRequest) -> SystemFlags {
        match requested {
            FlagRequest::Emergency => SystemFlags::EMERGENCY,
            FlagRequest::Recovery => SystemFlags::RECOVERY,
            FlagRequest::Clear => SystemFlags::CLEAR,
        }
    }

    /// Flip one flag; if it ends up set, the other is cleared.
    pub fn toggle(self, flag: SystemFlag) -> SystemFlags {
        match flag {
            SystemFlag::Emergency if self.emergency => SystemFlags {
                emergency: false,
                ..self
            },
            SystemFlag::Emergency => SystemFlags::EMERGENCY,
            SystemFlag::Recovery if self.recovery => SystemFlags {
                recovery: false,
                ..self
            },
            SystemFlag::Recovery => SystemFlags::RECOVERY,
        }
    }

    /// Motor start means the system no longer needs manual recovery.
    pub fn on_motor_on(self) -> SystemFlags {
        SystemFlags {
            recovery: false,
            ..self
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
