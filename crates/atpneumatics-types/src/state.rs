//! Integer-coded state enumerations shared by the CSC and the controller.

use serde_repr::{Deserialize_repr, Serialize_repr};

/// State of an on/off air valve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum AirValveState {
    Invalid = 1,
    Opened = 2,
    Closed = 3,
}

impl AirValveState {
    pub fn from_open(open: bool) -> Self {
        if open {
            AirValveState::Opened
        } else {
            AirValveState::Closed
        }
    }
}

/// Aggregate state of the four M1 mirror cover petals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum MirrorCoverState {
    Invalid = 1,
    Opened = 2,
    Closed = 3,
    InMotion = 4,
}

/// State of the M1 cell vents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum CellVentState {
    Invalid = 1,
    Opened = 2,
    Closed = 3,
    InMotion = 4,
}

/// Position of the M1 vents as reported by the limit switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum VentsPosition {
    Opened = 1,
    Closed = 2,
    PartiallyOpened = 3,
}

/// CSC summary state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum SummaryState {
    Disabled = 1,
    Enabled = 2,
    Fault = 3,
    Offline = 4,
    Standby = 5,
}

impl std::fmt::Display for SummaryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SummaryState::Disabled => "DISABLED",
            SummaryState::Enabled => "ENABLED",
            SummaryState::Fault => "FAULT",
            SummaryState::Offline => "OFFLINE",
            SummaryState::Standby => "STANDBY",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for SummaryState {
    type Err = crate::PneumaticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DISABLED" => Ok(SummaryState::Disabled),
            "ENABLED" => Ok(SummaryState::Enabled),
            "FAULT" => Ok(SummaryState::Fault),
            "OFFLINE" => Ok(SummaryState::Offline),
            "STANDBY" => Ok(SummaryState::Standby),
            _ => Err(crate::PneumaticsError::InvalidConfig(format!(
                "unknown summary state '{s}'"
            ))),
        }
    }
}
