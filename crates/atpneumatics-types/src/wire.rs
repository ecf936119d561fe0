//! JSON messages exchanged with the pneumatics controller.
//!
//! Both TCP channels carry one JSON object per message, terminated by
//! [`TERMINATOR`].  Every object has an `id` field: a `cmd_*` token for
//! commands, an [`Ack`] code for command responses, `evt_*` for events and
//! `tel_*` for telemetry.

use serde::{Deserialize, Serialize};

use crate::state::{AirValveState, CellVentState, MirrorCoverState, SummaryState, VentsPosition};

/// Message terminator on both channels.
pub const TERMINATOR: &[u8] = b"\r\n";

/// Controller response code for a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ack {
    /// Command accepted, execution started.
    Ack,
    /// Command rejected (malformed, unknown, or out of sequence).
    Noack,
    /// Command completed.
    Success,
    /// Command failed while executing.
    Fail,
}

/// A command as written to the command/event channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub id: String,
    pub sequence_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
}

/// Controller response to a [`CommandRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub id: Ack,
    pub sequence_id: u64,
}

/// Limit switches of the four M1 cover petals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct M1CoverLimitSwitches {
    pub cover1_closed_active: bool,
    pub cover2_closed_active: bool,
    pub cover3_closed_active: bool,
    pub cover4_closed_active: bool,
    pub cover1_opened_active: bool,
    pub cover2_opened_active: bool,
    pub cover3_opened_active: bool,
    pub cover4_opened_active: bool,
}

impl M1CoverLimitSwitches {
    /// All four petals reporting the same switch pair.
    pub fn uniform(closed: bool, opened: bool) -> Self {
        Self {
            cover1_closed_active: closed,
            cover2_closed_active: closed,
            cover3_closed_active: closed,
            cover4_closed_active: closed,
            cover1_opened_active: opened,
            cover2_opened_active: opened,
            cover3_opened_active: opened,
            cover4_opened_active: opened,
        }
    }
}

/// Limit switches of the M1 cell vents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct M1VentsLimitSwitches {
    pub vents_closed_active: bool,
    pub vents_opened_active: bool,
}

/// Circuit breaker state of the three ATMCS drive power lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerStatus {
    /// Azimuth motors 1 and 2.
    pub power_on_l1: bool,
    /// Elevation and M3 rotator.
    pub power_on_l2: bool,
    /// Nasmyth ports 1 and 2.
    pub power_on_l3: bool,
}

/// Events written by the controller on the command/event channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "id", rename_all_fields = "camelCase")]
pub enum ControllerEvent {
    #[serde(rename = "evt_cellVentsState")]
    CellVentsState { state: CellVentState },
    #[serde(rename = "evt_eStop")]
    EStop { triggered: bool },
    #[serde(rename = "evt_instrumentState")]
    InstrumentState { state: AirValveState },
    #[serde(rename = "evt_m1CoverLimitSwitches")]
    M1CoverLimitSwitches(M1CoverLimitSwitches),
    #[serde(rename = "evt_m1CoverState")]
    M1CoverState { state: MirrorCoverState },
    #[serde(rename = "evt_m1SetPressure")]
    M1SetPressure { pressure: f64 },
    #[serde(rename = "evt_m1State")]
    M1State { state: AirValveState },
    #[serde(rename = "evt_m1VentsLimitSwitches")]
    M1VentsLimitSwitches(M1VentsLimitSwitches),
    #[serde(rename = "evt_m1VentsPosition")]
    M1VentsPosition { position: VentsPosition },
    #[serde(rename = "evt_m2SetPressure")]
    M2SetPressure { pressure: f64 },
    #[serde(rename = "evt_m2State")]
    M2State { state: AirValveState },
    #[serde(rename = "evt_mainValveState")]
    MainValveState { state: AirValveState },
    #[serde(rename = "evt_powerStatus")]
    PowerStatus(PowerStatus),
    #[serde(rename = "evt_summaryState")]
    SummaryState { summary_state: SummaryState },
    #[serde(rename = "evt_errorCode")]
    ErrorCode {
        error_code: i32,
        error_report: String,
        traceback: String,
    },
}

impl ControllerEvent {
    /// Event name without the `evt_` prefix.
    pub fn name(&self) -> &'static str {
        match self {
            ControllerEvent::CellVentsState { .. } => "cellVentsState",
            ControllerEvent::EStop { .. } => "eStop",
            ControllerEvent::InstrumentState { .. } => "instrumentState",
            ControllerEvent::M1CoverLimitSwitches(_) => "m1CoverLimitSwitches",
            ControllerEvent::M1CoverState { .. } => "m1CoverState",
            ControllerEvent::M1SetPressure { .. } => "m1SetPressure",
            ControllerEvent::M1State { .. } => "m1State",
            ControllerEvent::M1VentsLimitSwitches(_) => "m1VentsLimitSwitches",
            ControllerEvent::M1VentsPosition { .. } => "m1VentsPosition",
            ControllerEvent::M2SetPressure { .. } => "m2SetPressure",
            ControllerEvent::M2State { .. } => "m2State",
            ControllerEvent::MainValveState { .. } => "mainValveState",
            ControllerEvent::PowerStatus(_) => "powerStatus",
            ControllerEvent::SummaryState { .. } => "summaryState",
            ControllerEvent::ErrorCode { .. } => "errorCode",
        }
    }
}

/// Telemetry written by the controller on the telemetry channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "id", rename_all_fields = "camelCase")]
pub enum TelemetryMessage {
    /// Measured pressure of the M1 air line.
    #[serde(rename = "tel_m1AirPressure")]
    M1AirPressure { pressure: f64 },
    /// Measured pressure of the M2 air line.
    #[serde(rename = "tel_m2AirPressure")]
    M2AirPressure { pressure: f64 },
    /// Measured pressure of the main supply line from the compressor.
    #[serde(rename = "tel_mainAirSourcePressure")]
    MainAirSourcePressure { pressure: f64 },
    /// M1 hardpoint load cell [kg].
    #[serde(rename = "tel_loadCell")]
    LoadCell { cell_load: f64 },
}

impl TelemetryMessage {
    pub fn name(&self) -> &'static str {
        match self {
            TelemetryMessage::M1AirPressure { .. } => "m1AirPressure",
            TelemetryMessage::M2AirPressure { .. } => "m2AirPressure",
            TelemetryMessage::MainAirSourcePressure { .. } => "mainAirSourcePressure",
            TelemetryMessage::LoadCell { .. } => "loadCell",
        }
    }
}

/// Anything the controller may write on the command/event channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CmdEvtMessage {
    Response(CommandResponse),
    Event(ControllerEvent),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn command_request_omits_missing_pressure() {
        let req = CommandRequest {
            id: "cmd_openM1Cover".into(),
            sequence_id: 3,
            pressure: None,
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value, json!({"id": "cmd_openM1Cover", "sequence_id": 3}));
    }

    #[test]
    fn command_request_carries_pressure() {
        let req = CommandRequest {
            id: "cmd_m1SetPressure".into(),
            sequence_id: 1,
            pressure: Some(4.5),
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["pressure"], json!(4.5));
    }

    #[test]
    fn event_uses_camel_case_fields() {
        let evt = ControllerEvent::PowerStatus(PowerStatus {
            power_on_l1: true,
            power_on_l2: false,
            power_on_l3: true,
        });
        let value = serde_json::to_value(&evt).unwrap();
        assert_eq!(
            value,
            json!({"id": "evt_powerStatus", "powerOnL1": true, "powerOnL2": false, "powerOnL3": true})
        );

        let evt = ControllerEvent::ErrorCode {
            error_code: 1,
            error_report: "boom".into(),
            traceback: String::new(),
        };
        let value = serde_json::to_value(&evt).unwrap();
        assert_eq!(value["errorCode"], json!(1));
        assert_eq!(value["errorReport"], json!("boom"));
    }

    #[test]
    fn cover_limit_switch_field_names() {
        let value = serde_json::to_value(ControllerEvent::M1CoverLimitSwitches(
            M1CoverLimitSwitches::uniform(true, false),
        ))
        .unwrap();
        assert_eq!(value["cover1ClosedActive"], json!(true));
        assert_eq!(value["cover4OpenedActive"], json!(false));
    }

    #[test]
    fn cmd_evt_message_distinguishes_responses_and_events() {
        let resp: CmdEvtMessage =
            serde_json::from_str(r#"{"id": "success", "sequence_id": 7}"#).unwrap();
        assert_eq!(
            resp,
            CmdEvtMessage::Response(CommandResponse {
                id: Ack::Success,
                sequence_id: 7
            })
        );

        let evt: CmdEvtMessage =
            serde_json::from_str(r#"{"id": "evt_m1State", "state": 3}"#).unwrap();
        assert_eq!(
            evt,
            CmdEvtMessage::Event(ControllerEvent::M1State {
                state: AirValveState::Closed
            })
        );
    }

    #[test]
    fn telemetry_load_cell_field_name() {
        let value = serde_json::to_value(TelemetryMessage::LoadCell { cell_load: 100.0 }).unwrap();
        assert_eq!(value, json!({"id": "tel_loadCell", "cellLoad": 100.0}));
    }
}
