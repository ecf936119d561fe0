//! Shared vocabulary of the ATPneumatics workspace: command tokens, wire
//! messages, state enumerations, bus envelopes and the common error type.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod command;
pub mod state;
pub mod wire;

pub use command::{Command, LifecycleCommand};
pub use state::{AirValveState, CellVentState, MirrorCoverState, SummaryState, VentsPosition};
pub use wire::{
    Ack, CmdEvtMessage, CommandRequest, CommandResponse, ControllerEvent, M1CoverLimitSwitches,
    M1VentsLimitSwitches, PowerStatus, TelemetryMessage, TERMINATOR,
};

/// Unified message wrapper for the in-process event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "atpneumatics-middleware::cmd_evt"
    pub source: String,
    pub payload: BusPayload,
}

impl Envelope {
    pub fn new(source: impl Into<String>, payload: BusPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed over the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BusPayload {
    Event(ControllerEvent),
    Telemetry(TelemetryMessage),
    CommandAck(CommandAck),
    /// A controller connection closed unexpectedly.
    ConnectionLost { channel: String },
}

/// Operator-facing progress of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckCode {
    InProgress,
    Complete,
    Failed,
    TimedOut,
    NotPermitted,
}

/// Acknowledgment reported to the operator for one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAck {
    pub command: String,
    pub ack: AckCode,
    /// Time the operator should allow for completion.
    pub timeout: Duration,
    pub result: String,
}

/// Error type spanning operational-state rejections, controller responses,
/// transport failures and configuration problems.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PneumaticsError {
    #[error("Command {command} not allowed in state {state}")]
    NotEnabled { command: String, state: SummaryState },

    #[error("Command {command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("Controller answered {ack:?} to {command}")]
    CommandRejected { command: String, ack: Ack },

    #[error("Cannot {command} from state {from}")]
    InvalidTransition { command: String, from: SummaryState },

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Command {0} requires a pressure argument")]
    MissingPressure(String),

    #[error("Not connected to the controller")]
    NotConnected,

    #[error("I/O Error: {0}")]
    Io(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("Invalid Configuration: {0}")]
    InvalidConfig(String),

    #[error("Channel Error: {0}")]
    Channel(String),
}

impl From<std::io::Error> for PneumaticsError {
    fn from(e: std::io::Error) -> Self {
        PneumaticsError::Io(e.to_string())
    }
}
