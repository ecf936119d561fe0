//! Command tokens understood by the pneumatics controller.
//!
//! Every operator command maps to exactly one `cmd_*` token on the wire.  Two
//! of them ([`Command::M1SetPressure`] and [`Command::M2SetPressure`]) carry a
//! single `pressure` argument; the rest carry nothing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::PneumaticsError;

/// Pneumatics commands forwarded to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    #[serde(rename = "cmd_closeInstrumentAirValve")]
    CloseInstrumentAirValve,
    #[serde(rename = "cmd_closeM1CellVents")]
    CloseM1CellVents,
    #[serde(rename = "cmd_closeM1Cover")]
    CloseM1Cover,
    #[serde(rename = "cmd_closeMasterAirSupply")]
    CloseMasterAirSupply,
    #[serde(rename = "cmd_m1CloseAirValve")]
    M1CloseAirValve,
    #[serde(rename = "cmd_m1SetPressure")]
    M1SetPressure,
    #[serde(rename = "cmd_m2CloseAirValve")]
    M2CloseAirValve,
    #[serde(rename = "cmd_m1OpenAirValve")]
    M1OpenAirValve,
    #[serde(rename = "cmd_m2OpenAirValve")]
    M2OpenAirValve,
    #[serde(rename = "cmd_m2SetPressure")]
    M2SetPressure,
    #[serde(rename = "cmd_openInstrumentAirValve")]
    OpenInstrumentAirValve,
    #[serde(rename = "cmd_openM1CellVents")]
    OpenM1CellVents,
    #[serde(rename = "cmd_openM1Cover")]
    OpenM1Cover,
    #[serde(rename = "cmd_openMasterAirSupply")]
    OpenMasterAirSupply,
}

impl Command {
    /// Every pneumatics command, in interface order.
    pub const ALL: [Command; 14] = [
        Command::CloseInstrumentAirValve,
        Command::CloseM1CellVents,
        Command::CloseM1Cover,
        Command::CloseMasterAirSupply,
        Command::M1CloseAirValve,
        Command::M1SetPressure,
        Command::M2CloseAirValve,
        Command::M1OpenAirValve,
        Command::M2OpenAirValve,
        Command::M2SetPressure,
        Command::OpenInstrumentAirValve,
        Command::OpenM1CellVents,
        Command::OpenM1Cover,
        Command::OpenMasterAirSupply,
    ];

    /// Operator-facing command name, e.g. `"openM1Cover"`.
    pub fn name(self) -> &'static str {
        match self {
            Command::CloseInstrumentAirValve => "closeInstrumentAirValve",
            Command::CloseM1CellVents => "closeM1CellVents",
            Command::CloseM1Cover => "closeM1Cover",
            Command::CloseMasterAirSupply => "closeMasterAirSupply",
            Command::M1CloseAirValve => "m1CloseAirValve",
            Command::M1SetPressure => "m1SetPressure",
            Command::M2CloseAirValve => "m2CloseAirValve",
            Command::M1OpenAirValve => "m1OpenAirValve",
            Command::M2OpenAirValve => "m2OpenAirValve",
            Command::M2SetPressure => "m2SetPressure",
            Command::OpenInstrumentAirValve => "openInstrumentAirValve",
            Command::OpenM1CellVents => "openM1CellVents",
            Command::OpenM1Cover => "openM1Cover",
            Command::OpenMasterAirSupply => "openMasterAirSupply",
        }
    }

    /// Wire token, e.g. `"cmd_openM1Cover"`.
    pub fn token(self) -> String {
        format!("cmd_{}", self.name())
    }

    /// `true` for the two commands that carry a `pressure` argument.
    pub fn takes_pressure(self) -> bool {
        matches!(self, Command::M1SetPressure | Command::M2SetPressure)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Command {
    type Err = PneumaticsError;

    /// Accepts either the command name or its `cmd_` token.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.strip_prefix("cmd_").unwrap_or(s);
        Command::ALL
            .into_iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| PneumaticsError::UnknownCommand(s.to_string()))
    }
}

/// Summary-state commands.  All but `ExitControl` are also forwarded to the
/// controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleCommand {
    Start,
    Enable,
    Disable,
    Standby,
    ExitControl,
}

impl LifecycleCommand {
    pub fn name(self) -> &'static str {
        match self {
            LifecycleCommand::Start => "start",
            LifecycleCommand::Enable => "enable",
            LifecycleCommand::Disable => "disable",
            LifecycleCommand::Standby => "standby",
            LifecycleCommand::ExitControl => "exitControl",
        }
    }

    /// Wire token, or `None` for commands that never leave the CSC.
    pub fn token(self) -> Option<String> {
        match self {
            LifecycleCommand::ExitControl => None,
            other => Some(format!("cmd_{}", other.name())),
        }
    }

    /// Parse a wire token such as `"cmd_enable"`.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "cmd_start" => Some(LifecycleCommand::Start),
            "cmd_enable" => Some(LifecycleCommand::Enable),
            "cmd_disable" => Some(LifecycleCommand::Disable),
            "cmd_standby" => Some(LifecycleCommand::Standby),
            _ => None,
        }
    }
}

impl fmt::Display for LifecycleCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
