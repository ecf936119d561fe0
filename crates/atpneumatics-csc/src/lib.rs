//! `atpneumatics-csc` – the ATPneumatics commandable component
//!
//! A thin adapter: each pneumatics command is checked against the summary
//! state, forwarded to the controller as a `cmd_*` token, and reported done
//! once the controller says so.
//!
//! # Modules
//!
//! - [`config`] – [`CscConfig`]: controller host and ports, command timeout,
//!   TOML loading with environment overrides, JSON schema.
//! - [`state`] – the summary-state transition table and the enabled gate.
//! - [`csc`] – [`PneumaticsCsc`]: connection bootstrap (including the
//!   simulator in simulation mode), lifecycle commands and the fourteen
//!   pneumatics commands.

pub mod config;
pub mod csc;
pub mod state;

pub use config::CscConfig;
pub use csc::{PneumaticsCsc, VALID_SIMULATION_MODES};
