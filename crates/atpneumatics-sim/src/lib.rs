//! `atpneumatics-sim` – simulated pneumatics controller
//!
//! Speaks the same line-delimited JSON protocol as the hardware controller,
//! so the CSC and its tests can run without hardware.
//!
//! # Modules
//!
//! - [`server`] – [`OneClientServer`], a TCP server that serves one client at
//!   a time.
//! - [`plant`] – [`Plant`], the valve, cover and vent state plus the events
//!   each change produces.
//! - [`simulator`] – [`PneumaticsSimulator`], which wires two servers to a
//!   command dispatcher and a telemetry loop.
//!
//! # Example
//!
//! ```no_run
//! use atpneumatics_sim::{PneumaticsSimulator, SimulatorConfig};
//!
//! # async fn run() -> Result<(), atpneumatics_types::PneumaticsError> {
//! let sim = PneumaticsSimulator::start("127.0.0.1", 0, 0, SimulatorConfig::default()).await?;
//! println!("cmd/evt on {}", sim.cmd_evt_addr());
//! sim.close().await;
//! # Ok(())
//! # }
//! ```

pub mod plant;
pub mod server;
pub mod simulator;

pub use plant::{OpenCloseState, Plant};
pub use server::{OneClientServer, ServerEvent};
pub use simulator::{PneumaticsSimulator, SimulatorConfig};
