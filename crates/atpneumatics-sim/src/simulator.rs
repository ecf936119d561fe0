//! The simulated pneumatics controller.
//!
//! [`PneumaticsSimulator`] binds a command/event server and a telemetry
//! server and hands both to a dispatcher task that owns the [`Plant`].
//!
//! Command handling follows the controller protocol:
//!
//! 1. validate the message; a missing `id` or `sequence_id`, an unknown
//!    command, an out-of-sequence id, or a set-pressure command without a
//!    numeric `pressure` is answered with `noack` and nothing else;
//! 2. answer `ack`;
//! 3. carry out the command, writing its events;
//! 4. answer `success`.
//!
//! Commands are handled one at a time, so a cover that takes twenty seconds
//! to open holds back everything queued behind it, as on the real controller.
//! Telemetry clients are served by a separate task and keep receiving
//! samples while a command is in progress.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use atpneumatics_types::{
    Ack, Command, CommandResponse, ControllerEvent, LifecycleCommand, PneumaticsError,
    SummaryState,
};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::plant::{Mirror, Plant, Valve};
use crate::server::{OneClientServer, ServerEvent};

const SERVER_CHANNEL_CAPACITY: usize = 64;

/// Error code reported when the simulator is told to fail on start.
pub const FAULT_ERROR_CODE: i32 = 1;

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Timings and set points of the simulated hardware.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    pub m1_covers_close_time: Duration,
    pub m1_covers_open_time: Duration,
    pub cell_vents_close_time: Duration,
    pub cell_vents_open_time: Duration,
    /// Initial M1 set pressure [Pa].
    pub m1_pressure: f64,
    /// Initial M2 set pressure [Pa].
    pub m2_pressure: f64,
    /// Main air source pressure [Pa].
    pub main_pressure: f64,
    /// M1 hardpoint load [kg].
    pub cell_load: f64,
    pub telemetry_interval: Duration,
    /// Answer `start` by going to FAULT instead of DISABLED.
    pub go_to_fault_state: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            m1_covers_close_time: Duration::from_secs(20),
            m1_covers_open_time: Duration::from_secs(20),
            cell_vents_close_time: Duration::from_secs(5),
            cell_vents_open_time: Duration::from_secs(1),
            m1_pressure: 5.0,
            m2_pressure: 6.0,
            main_pressure: 10.0,
            cell_load: 100.0,
            telemetry_interval: Duration::from_secs(1),
            go_to_fault_state: false,
        }
    }
}

impl SimulatorConfig {
    /// Zero travel times; handy for tests.
    pub fn instant() -> Self {
        Self {
            m1_covers_close_time: Duration::ZERO,
            m1_covers_open_time: Duration::ZERO,
            cell_vents_close_time: Duration::ZERO,
            cell_vents_open_time: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Cap every travel time at half of `limit`, so a command that moves the
    /// cover or the vents completes well inside a client timeout of `limit`.
    pub fn fit_within(mut self, limit: Duration) -> Self {
        let cap = limit / 2;
        for travel in [
            &mut self.m1_covers_close_time,
            &mut self.m1_covers_open_time,
            &mut self.cell_vents_close_time,
            &mut self.cell_vents_open_time,
        ] {
            *travel = (*travel).min(cap);
        }
        self
    }

    /// Longest time any single command may take.
    pub fn longest_travel(&self) -> Duration {
        [
            self.m1_covers_close_time,
            self.m1_covers_open_time,
            self.cell_vents_close_time,
            self.cell_vents_open_time,
        ]
        .into_iter()
        .max()
        .unwrap_or_default()
    }

    /// Pressures, load and telemetry interval must be strictly positive.
    pub fn validate(&self) -> Result<(), PneumaticsError> {
        let positive = [
            ("m1_pressure", self.m1_pressure),
            ("m2_pressure", self.m2_pressure),
            ("main_pressure", self.main_pressure),
            ("cell_load", self.cell_load),
        ];
        for (field, value) in positive {
            if !(value > 0.0) {
                return Err(PneumaticsError::InvalidConfig(format!(
                    "{field} must be > 0, got {value}"
                )));
            }
        }
        if self.telemetry_interval.is_zero() {
            return Err(PneumaticsError::InvalidConfig(
                "telemetry_interval must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulator handle
// ────────────────────────────────────────────────────────────────────────────

/// A running simulated controller.
pub struct PneumaticsSimulator {
    cmd_evt: Arc<OneClientServer>,
    telemetry: Arc<OneClientServer>,
    dispatcher: JoinHandle<()>,
    telemetry_feed: JoinHandle<()>,
    plant: watch::Receiver<Plant>,
}

impl PneumaticsSimulator {
    /// Bind both servers on `host` and start serving.
    ///
    /// # Errors
    ///
    /// - [`PneumaticsError::InvalidConfig`] – `config` fails validation.
    /// - [`PneumaticsError::Io`] – a port could not be bound.
    pub async fn start(
        host: &str,
        cmd_evt_port: u16,
        telemetry_port: u16,
        config: SimulatorConfig,
    ) -> Result<Self, PneumaticsError> {
        config.validate()?;

        let (cmd_tx, cmd_rx) = mpsc::channel(SERVER_CHANNEL_CAPACITY);
        let (tel_tx, tel_rx) = mpsc::channel(SERVER_CHANNEL_CAPACITY);
        let cmd_evt =
            Arc::new(OneClientServer::bind("CmdEvtPneumaticsServer", host, cmd_evt_port, cmd_tx).await?);
        let telemetry = Arc::new(
            OneClientServer::bind("TelemetryPneumaticsServer", host, telemetry_port, tel_tx).await?,
        );

        let plant = Plant::default();
        let (snapshot, plant_rx) = watch::channel(plant.clone());
        let telemetry_feed = TelemetryFeed {
            server: Arc::clone(&telemetry),
            plant: plant_rx.clone(),
            interval: config.telemetry_interval,
            task: None,
        };
        let telemetry_feed = tokio::spawn(telemetry_feed.run(tel_rx));
        let dispatcher = Dispatcher {
            config,
            plant,
            last_sequence_id: 0,
            cmd_evt: Arc::clone(&cmd_evt),
            snapshot,
        };
        let dispatcher = tokio::spawn(dispatcher.run(cmd_rx));

        info!(
            cmd_evt = %cmd_evt.local_addr(),
            telemetry = %telemetry.local_addr(),
            "pneumatics simulator running"
        );
        Ok(Self {
            cmd_evt,
            telemetry,
            dispatcher,
            telemetry_feed,
            plant: plant_rx,
        })
    }

    pub fn cmd_evt_addr(&self) -> SocketAddr {
        self.cmd_evt.local_addr()
    }

    pub fn telemetry_addr(&self) -> SocketAddr {
        self.telemetry.local_addr()
    }

    /// Current state of the simulated hardware.
    pub fn plant(&self) -> Plant {
        self.plant.borrow().clone()
    }

    /// Stop serving and disconnect any clients.
    pub async fn close(&self) {
        self.dispatcher.abort();
        self.telemetry_feed.abort();
        self.cmd_evt.close().await;
        self.telemetry.close().await;
        info!("pneumatics simulator closed");
    }
}

impl Drop for PneumaticsSimulator {
    fn drop(&mut self) {
        self.dispatcher.abort();
        self.telemetry_feed.abort();
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Dispatcher
// ────────────────────────────────────────────────────────────────────────────

/// A validated controller request.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Request {
    Pneumatics {
        command: Command,
        pressure: Option<f64>,
    },
    Lifecycle(LifecycleCommand),
}

struct Dispatcher {
    config: SimulatorConfig,
    plant: Plant,
    last_sequence_id: u64,
    cmd_evt: Arc<OneClientServer>,
    snapshot: watch::Sender<Plant>,
}

impl Dispatcher {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<ServerEvent>) {
        while let Some(event) = cmd_rx.recv().await {
            self.on_cmd_evt(event).await;
        }
    }

    async fn on_cmd_evt(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Connected => {
                // Every client starts its own sequence.
                self.last_sequence_id = 0;
                let mut events = self.plant.configure(&self.config);
                events.extend(self.plant.initialize());
                self.emit(events).await;
            }
            ServerEvent::Received(data) => self.dispatch(data).await,
            ServerEvent::Disconnected => debug!("cmd/evt client gone"),
        }
    }

    async fn dispatch(&mut self, data: Value) {
        let (sequence_id, request) = match self.verify(&data) {
            Ok(verified) => verified,
            Err(sequence_id) => {
                self.respond(Ack::Noack, sequence_id).await;
                return;
            }
        };
        self.respond(Ack::Ack, sequence_id).await;

        match request {
            Request::Pneumatics { command, pressure } => {
                debug!(%command, sequence_id, "executing");
                self.perform(command, pressure).await;
                self.respond(Ack::Success, sequence_id).await;
            }
            Request::Lifecycle(command) => {
                self.respond(Ack::Success, sequence_id).await;
                self.transition(command).await;
            }
        }
    }

    /// Check `data` against the protocol.  `Err` carries the sequence id to
    /// put in the `noack`.
    fn verify(&mut self, data: &Value) -> Result<(u64, Request), u64> {
        let id = data.get("id").and_then(Value::as_str);
        let sequence_id = data.get("sequence_id").and_then(Value::as_u64);
        let (Some(id), Some(sequence_id)) = (id, sequence_id) else {
            error!(%data, "received invalid data; ignoring");
            return Err(sequence_id.unwrap_or(0));
        };

        let request = if let Some(command) = LifecycleCommand::from_token(id) {
            Request::Lifecycle(command)
        } else {
            match id.strip_prefix("cmd_").map(str::parse::<Command>) {
                Some(Ok(command)) => Request::Pneumatics {
                    command,
                    pressure: None,
                },
                _ => {
                    error!(%data, "unknown command");
                    return Err(sequence_id);
                }
            }
        };

        if sequence_id.checked_sub(self.last_sequence_id) != Some(1) {
            warn!(
                sequence_id,
                last = self.last_sequence_id,
                "out-of-sequence command"
            );
            return Err(sequence_id);
        }
        self.last_sequence_id = sequence_id;

        match request {
            Request::Pneumatics { command, .. } if command.takes_pressure() => {
                match data.get("pressure").and_then(Value::as_f64) {
                    Some(pressure) => Ok((
                        sequence_id,
                        Request::Pneumatics {
                            command,
                            pressure: Some(pressure),
                        },
                    )),
                    None => {
                        error!(%data, "validation failed: missing or non-numeric pressure");
                        Err(sequence_id)
                    }
                }
            }
            other => Ok((sequence_id, other)),
        }
    }

    async fn perform(&mut self, command: Command, pressure: Option<f64>) {
        let event = match (command, pressure) {
            (Command::CloseInstrumentAirValve, _) => self.plant.set_valve(Valve::Instrument, false),
            (Command::OpenInstrumentAirValve, _) => self.plant.set_valve(Valve::Instrument, true),
            (Command::CloseMasterAirSupply, _) => self.plant.set_valve(Valve::Main, false),
            (Command::OpenMasterAirSupply, _) => self.plant.set_valve(Valve::Main, true),
            (Command::M1CloseAirValve, _) => self.plant.set_valve(Valve::M1, false),
            (Command::M1OpenAirValve, _) => self.plant.set_valve(Valve::M1, true),
            (Command::M2CloseAirValve, _) => self.plant.set_valve(Valve::M2, false),
            (Command::M2OpenAirValve, _) => self.plant.set_valve(Valve::M2, true),
            (Command::M1SetPressure, Some(p)) => self.plant.set_pressure(Mirror::M1, p),
            (Command::M2SetPressure, Some(p)) => self.plant.set_pressure(Mirror::M2, p),
            (Command::M1SetPressure | Command::M2SetPressure, None) => return,
            (Command::CloseM1Cover, _) => return self.move_m1_cover(false).await,
            (Command::OpenM1Cover, _) => return self.move_m1_cover(true).await,
            (Command::CloseM1CellVents, _) => return self.move_cell_vents(false).await,
            (Command::OpenM1CellVents, _) => return self.move_cell_vents(true).await,
        };
        self.emit([event]).await;
    }

    async fn move_m1_cover(&mut self, open: bool) {
        if !self.plant.covers_motion.begin(open) {
            return;
        }
        if !self.plant.cover_at(open) {
            let events = self.plant.set_m1_cover(false, false);
            self.emit(events).await;
            let travel = if open {
                self.config.m1_covers_open_time
            } else {
                self.config.m1_covers_close_time
            };
            tokio::time::sleep(travel).await;
        }
        let events = self.plant.set_m1_cover(!open, open);
        self.emit(events).await;
        self.plant.covers_motion.finish(open);
        self.publish();
    }

    async fn move_cell_vents(&mut self, open: bool) {
        if !self.plant.vents_motion.begin(open) {
            return;
        }
        if !self.plant.vents_at(open) {
            let events = self.plant.set_cell_vents(false, false);
            self.emit(events).await;
            let travel = if open {
                self.config.cell_vents_open_time
            } else {
                self.config.cell_vents_close_time
            };
            tokio::time::sleep(travel).await;
        }
        let events = self.plant.set_cell_vents(!open, open);
        self.emit(events).await;
        self.plant.vents_motion.finish(open);
        self.publish();
    }

    async fn transition(&mut self, command: LifecycleCommand) {
        let target = match command {
            LifecycleCommand::Start if self.config.go_to_fault_state => SummaryState::Fault,
            LifecycleCommand::Start | LifecycleCommand::Disable => SummaryState::Disabled,
            LifecycleCommand::Enable => SummaryState::Enabled,
            LifecycleCommand::Standby | LifecycleCommand::ExitControl => SummaryState::Standby,
        };
        info!(%command, state = %target, "summary state change");
        let mut events = vec![self.plant.set_summary_state(target)];
        if target == SummaryState::Fault {
            events.push(ControllerEvent::ErrorCode {
                error_code: FAULT_ERROR_CODE,
                error_report: "Simulated fault on start.".to_string(),
                traceback: String::new(),
            });
        }
        self.emit(events).await;
    }

    async fn respond(&self, ack: Ack, sequence_id: u64) {
        let response = CommandResponse {
            id: ack,
            sequence_id,
        };
        if let Err(e) = self.cmd_evt.write_json(&response).await {
            debug!(error = %e, ?ack, sequence_id, "response not delivered");
        }
    }

    /// Write `events` to the cmd/evt client and publish the new plant state.
    async fn emit(&self, events: impl IntoIterator<Item = ControllerEvent>) {
        self.publish();
        for event in events {
            if let Err(e) = self.cmd_evt.write_json(&event).await {
                debug!(error = %e, event = event.name(), "event not delivered");
            }
        }
    }

    fn publish(&self) {
        self.snapshot.send_replace(self.plant.clone());
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Telemetry
// ────────────────────────────────────────────────────────────────────────────

/// Starts a sampling loop when a telemetry client connects and stops it when
/// the client leaves.  Reads the plant through the dispatcher's snapshots.
struct TelemetryFeed {
    server: Arc<OneClientServer>,
    plant: watch::Receiver<Plant>,
    interval: Duration,
    task: Option<JoinHandle<()>>,
}

impl TelemetryFeed {
    async fn run(mut self, mut tel_rx: mpsc::Receiver<ServerEvent>) {
        while let Some(event) = tel_rx.recv().await {
            self.on_event(event);
        }
        self.stop();
    }

    fn on_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Connected => {
                let running = self.task.as_ref().is_some_and(|t| !t.is_finished());
                if !running {
                    self.task = Some(tokio::spawn(telemetry_loop(
                        Arc::clone(&self.server),
                        self.plant.clone(),
                        self.interval,
                    )));
                }
            }
            ServerEvent::Received(data) => debug!(%data, "ignoring telemetry client message"),
            ServerEvent::Disconnected => self.stop(),
        }
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for TelemetryFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn telemetry_loop(
    server: Arc<OneClientServer>,
    plant: watch::Receiver<Plant>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let sample = plant.borrow().telemetry();
        for message in sample {
            if let Err(e) = server.write_json(&message).await {
                debug!(error = %e, "telemetry loop stopping");
                return;
            }
        }
    }
}
