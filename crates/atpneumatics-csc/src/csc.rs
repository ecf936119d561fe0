//! [`PneumaticsCsc`] – the commandable component.
//!
//! Every pneumatics command follows the same contract:
//!
//! 1. reject unless the CSC is ENABLED;
//! 2. report "in progress" on [`Topic::CommandAcks`] with the command timeout;
//! 3. write the `cmd_*` token (plus `pressure` for the set-pressure commands)
//!    to the controller;
//! 4. wait for the controller to report the command done, failing with
//!    [`PneumaticsError::Timeout`] after `cmd_done_timeout`.
//!
//! No retries.  Distinct commands may be in flight at the same time.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;

use atpneumatics_middleware::{CommandLink, EventBus, TcpipClient, Topic, TopicReceiver};
use atpneumatics_sim::{PneumaticsSimulator, SimulatorConfig};
use atpneumatics_types::{
    AckCode, BusPayload, Command, CommandAck, ControllerEvent, Envelope, LifecycleCommand,
    PneumaticsError, SummaryState,
};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::CscConfig;
use crate::state;

const SOURCE: &str = "atpneumatics-csc";

/// Simulation modes accepted by [`PneumaticsCsc::new`]: 0 talks to the real
/// controller, 1 starts the bundled simulator.
pub const VALID_SIMULATION_MODES: [u8; 2] = [0, 1];

/// CSC for the auxiliary telescope pneumatics controller.
pub struct PneumaticsCsc {
    config: CscConfig,
    simulation_mode: u8,
    simulator_config: SimulatorConfig,
    bus: Arc<EventBus>,
    state: Arc<watch::Sender<SummaryState>>,
    link: RwLock<Option<Arc<dyn CommandLink>>>,
    simulator: tokio::sync::Mutex<Option<PneumaticsSimulator>>,
    simulators_started: AtomicUsize,
    monitor: StdMutex<Option<JoinHandle<()>>>,
    /// Serialises lifecycle commands.
    lifecycle: tokio::sync::Mutex<()>,
}

impl PneumaticsCsc {
    /// Create a CSC in STANDBY.
    ///
    /// # Errors
    ///
    /// [`PneumaticsError::InvalidConfig`] if `config` fails validation or
    /// `simulation_mode` is not one of [`VALID_SIMULATION_MODES`].
    pub fn new(config: CscConfig, simulation_mode: u8) -> Result<Self, PneumaticsError> {
        config.validate()?;
        if !VALID_SIMULATION_MODES.contains(&simulation_mode) {
            return Err(PneumaticsError::InvalidConfig(format!(
                "simulation_mode {simulation_mode} not in {VALID_SIMULATION_MODES:?}"
            )));
        }
        let (state, _) = watch::channel(SummaryState::Standby);
        let simulator_config = SimulatorConfig::default().fit_within(config.cmd_done_timeout());
        Ok(Self {
            config,
            simulation_mode,
            simulator_config,
            bus: Arc::new(EventBus::default()),
            state: Arc::new(state),
            link: RwLock::new(None),
            simulator: tokio::sync::Mutex::new(None),
            simulators_started: AtomicUsize::new(0),
            monitor: StdMutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        })
    }

    /// Start in `state` instead of STANDBY.
    pub fn with_initial_state(self, state: SummaryState) -> Self {
        self.state.send_replace(state);
        self
    }

    /// Timings and set points for the simulator started in simulation mode.
    ///
    /// By default the simulator's travel times are capped to fit inside
    /// `cmd_done_timeout`; a config given here is used as is.
    pub fn with_simulator_config(mut self, simulator_config: SimulatorConfig) -> Self {
        if simulator_config.longest_travel() >= self.cmd_done_timeout() {
            warn!(
                travel = ?simulator_config.longest_travel(),
                timeout = ?self.cmd_done_timeout(),
                "simulated travel exceeds the command timeout"
            );
        }
        self.simulator_config = simulator_config;
        self
    }

    pub fn simulator_config(&self) -> &SimulatorConfig {
        &self.simulator_config
    }

    /// Republish controller traffic on `bus` instead of a private one.
    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = bus;
        self
    }

    pub fn config(&self) -> &CscConfig {
        &self.config
    }

    pub fn simulation_mode(&self) -> u8 {
        self.simulation_mode
    }

    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    pub fn summary_state(&self) -> SummaryState {
        *self.state.borrow()
    }

    /// Watch summary-state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<SummaryState> {
        self.state.subscribe()
    }

    pub fn cmd_done_timeout(&self) -> Duration {
        self.config.cmd_done_timeout()
    }

    /// How many simulators this CSC has created (never more than one).
    pub fn simulators_started(&self) -> usize {
        self.simulators_started.load(Ordering::SeqCst)
    }

    /// Command/event and telemetry addresses of the simulator, if running.
    pub async fn simulator_addrs(&self) -> Option<(SocketAddr, SocketAddr)> {
        self.simulator
            .lock()
            .await
            .as_ref()
            .map(|sim| (sim.cmd_evt_addr(), sim.telemetry_addr()))
    }

    /// `true` while a controller link is up.
    pub fn connected(&self) -> bool {
        self.link().is_some_and(|link| link.connected())
    }

    /// Use `link` for subsequent commands, replacing any current link.
    pub fn attach_link(&self, link: Arc<dyn CommandLink>) {
        if let Ok(mut slot) = self.link.write() {
            *slot = Some(link);
        }
    }

    fn link(&self) -> Option<Arc<dyn CommandLink>> {
        self.link.read().ok().and_then(|slot| slot.clone())
    }

    pub fn assert_enabled(&self, command: &str) -> Result<(), PneumaticsError> {
        state::assert_enabled(self.summary_state(), command)
    }

    // ────────────────────────────────────────────────────────────────────────
    // Connection bootstrap
    // ────────────────────────────────────────────────────────────────────────

    /// Start the simulator (simulation mode 1 only, and only once) and
    /// connect to the controller.
    pub async fn start_clients(&self) -> Result<(), PneumaticsError> {
        let (host, cmd_evt_port, telemetry_port) = {
            let mut simulator = self.simulator.lock().await;
            if self.simulation_mode == 1 && simulator.is_none() {
                let sim = PneumaticsSimulator::start(
                    &self.config.host,
                    self.config.cmd_evt_port,
                    self.config.telemetry_port,
                    self.simulator_config.clone(),
                )
                .await?;
                self.simulators_started.fetch_add(1, Ordering::SeqCst);
                *simulator = Some(sim);
            }
            match simulator.as_ref() {
                Some(sim) => (
                    sim.cmd_evt_addr().ip().to_string(),
                    sim.cmd_evt_addr().port(),
                    sim.telemetry_addr().port(),
                ),
                None => (
                    self.config.host.clone(),
                    self.config.cmd_evt_port,
                    self.config.telemetry_port,
                ),
            }
        };

        if self.connected() {
            debug!("clients already connected");
            return Ok(());
        }
        self.close_clients().await;

        let events = self.bus.subscribe_to(Topic::Events);
        let alerts = self.bus.subscribe_to(Topic::SystemAlerts);
        let client =
            TcpipClient::connect(&host, cmd_evt_port, telemetry_port, Arc::clone(&self.bus))
                .await?;
        let monitor = tokio::spawn(monitor(Arc::clone(&self.state), events, alerts));
        if let Ok(mut slot) = self.monitor.lock() {
            if let Some(previous) = slot.replace(monitor) {
                previous.abort();
            }
        }
        self.attach_link(Arc::new(client));
        info!(%host, cmd_evt_port, telemetry_port, "clients started");
        Ok(())
    }

    /// Disconnect from the controller.  The simulator keeps running.
    pub async fn close_clients(&self) {
        if let Ok(mut slot) = self.monitor.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
        let link = self.link.write().ok().and_then(|mut slot| slot.take());
        if let Some(link) = link {
            link.close().await;
        }
    }

    /// Disconnect and stop the simulator.
    pub async fn close(&self) {
        self.close_clients().await;
        if let Some(sim) = self.simulator.lock().await.take() {
            sim.close().await;
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ────────────────────────────────────────────────────────────────────────

    pub async fn lifecycle(&self, command: LifecycleCommand) -> Result<(), PneumaticsError> {
        match command {
            LifecycleCommand::Start => self.start().await,
            LifecycleCommand::Enable => self.enable().await,
            LifecycleCommand::Disable => self.disable().await,
            LifecycleCommand::Standby => self.standby().await,
            LifecycleCommand::ExitControl => self.exit_control().await,
        }
    }

    /// STANDBY → DISABLED: connect, then forward `cmd_start`.
    pub async fn start(&self) -> Result<(), PneumaticsError> {
        let _guard = self.lifecycle.lock().await;
        let (from, to) = self.plan(LifecycleCommand::Start)?;
        self.start_clients().await?;
        if let Err(e) = self.forward(LifecycleCommand::Start).await {
            self.close_clients().await;
            return Err(e);
        }
        self.commit(from, to);
        Ok(())
    }

    /// DISABLED → ENABLED.
    pub async fn enable(&self) -> Result<(), PneumaticsError> {
        let _guard = self.lifecycle.lock().await;
        let (from, to) = self.plan(LifecycleCommand::Enable)?;
        self.forward(LifecycleCommand::Enable).await?;
        self.commit(from, to);
        Ok(())
    }

    /// ENABLED → DISABLED.
    pub async fn disable(&self) -> Result<(), PneumaticsError> {
        let _guard = self.lifecycle.lock().await;
        let (from, to) = self.plan(LifecycleCommand::Disable)?;
        self.forward(LifecycleCommand::Disable).await?;
        self.commit(from, to);
        Ok(())
    }

    /// DISABLED or FAULT → STANDBY.  Always disconnects, even if the
    /// controller does not answer.
    pub async fn standby(&self) -> Result<(), PneumaticsError> {
        let _guard = self.lifecycle.lock().await;
        let (from, to) = self.plan(LifecycleCommand::Standby)?;
        if let Err(e) = self.forward(LifecycleCommand::Standby).await {
            warn!(error = %e, "controller did not confirm standby");
        }
        self.close_clients().await;
        self.commit(from, to);
        Ok(())
    }

    /// STANDBY → OFFLINE.  Stops the simulator.
    pub async fn exit_control(&self) -> Result<(), PneumaticsError> {
        let _guard = self.lifecycle.lock().await;
        let (from, to) = self.plan(LifecycleCommand::ExitControl)?;
        self.close().await;
        self.commit(from, to);
        Ok(())
    }

    fn plan(
        &self,
        command: LifecycleCommand,
    ) -> Result<(SummaryState, SummaryState), PneumaticsError> {
        let from = self.summary_state();
        let to = state::transition(from, command)?;
        Ok((from, to))
    }

    /// Move `from` → `to` unless the state changed underneath us (e.g. the
    /// controller reported a fault while the command ran).
    fn commit(&self, from: SummaryState, to: SummaryState) {
        let moved = self.state.send_if_modified(|current| {
            if *current == from {
                *current = to;
                true
            } else {
                false
            }
        });
        if moved {
            info!(%from, %to, "summary state");
        } else {
            warn!(%from, %to, now = %self.summary_state(), "summary state changed during transition");
        }
    }

    async fn forward(&self, command: LifecycleCommand) -> Result<(), PneumaticsError> {
        let (Some(token), Some(link)) = (command.token(), self.link()) else {
            return Ok(());
        };
        self.send(command.name(), &token, None, link.as_ref()).await
    }

    // ────────────────────────────────────────────────────────────────────────
    // Pneumatics commands
    // ────────────────────────────────────────────────────────────────────────

    /// Run `command`; `pressure` is required by the two set-pressure
    /// commands and ignored by the rest.
    pub async fn execute(
        &self,
        command: Command,
        pressure: Option<f64>,
    ) -> Result<(), PneumaticsError> {
        if !command.takes_pressure() {
            return self.run_command(command, None).await;
        }
        match pressure {
            Some(pressure) => self.run_command(command, Some(pressure)).await,
            None => Err(PneumaticsError::MissingPressure(command.name().to_string())),
        }
    }

    pub async fn close_instrument_air_valve(&self) -> Result<(), PneumaticsError> {
        self.run_command(Command::CloseInstrumentAirValve, None).await
    }

    pub async fn close_m1_cell_vents(&self) -> Result<(), PneumaticsError> {
        self.run_command(Command::CloseM1CellVents, None).await
    }

    pub async fn close_m1_cover(&self) -> Result<(), PneumaticsError> {
        self.run_command(Command::CloseM1Cover, None).await
    }

    pub async fn close_master_air_supply(&self) -> Result<(), PneumaticsError> {
        self.run_command(Command::CloseMasterAirSupply, None).await
    }

    pub async fn m1_close_air_valve(&self) -> Result<(), PneumaticsError> {
        self.run_command(Command::M1CloseAirValve, None).await
    }

    /// Set the M1 air pressure [Pa].
    pub async fn m1_set_pressure(&self, pressure: f64) -> Result<(), PneumaticsError> {
        self.run_command(Command::M1SetPressure, Some(pressure)).await
    }

    pub async fn m2_close_air_valve(&self) -> Result<(), PneumaticsError> {
        self.run_command(Command::M2CloseAirValve, None).await
    }

    pub async fn m1_open_air_valve(&self) -> Result<(), PneumaticsError> {
        self.run_command(Command::M1OpenAirValve, None).await
    }

    pub async fn m2_open_air_valve(&self) -> Result<(), PneumaticsError> {
        self.run_command(Command::M2OpenAirValve, None).await
    }

    /// Set the M2 air pressure [Pa].
    pub async fn m2_set_pressure(&self, pressure: f64) -> Result<(), PneumaticsError> {
        self.run_command(Command::M2SetPressure, Some(pressure)).await
    }

    pub async fn open_instrument_air_valve(&self) -> Result<(), PneumaticsError> {
        self.run_command(Command::OpenInstrumentAirValve, None).await
    }

    pub async fn open_m1_cell_vents(&self) -> Result<(), PneumaticsError> {
        self.run_command(Command::OpenM1CellVents, None).await
    }

    pub async fn open_m1_cover(&self) -> Result<(), PneumaticsError> {
        self.run_command(Command::OpenM1Cover, None).await
    }

    pub async fn open_master_air_supply(&self) -> Result<(), PneumaticsError> {
        self.run_command(Command::OpenMasterAirSupply, None).await
    }

    async fn run_command(
        &self,
        command: Command,
        pressure: Option<f64>,
    ) -> Result<(), PneumaticsError> {
        let name = command.name();
        if let Err(e) = self.assert_enabled(name) {
            self.report(name, AckCode::NotPermitted, e.to_string());
            return Err(e);
        }
        self.report(name, AckCode::InProgress, "");
        debug!("Sending {name}.");

        let result = match self.link() {
            Some(link) => self.send(name, &command.token(), pressure, link.as_ref()).await,
            None => Err(PneumaticsError::NotConnected),
        };
        match &result {
            Ok(()) => self.report(name, AckCode::Complete, "Done"),
            Err(e @ PneumaticsError::Timeout { .. }) => {
                self.report(name, AckCode::TimedOut, e.to_string())
            }
            Err(e) => self.report(name, AckCode::Failed, e.to_string()),
        }
        result
    }

    /// Write `token` and wait for completion within `cmd_done_timeout`.
    async fn send(
        &self,
        name: &str,
        token: &str,
        pressure: Option<f64>,
        link: &dyn CommandLink,
    ) -> Result<(), PneumaticsError> {
        let timeout = self.cmd_done_timeout();
        let completion = async {
            match link.write_command(token, pressure).await {
                Ok(issued) => issued.done().await,
                Err(e) => Err(e),
            }
        };
        match tokio::time::timeout(timeout, completion).await {
            Ok(result) => result,
            Err(_) => {
                warn!(command = name, ?timeout, "command timed out");
                Err(PneumaticsError::Timeout {
                    command: name.to_string(),
                    timeout,
                })
            }
        }
    }

    fn report(&self, command: &str, ack: AckCode, result: impl Into<String>) {
        let payload = BusPayload::CommandAck(CommandAck {
            command: command.to_string(),
            ack,
            timeout: self.cmd_done_timeout(),
            result: result.into(),
        });
        // Nobody listening is fine.
        let _ = self
            .bus
            .publish_to(Topic::CommandAcks, Envelope::new(SOURCE, payload));
    }
}

impl Drop for PneumaticsCsc {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.monitor.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }
}

/// Follow controller events and alerts; go to FAULT when the controller
/// reports one or the connection drops.
async fn monitor(
    state: Arc<watch::Sender<SummaryState>>,
    mut events: TopicReceiver,
    mut alerts: TopicReceiver,
) {
    loop {
        let received = tokio::select! {
            r = events.recv() => r,
            r = alerts.recv() => r,
        };
        let envelope = match received {
            Ok(envelope) => envelope,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "state monitor lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        match envelope.payload {
            BusPayload::Event(ControllerEvent::SummaryState {
                summary_state: SummaryState::Fault,
            }) => go_to_fault(&state, "controller reported FAULT"),
            BusPayload::Event(ControllerEvent::ErrorCode {
                error_code,
                error_report,
                ..
            }) => error!(error_code, %error_report, "controller error"),
            BusPayload::ConnectionLost { channel } => {
                go_to_fault(&state, &format!("lost {channel} connection"))
            }
            _ => {}
        }
    }
}

fn go_to_fault(state: &watch::Sender<SummaryState>, reason: &str) {
    let faulted = state.send_if_modified(|current| {
        if matches!(*current, SummaryState::Fault | SummaryState::Offline) {
            false
        } else {
            *current = SummaryState::Fault;
            true
        }
    });
    if faulted {
        error!(reason, "going to FAULT");
    }
}
