//! CSC behaviour against scripted links, a fake controller and the bundled
//! simulator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use atpneumatics_csc::{CscConfig, PneumaticsCsc};
use atpneumatics_middleware::codec::{read_json, write_json};
use atpneumatics_middleware::{CommandIssued, CommandLink, Topic};
use atpneumatics_sim::SimulatorConfig;
use atpneumatics_types::{
    Ack, AckCode, BusPayload, Command, ControllerEvent, LifecycleCommand, MirrorCoverState,
    PneumaticsError, SummaryState,
};
use serde_json::{Value, json};
use tokio::io::BufReader;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

type TestResult = Result<(), Box<dyn std::error::Error>>;

// ────────────────────────────────────────────────────────────────────────────
// Scripted links
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum Reply {
    Success,
    Fail,
    Never,
}

struct ScriptedLink {
    reply: Reply,
    sent: Mutex<Vec<(String, Option<f64>)>>,
    next_sequence_id: AtomicU64,
    unanswered: Mutex<Vec<oneshot::Sender<Result<(), PneumaticsError>>>>,
}

impl ScriptedLink {
    fn new(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply,
            sent: Mutex::new(Vec::new()),
            next_sequence_id: AtomicU64::new(1),
            unanswered: Mutex::new(Vec::new()),
        })
    }

    fn sent(&self) -> Vec<(String, Option<f64>)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandLink for ScriptedLink {
    async fn write_command(
        &self,
        id: &str,
        pressure: Option<f64>,
    ) -> Result<CommandIssued, PneumaticsError> {
        self.sent.lock().unwrap().push((id.to_string(), pressure));
        let sequence_id = self.next_sequence_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        match self.reply {
            Reply::Success => {
                let _ = tx.send(Ok(()));
            }
            Reply::Fail => {
                let _ = tx.send(Err(PneumaticsError::CommandRejected {
                    command: id.to_string(),
                    ack: Ack::Fail,
                }));
            }
            Reply::Never => self.unanswered.lock().unwrap().push(tx),
        }
        Ok(CommandIssued::new(sequence_id, rx))
    }

    fn connected(&self) -> bool {
        true
    }

    async fn close(&self) {}
}

fn config(cmd_done_timeout: f64) -> CscConfig {
    CscConfig {
        host: "127.0.0.1".to_string(),
        cmd_evt_port: 0,
        telemetry_port: 0,
        cmd_done_timeout,
    }
}

fn csc_with(state: SummaryState, link: Arc<ScriptedLink>, timeout: f64) -> PneumaticsCsc {
    let csc = PneumaticsCsc::new(config(timeout), 0)
        .expect("valid csc")
        .with_initial_state(state);
    csc.attach_link(link);
    csc
}

// ────────────────────────────────────────────────────────────────────────────
// Command contract
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn every_command_is_rejected_when_not_enabled() -> TestResult {
    for state in [SummaryState::Disabled, SummaryState::Standby, SummaryState::Fault] {
        let link = ScriptedLink::new(Reply::Success);
        let csc = csc_with(state, Arc::clone(&link), 1.0);
        for command in Command::ALL {
            let result = csc.execute(command, Some(1.0)).await;
            assert_eq!(
                result,
                Err(PneumaticsError::NotEnabled {
                    command: command.name().to_string(),
                    state,
                })
            );
        }
        assert!(link.sent().is_empty(), "nothing may reach the controller");
    }
    Ok(())
}

#[tokio::test]
async fn every_command_times_out_without_completion() -> TestResult {
    let link = ScriptedLink::new(Reply::Never);
    let csc = csc_with(SummaryState::Enabled, Arc::clone(&link), 0.05);

    for command in Command::ALL {
        let result = csc.execute(command, Some(2.0)).await;
        assert_eq!(
            result,
            Err(PneumaticsError::Timeout {
                command: command.name().to_string(),
                timeout: Duration::from_millis(50),
            })
        );
    }
    assert_eq!(link.sent().len(), Command::ALL.len());
    Ok(())
}

#[tokio::test]
async fn handlers_send_their_tokens() -> TestResult {
    let link = ScriptedLink::new(Reply::Success);
    let csc = csc_with(SummaryState::Enabled, Arc::clone(&link), 1.0);

    csc.close_instrument_air_valve().await?;
    csc.close_m1_cell_vents().await?;
    csc.close_m1_cover().await?;
    csc.close_master_air_supply().await?;
    csc.m1_close_air_valve().await?;
    csc.m1_set_pressure(4.5).await?;
    csc.m2_close_air_valve().await?;
    csc.m1_open_air_valve().await?;
    csc.m2_open_air_valve().await?;
    csc.m2_set_pressure(3.25).await?;
    csc.open_instrument_air_valve().await?;
    csc.open_m1_cell_vents().await?;
    csc.open_m1_cover().await?;
    csc.open_master_air_supply().await?;

    let sent = link.sent();
    let expected: Vec<(String, Option<f64>)> = Command::ALL
        .into_iter()
        .map(|c| {
            let pressure = match c {
                Command::M1SetPressure => Some(4.5),
                Command::M2SetPressure => Some(3.25),
                _ => None,
            };
            (c.token(), pressure)
        })
        .collect();
    assert_eq!(sent, expected);
    Ok(())
}

#[tokio::test]
async fn pressure_is_dropped_for_plain_commands_and_required_for_set_pressure() -> TestResult {
    let link = ScriptedLink::new(Reply::Success);
    let csc = csc_with(SummaryState::Enabled, Arc::clone(&link), 1.0);

    csc.execute(Command::OpenM1Cover, Some(9.0)).await?;
    assert_eq!(link.sent(), vec![("cmd_openM1Cover".to_string(), None)]);

    let result = csc.execute(Command::M2SetPressure, None).await;
    assert_eq!(
        result,
        Err(PneumaticsError::MissingPressure("m2SetPressure".into()))
    );
    Ok(())
}

#[tokio::test]
async fn controller_failure_surfaces() -> TestResult {
    let link = ScriptedLink::new(Reply::Fail);
    let csc = csc_with(SummaryState::Enabled, link, 1.0);
    let result = csc.open_m1_cover().await;
    assert!(matches!(
        result,
        Err(PneumaticsError::CommandRejected { ack: Ack::Fail, .. })
    ));
    Ok(())
}

#[tokio::test]
async fn command_without_link_is_not_connected() -> TestResult {
    let csc = PneumaticsCsc::new(config(1.0), 0)?.with_initial_state(SummaryState::Enabled);
    assert_eq!(csc.open_m1_cover().await, Err(PneumaticsError::NotConnected));
    Ok(())
}

#[tokio::test]
async fn progress_is_reported_on_the_bus() -> TestResult {
    let link = ScriptedLink::new(Reply::Success);
    let csc = csc_with(SummaryState::Enabled, link, 20.0);
    let mut acks = csc.bus().subscribe_to(Topic::CommandAcks);

    csc.open_master_air_supply().await?;

    let mut seen = Vec::new();
    for _ in 0..2 {
        match acks.recv().await?.payload {
            BusPayload::CommandAck(ack) => {
                assert_eq!(ack.command, "openMasterAirSupply");
                assert_eq!(ack.timeout, Duration::from_secs(20));
                seen.push(ack.ack);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }
    assert_eq!(seen, vec![AckCode::InProgress, AckCode::Complete]);
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Lifecycle
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn enable_and_disable_are_forwarded() -> TestResult {
    let link = ScriptedLink::new(Reply::Success);
    let csc = csc_with(SummaryState::Disabled, Arc::clone(&link), 1.0);

    csc.enable().await?;
    assert_eq!(csc.summary_state(), SummaryState::Enabled);
    csc.disable().await?;
    assert_eq!(csc.summary_state(), SummaryState::Disabled);

    let tokens: Vec<String> = link.sent().into_iter().map(|(id, _)| id).collect();
    assert_eq!(tokens, vec!["cmd_enable", "cmd_disable"]);
    Ok(())
}

#[tokio::test]
async fn invalid_transitions_are_rejected() -> TestResult {
    let link = ScriptedLink::new(Reply::Success);
    let csc = csc_with(SummaryState::Enabled, Arc::clone(&link), 1.0);

    assert!(matches!(
        csc.start().await,
        Err(PneumaticsError::InvalidTransition { from: SummaryState::Enabled, .. })
    ));
    assert!(csc.lifecycle(LifecycleCommand::Standby).await.is_err());
    assert!(link.sent().is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_enable_keeps_state() -> TestResult {
    let link = ScriptedLink::new(Reply::Fail);
    let csc = csc_with(SummaryState::Disabled, link, 1.0);
    assert!(csc.enable().await.is_err());
    assert_eq!(csc.summary_state(), SummaryState::Disabled);
    Ok(())
}

#[tokio::test]
async fn invalid_simulation_mode_is_rejected() {
    assert!(matches!(
        PneumaticsCsc::new(config(1.0), 2),
        Err(PneumaticsError::InvalidConfig(_))
    ));
}

// ────────────────────────────────────────────────────────────────────────────
// Simulation mode
// ────────────────────────────────────────────────────────────────────────────

fn simulated(simulator_config: SimulatorConfig) -> Result<PneumaticsCsc, PneumaticsError> {
    Ok(PneumaticsCsc::new(config(5.0), 1)?.with_simulator_config(simulator_config))
}

#[tokio::test]
async fn simulation_mode_starts_exactly_one_simulator() -> TestResult {
    let csc = simulated(SimulatorConfig::instant())?;
    assert!(csc.simulator_addrs().await.is_none());

    csc.start_clients().await?;
    let first = csc.simulator_addrs().await;
    assert!(first.is_some());
    assert!(csc.connected());

    csc.start_clients().await?;
    assert_eq!(csc.simulator_addrs().await, first);
    assert_eq!(csc.simulators_started(), 1);

    csc.start().await?;
    assert_eq!(csc.simulators_started(), 1);
    csc.close().await;
    Ok(())
}

#[test]
fn default_simulator_moves_fit_inside_the_command_timeout() -> TestResult {
    let cfg = CscConfig {
        cmd_evt_port: 0,
        telemetry_port: 0,
        ..CscConfig::default()
    };
    let csc = PneumaticsCsc::new(cfg, 1)?;
    assert_eq!(csc.cmd_done_timeout(), Duration::from_secs(20));
    assert!(csc.simulator_config().longest_travel() < csc.cmd_done_timeout());
    assert!(csc.simulator_config().m1_covers_open_time > Duration::ZERO);
    Ok(())
}

#[tokio::test]
async fn cover_commands_complete_with_default_simulator_timings() -> TestResult {
    // Default timings scaled to a short timeout keep the real travel.
    let csc = PneumaticsCsc::new(config(0.6), 1)?;
    let travel = csc.simulator_config().m1_covers_open_time;
    assert_eq!(travel, Duration::from_millis(300));

    csc.start().await?;
    csc.enable().await?;

    let started = tokio::time::Instant::now();
    csc.open_m1_cover().await?;
    assert!(started.elapsed() >= travel);
    csc.close_m1_cover().await?;
    csc.open_m1_cell_vents().await?;

    csc.close().await;
    Ok(())
}

#[tokio::test]
async fn real_mode_never_starts_a_simulator() -> TestResult {
    let csc = PneumaticsCsc::new(config(1.0), 0)?;
    // Nothing listens on port 0, so connecting fails.
    assert!(csc.start_clients().await.is_err());
    assert_eq!(csc.simulators_started(), 0);
    assert!(csc.simulator_addrs().await.is_none());
    Ok(())
}

#[tokio::test]
async fn full_session_against_the_simulator() -> TestResult {
    let csc = simulated(SimulatorConfig::instant())?;
    let mut events = csc.bus().subscribe_to(Topic::Events);

    csc.start().await?;
    assert_eq!(csc.summary_state(), SummaryState::Disabled);
    assert!(matches!(
        csc.open_m1_cover().await,
        Err(PneumaticsError::NotEnabled { .. })
    ));

    csc.enable().await?;
    csc.open_m1_cover().await?;
    csc.m1_set_pressure(4.5).await?;
    csc.close_master_air_supply().await?;

    let mut cover_opened = false;
    let mut pressure_set = false;
    while !(cover_opened && pressure_set) {
        let envelope = tokio::time::timeout(Duration::from_secs(3), events.recv()).await??;
        match envelope.payload {
            BusPayload::Event(ControllerEvent::M1CoverState {
                state: MirrorCoverState::Opened,
            }) => cover_opened = true,
            BusPayload::Event(ControllerEvent::M1SetPressure { pressure }) if pressure == 4.5 => {
                pressure_set = true
            }
            _ => {}
        }
    }

    csc.disable().await?;
    csc.standby().await?;
    assert_eq!(csc.summary_state(), SummaryState::Standby);
    assert!(!csc.connected());

    // The simulator survives standby; a restart reuses it.
    csc.start().await?;
    assert_eq!(csc.summary_state(), SummaryState::Disabled);
    assert_eq!(csc.simulators_started(), 1);

    csc.standby().await?;
    csc.exit_control().await?;
    assert_eq!(csc.summary_state(), SummaryState::Offline);
    assert!(csc.simulator_addrs().await.is_none());
    Ok(())
}

#[tokio::test]
async fn controller_fault_moves_csc_to_fault() -> TestResult {
    let csc = simulated(SimulatorConfig {
        go_to_fault_state: true,
        ..SimulatorConfig::instant()
    })?;
    let mut state = csc.subscribe_state();

    csc.start().await?;
    tokio::time::timeout(
        Duration::from_secs(3),
        state.wait_for(|s| *s == SummaryState::Fault),
    )
    .await??;

    csc.standby().await?;
    assert_eq!(csc.summary_state(), SummaryState::Standby);
    csc.close().await;
    Ok(())
}

#[tokio::test]
async fn lost_connection_moves_csc_to_fault() -> TestResult {
    let cmd_evt = TcpListener::bind("127.0.0.1:0").await?;
    let telemetry = TcpListener::bind("127.0.0.1:0").await?;
    let csc = PneumaticsCsc::new(
        CscConfig {
            cmd_evt_port: cmd_evt.local_addr()?.port(),
            telemetry_port: telemetry.local_addr()?.port(),
            ..config(2.0)
        },
        0,
    )?;

    // Answer cmd_start, then hang up.
    let controller = tokio::spawn(async move {
        let (stream, _) = cmd_evt.accept().await?;
        let (_tel, _) = telemetry.accept().await?;
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);
        let request: Value = read_json(&mut reader).await?.unwrap_or_default();
        let sequence_id = request["sequence_id"].as_u64().unwrap_or_default();
        write_json(&mut write, &json!({"id": "ack", "sequence_id": sequence_id})).await?;
        write_json(&mut write, &json!({"id": "success", "sequence_id": sequence_id})).await?;
        Ok::<_, PneumaticsError>(request)
    });

    let mut state = csc.subscribe_state();
    csc.start().await?;
    let request = controller.await??;
    assert_eq!(request["id"], "cmd_start");

    tokio::time::timeout(
        Duration::from_secs(3),
        state.wait_for(|s| *s == SummaryState::Fault),
    )
    .await??;
    Ok(())
}
