//! Integration tests for `TcpipClient` against a scripted fake controller.

use std::sync::Arc;
use std::time::Duration;

use atpneumatics_middleware::codec::{read_json, write_json};
use atpneumatics_middleware::{CommandLink, EventBus, TcpipClient, Topic};
use atpneumatics_types::{Ack, BusPayload, ControllerEvent, PneumaticsError, TelemetryMessage};
use serde_json::{Value, json};
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};

type TestResult = Result<(), Box<dyn std::error::Error>>;

struct FakeController {
    cmd_evt: TcpListener,
    telemetry: TcpListener,
}

impl FakeController {
    async fn bind() -> std::io::Result<Self> {
        Ok(Self {
            cmd_evt: TcpListener::bind("127.0.0.1:0").await?,
            telemetry: TcpListener::bind("127.0.0.1:0").await?,
        })
    }

    fn ports(&self) -> std::io::Result<(u16, u16)> {
        Ok((
            self.cmd_evt.local_addr()?.port(),
            self.telemetry.local_addr()?.port(),
        ))
    }

    async fn accept(&self) -> std::io::Result<(TcpStream, TcpStream)> {
        let (cmd_evt, _) = self.cmd_evt.accept().await?;
        let (telemetry, _) = self.telemetry.accept().await?;
        Ok((cmd_evt, telemetry))
    }
}

async fn connect(fake: &FakeController, bus: Arc<EventBus>) -> Result<TcpipClient, PneumaticsError> {
    let (cmd_evt_port, telemetry_port) = fake.ports()?;
    TcpipClient::connect("127.0.0.1", cmd_evt_port, telemetry_port, bus).await
}

#[tokio::test]
async fn commands_carry_increasing_sequence_ids() -> TestResult {
    let fake = FakeController::bind().await?;
    let bus = Arc::new(EventBus::default());
    let (client, accepted) = tokio::join!(connect(&fake, Arc::clone(&bus)), fake.accept());
    let client = client?;
    let (cmd_evt, _telemetry) = accepted?;
    let (read, mut write) = cmd_evt.into_split();
    let mut reader = BufReader::new(read);

    let first = client.write_command("cmd_openM1Cover", None).await?;
    let second = client.write_command("cmd_m1SetPressure", Some(4.5)).await?;
    assert_eq!(first.sequence_id(), 1);
    assert_eq!(second.sequence_id(), 2);

    let msg: Value = read_json(&mut reader).await?.ok_or("eof")?;
    assert_eq!(msg, json!({"id": "cmd_openM1Cover", "sequence_id": 1}));
    let msg: Value = read_json(&mut reader).await?.ok_or("eof")?;
    assert_eq!(
        msg,
        json!({"id": "cmd_m1SetPressure", "sequence_id": 2, "pressure": 4.5})
    );

    for seq in [1, 2] {
        write_json(&mut write, &json!({"id": "ack", "sequence_id": seq})).await?;
        write_json(&mut write, &json!({"id": "success", "sequence_id": seq})).await?;
    }
    tokio::time::timeout(Duration::from_secs(2), first.done()).await??;
    tokio::time::timeout(Duration::from_secs(2), second.done()).await??;
    assert_eq!(client.pending_count(), 0);
    Ok(())
}

#[tokio::test]
async fn noack_surfaces_as_rejection() -> TestResult {
    let fake = FakeController::bind().await?;
    let bus = Arc::new(EventBus::default());
    let (client, accepted) = tokio::join!(connect(&fake, bus), fake.accept());
    let client = client?;
    let (cmd_evt, _telemetry) = accepted?;
    let (_read, mut write) = cmd_evt.into_split();

    let issued = client.write_command("cmd_closeM1Cover", None).await?;
    write_json(&mut write, &json!({"id": "noack", "sequence_id": 1})).await?;

    let result = tokio::time::timeout(Duration::from_secs(2), issued.done()).await?;
    assert_eq!(
        result,
        Err(PneumaticsError::CommandRejected {
            command: "cmd_closeM1Cover".into(),
            ack: Ack::Noack,
        })
    );
    Ok(())
}

#[tokio::test]
async fn timed_out_commands_leave_no_pending_entries() -> TestResult {
    let fake = FakeController::bind().await?;
    let bus = Arc::new(EventBus::default());
    let (client, accepted) = tokio::join!(connect(&fake, bus), fake.accept());
    let client = client?;
    let (_cmd_evt, _telemetry) = accepted?;

    for _ in 0..3 {
        let issued = client.write_command("cmd_openM1Cover", None).await?;
        let waited = tokio::time::timeout(Duration::from_millis(50), issued.done()).await;
        assert!(waited.is_err(), "controller never answers");
    }
    assert_eq!(client.pending_count(), 0);

    let dropped = client.write_command("cmd_closeM1Cover", None).await?;
    assert_eq!(client.pending_count(), 1);
    drop(dropped);
    assert_eq!(client.pending_count(), 0);
    Ok(())
}

#[tokio::test]
async fn events_and_telemetry_reach_the_bus() -> TestResult {
    let fake = FakeController::bind().await?;
    let bus = Arc::new(EventBus::default());
    let mut events = bus.subscribe_to(Topic::Events);
    let mut telemetry = bus.subscribe_to(Topic::Telemetry);

    let (client, accepted) = tokio::join!(connect(&fake, Arc::clone(&bus)), fake.accept());
    let _client = client?;
    let (mut cmd_evt, mut tel) = accepted?;

    write_json(&mut cmd_evt, &json!({"id": "evt_eStop", "triggered": true})).await?;
    write_json(&mut tel, &json!({"id": "tel_loadCell", "cellLoad": 100.0})).await?;

    let envelope = tokio::time::timeout(Duration::from_secs(2), events.recv()).await??;
    assert!(matches!(
        envelope.payload,
        BusPayload::Event(ControllerEvent::EStop { triggered: true })
    ));
    let envelope = tokio::time::timeout(Duration::from_secs(2), telemetry.recv()).await??;
    assert!(matches!(
        envelope.payload,
        BusPayload::Telemetry(TelemetryMessage::LoadCell { cell_load }) if cell_load == 100.0
    ));
    Ok(())
}

#[tokio::test]
async fn lost_connection_fails_pending_commands() -> TestResult {
    let fake = FakeController::bind().await?;
    let bus = Arc::new(EventBus::default());
    let mut alerts = bus.subscribe_to(Topic::SystemAlerts);
    let (client, accepted) = tokio::join!(connect(&fake, Arc::clone(&bus)), fake.accept());
    let client = client?;
    let (cmd_evt, _telemetry) = accepted?;

    let issued = client.write_command("cmd_openMasterAirSupply", None).await?;
    drop(cmd_evt);

    let result = tokio::time::timeout(Duration::from_secs(2), issued.done()).await?;
    assert_eq!(result, Err(PneumaticsError::NotConnected));

    let envelope = tokio::time::timeout(Duration::from_secs(2), alerts.recv()).await??;
    assert!(matches!(envelope.payload, BusPayload::ConnectionLost { .. }));
    assert!(!client.connected());
    assert!(matches!(
        client.write_command("cmd_openMasterAirSupply", None).await,
        Err(PneumaticsError::NotConnected)
    ));
    Ok(())
}

#[tokio::test]
async fn close_is_final() -> TestResult {
    let fake = FakeController::bind().await?;
    let bus = Arc::new(EventBus::default());
    let (client, accepted) = tokio::join!(connect(&fake, bus), fake.accept());
    let client = client?;
    let _streams = accepted?;

    client.close().await;
    assert!(!client.connected());
    assert!(matches!(
        client.write_command("cmd_openM1Cover", None).await,
        Err(PneumaticsError::NotConnected)
    ));
    Ok(())
}

#[tokio::test]
async fn connect_refused_is_an_io_error() -> TestResult {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);

    let result = TcpipClient::connect("127.0.0.1", port, port, Arc::new(EventBus::default())).await;
    assert!(matches!(result, Err(PneumaticsError::Io(_))));
    Ok(())
}
