//! TCP/IP client for the pneumatics controller.
//!
//! [`TcpipClient`] opens the two controller connections:
//!
//! 1. **command/event** – commands go out, command responses and events come
//!    back.  Responses are matched to outstanding commands by `sequence_id`;
//!    events are republished on [`Topic::Events`].
//!
//! 2. **telemetry** – read-only; every sample is republished on
//!    [`Topic::Telemetry`].
//!
//! Sequence ids start at 1 on every new connection and increase by one per
//! command.  They are assigned under the writer lock so that ids reach the
//! controller in order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use atpneumatics_types::{
    Ack, BusPayload, CmdEvtMessage, CommandRequest, CommandResponse, Envelope, PneumaticsError,
    TelemetryMessage,
};
use serde_json::Value;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adapter::{CommandIssued, CommandLink};
use crate::bus::{EventBus, Topic};
use crate::codec::{read_json, write_json};

const CMD_EVT_SOURCE: &str = "atpneumatics-middleware::cmd_evt";
const TELEMETRY_SOURCE: &str = "atpneumatics-middleware::telemetry";

struct PendingCommand {
    command: String,
    acked: bool,
    done: oneshot::Sender<Result<(), PneumaticsError>>,
}

type PendingMap = Arc<Mutex<HashMap<u64, PendingCommand>>>;

struct Writer {
    half: OwnedWriteHalf,
    next_sequence_id: u64,
}

/// Client side of the controller's command/event and telemetry servers.
pub struct TcpipClient {
    writer: tokio::sync::Mutex<Option<Writer>>,
    /// Never written; dropping it would half-close the telemetry stream.
    telemetry_write: Mutex<Option<OwnedWriteHalf>>,
    pending: PendingMap,
    connected: Arc<AtomicBool>,
    readers: Mutex<Vec<JoinHandle<()>>>,
}

impl TcpipClient {
    /// Connect to `host` on both ports and start the reader tasks.
    ///
    /// # Errors
    ///
    /// Returns [`PneumaticsError::Io`] if either connection is refused.
    pub async fn connect(
        host: &str,
        cmd_evt_port: u16,
        telemetry_port: u16,
        bus: Arc<EventBus>,
    ) -> Result<Self, PneumaticsError> {
        let cmd_evt = TcpStream::connect((host, cmd_evt_port)).await.map_err(|e| {
            PneumaticsError::Io(format!("cmd/evt connect to {host}:{cmd_evt_port}: {e}"))
        })?;
        let telemetry = TcpStream::connect((host, telemetry_port)).await.map_err(|e| {
            PneumaticsError::Io(format!("telemetry connect to {host}:{telemetry_port}: {e}"))
        })?;
        info!(host, cmd_evt_port, telemetry_port, "connected to pneumatics controller");

        let (cmd_evt_read, cmd_evt_write) = cmd_evt.into_split();
        let (telemetry_read, telemetry_write) = telemetry.into_split();

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));

        let cmd_evt_task = tokio::spawn(read_cmd_evt(
            cmd_evt_read,
            Arc::clone(&pending),
            Arc::clone(&connected),
            Arc::clone(&bus),
        ));
        let telemetry_task = tokio::spawn(read_telemetry(telemetry_read, Arc::clone(&bus)));

        Ok(Self {
            writer: tokio::sync::Mutex::new(Some(Writer {
                half: cmd_evt_write,
                next_sequence_id: 1,
            })),
            telemetry_write: Mutex::new(Some(telemetry_write)),
            pending,
            connected,
            readers: Mutex::new(vec![cmd_evt_task, telemetry_task]),
        })
    }

    /// Number of commands written whose caller is still waiting.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }
}

#[async_trait]
impl CommandLink for TcpipClient {
    async fn write_command(
        &self,
        id: &str,
        pressure: Option<f64>,
    ) -> Result<CommandIssued, PneumaticsError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(PneumaticsError::NotConnected)?;
        if !self.connected.load(Ordering::SeqCst) {
            return Err(PneumaticsError::NotConnected);
        }

        let sequence_id = writer.next_sequence_id;
        writer.next_sequence_id += 1;

        let (tx, rx) = oneshot::channel();
        insert_pending(&self.pending, sequence_id, id, tx)?;

        let request = CommandRequest {
            id: id.to_string(),
            sequence_id,
            pressure,
        };
        if let Err(e) = write_json(&mut writer.half, &request).await {
            remove_pending(&self.pending, sequence_id);
            return Err(e);
        }
        debug!(command = id, sequence_id, "command written");

        let pending = Arc::clone(&self.pending);
        Ok(CommandIssued::new(sequence_id, rx).on_abandon(move |sequence_id| {
            if let Some(p) = remove_pending(&pending, sequence_id) {
                debug!(command = %p.command, sequence_id, "command abandoned");
            }
        }))
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(mut writer) = self.writer.lock().await.take() {
            use tokio::io::AsyncWriteExt;
            let _ = writer.half.shutdown().await;
        }
        if let Ok(mut telemetry_write) = self.telemetry_write.lock() {
            telemetry_write.take();
        }
        if let Ok(mut readers) = self.readers.lock() {
            for task in readers.drain(..) {
                task.abort();
            }
        }
        fail_all_pending(&self.pending);
        info!("pneumatics controller connections closed");
    }
}

impl Drop for TcpipClient {
    fn drop(&mut self) {
        if let Ok(mut readers) = self.readers.lock() {
            for task in readers.drain(..) {
                task.abort();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Pending-command bookkeeping
// ---------------------------------------------------------------------------

fn insert_pending(
    pending: &PendingMap,
    sequence_id: u64,
    command: &str,
    done: oneshot::Sender<Result<(), PneumaticsError>>,
) -> Result<(), PneumaticsError> {
    let mut map = pending
        .lock()
        .map_err(|e| PneumaticsError::Channel(format!("pending map poisoned: {e}")))?;
    map.insert(
        sequence_id,
        PendingCommand {
            command: command.to_string(),
            acked: false,
            done,
        },
    );
    Ok(())
}

fn remove_pending(pending: &PendingMap, sequence_id: u64) -> Option<PendingCommand> {
    pending.lock().ok()?.remove(&sequence_id)
}

fn fail_all_pending(pending: &PendingMap) {
    let drained: Vec<PendingCommand> = match pending.lock() {
        Ok(mut map) => map.drain().map(|(_, p)| p).collect(),
        Err(_) => return,
    };
    for p in drained {
        let _ = p.done.send(Err(PneumaticsError::NotConnected));
    }
}

/// Resolve an outstanding command from a controller response.
fn handle_response(pending: &PendingMap, response: CommandResponse) {
    let CommandResponse { id, sequence_id } = response;
    match id {
        Ack::Ack => {
            let known = pending
                .lock()
                .ok()
                .and_then(|mut map| map.get_mut(&sequence_id).map(|p| p.acked = true))
                .is_some();
            if !known {
                warn!(sequence_id, "ack for unknown command");
            }
        }
        Ack::Success => match remove_pending(pending, sequence_id) {
            Some(p) => {
                debug!(command = %p.command, sequence_id, acked = p.acked, "command done");
                let _ = p.done.send(Ok(()));
            }
            None => warn!(sequence_id, "success for unknown command"),
        },
        Ack::Noack | Ack::Fail => match remove_pending(pending, sequence_id) {
            Some(p) => {
                warn!(command = %p.command, sequence_id, ack = ?id, "command rejected");
                let _ = p.done.send(Err(PneumaticsError::CommandRejected {
                    command: p.command,
                    ack: id,
                }));
            }
            None => warn!(sequence_id, ack = ?id, "response for unknown command"),
        },
    }
}

// ---------------------------------------------------------------------------
// Reader tasks
// ---------------------------------------------------------------------------

async fn read_cmd_evt(
    read: OwnedReadHalf,
    pending: PendingMap,
    connected: Arc<AtomicBool>,
    bus: Arc<EventBus>,
) {
    let mut reader = BufReader::new(read);
    loop {
        match read_json::<_, Value>(&mut reader).await {
            Ok(Some(value)) => match serde_json::from_value::<CmdEvtMessage>(value.clone()) {
                Ok(CmdEvtMessage::Response(response)) => handle_response(&pending, response),
                Ok(CmdEvtMessage::Event(event)) => {
                    debug!(event = event.name(), "controller event");
                    let _ = bus.publish_to(
                        Topic::Events,
                        Envelope::new(CMD_EVT_SOURCE, BusPayload::Event(event)),
                    );
                }
                Err(e) => warn!(error = %e, message = %value, "unrecognised cmd/evt message"),
            },
            Ok(None) => break,
            Err(PneumaticsError::Serialization(e)) => {
                warn!(error = %e, "malformed cmd/evt frame");
            }
            Err(e) => {
                warn!(error = %e, "cmd/evt read error");
                break;
            }
        }
    }

    if connected.swap(false, Ordering::SeqCst) {
        warn!("cmd/evt connection lost");
        let _ = bus.publish_to(
            Topic::SystemAlerts,
            Envelope::new(
                CMD_EVT_SOURCE,
                BusPayload::ConnectionLost {
                    channel: "cmd_evt".to_string(),
                },
            ),
        );
    }
    fail_all_pending(&pending);
}

async fn read_telemetry(read: OwnedReadHalf, bus: Arc<EventBus>) {
    let mut reader = BufReader::new(read);
    loop {
        match read_json::<_, TelemetryMessage>(&mut reader).await {
            Ok(Some(sample)) => {
                let _ = bus.publish_to(
                    Topic::Telemetry,
                    Envelope::new(TELEMETRY_SOURCE, BusPayload::Telemetry(sample)),
                );
            }
            Ok(None) => break,
            Err(PneumaticsError::Serialization(e)) => {
                warn!(error = %e, "malformed telemetry frame");
            }
            Err(e) => {
                warn!(error = %e, "telemetry read error");
                break;
            }
        }
    }
    debug!("telemetry connection closed");
}
