//! TCP server that serves a single client at a time.
//!
//! Every inbound frame is decoded as JSON and forwarded, together with
//! connect/disconnect notifications, over an `mpsc` channel.  A client that
//! connects while another is being served waits briefly for the slot to free
//! up and is disconnected if it does not.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use atpneumatics_middleware::codec::{read_json, write_json};
use atpneumatics_types::PneumaticsError;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long a new client may wait for the previous one to finish
/// disconnecting.
const HANDOVER_GRACE: Duration = Duration::from_millis(250);

/// Notifications from a [`OneClientServer`].
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Connected,
    Received(Value),
    Disconnected,
}

type WriterSlot = Arc<Mutex<Option<OwnedWriteHalf>>>;

pub struct OneClientServer {
    name: String,
    local_addr: SocketAddr,
    writer: WriterSlot,
    occupied: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
    reader_task: Arc<StdMutex<Option<JoinHandle<()>>>>,
}

impl OneClientServer {
    /// Bind `host:port` (port 0 picks a free port) and start accepting.
    pub async fn bind(
        name: impl Into<String>,
        host: &str,
        port: u16,
        events: mpsc::Sender<ServerEvent>,
    ) -> Result<Self, PneumaticsError> {
        let name = name.into();
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|e| PneumaticsError::Io(format!("{name}: bind {host}:{port}: {e}")))?;
        let local_addr = listener.local_addr()?;
        info!(server = %name, %local_addr, "listening");

        let writer: WriterSlot = Arc::new(Mutex::new(None));
        let (occupied, _) = watch::channel(false);
        let reader_task = Arc::new(StdMutex::new(None));

        let accept_task = tokio::spawn(accept_loop(
            name.clone(),
            listener,
            Arc::clone(&writer),
            occupied.clone(),
            Arc::clone(&reader_task),
            events,
        ));

        Ok(Self {
            name,
            local_addr,
            writer,
            occupied,
            accept_task,
            reader_task,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// `true` while a client is being served.
    pub fn connected(&self) -> bool {
        *self.occupied.borrow()
    }

    /// Write one framed JSON message to the current client.
    ///
    /// # Errors
    ///
    /// [`PneumaticsError::NotConnected`] when no client is connected.
    pub async fn write_json<T: Serialize + ?Sized>(&self, msg: &T) -> Result<(), PneumaticsError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(PneumaticsError::NotConnected)?;
        write_json(writer, msg).await
    }

    /// Stop accepting and drop the current client.
    pub async fn close(&self) {
        self.accept_task.abort();
        if let Ok(mut slot) = self.reader_task.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.occupied.send_replace(false);
        debug!(server = %self.name, "closed");
    }
}

impl Drop for OneClientServer {
    fn drop(&mut self) {
        self.accept_task.abort();
        if let Ok(mut slot) = self.reader_task.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }
}

async fn accept_loop(
    name: String,
    listener: TcpListener,
    writer: WriterSlot,
    occupied: watch::Sender<bool>,
    reader_task: Arc<StdMutex<Option<JoinHandle<()>>>>,
    events: mpsc::Sender<ServerEvent>,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(server = %name, error = %e, "accept failed");
                continue;
            }
        };

        let mut free = occupied.subscribe();
        let handed_over = matches!(
            tokio::time::timeout(HANDOVER_GRACE, free.wait_for(|busy| !*busy)).await,
            Ok(Ok(_))
        );
        if !handed_over {
            warn!(server = %name, %peer, "already serving a client; refusing connection");
            drop(stream);
            continue;
        }

        let (read, write) = stream.into_split();
        *writer.lock().await = Some(write);
        occupied.send_replace(true);
        info!(server = %name, %peer, "client connected");
        if events.send(ServerEvent::Connected).await.is_err() {
            return;
        }

        let task = tokio::spawn(read_loop(
            name.clone(),
            read,
            Arc::clone(&writer),
            occupied.clone(),
            events.clone(),
        ));
        if let Ok(mut slot) = reader_task.lock() {
            if let Some(previous) = slot.replace(task) {
                previous.abort();
            }
        }
    }
}

async fn read_loop(
    name: String,
    read: OwnedReadHalf,
    writer: WriterSlot,
    occupied: watch::Sender<bool>,
    events: mpsc::Sender<ServerEvent>,
) {
    let mut reader = BufReader::new(read);
    loop {
        match read_json::<_, Value>(&mut reader).await {
            Ok(Some(value)) => {
                if events.send(ServerEvent::Received(value)).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(PneumaticsError::Serialization(e)) => {
                warn!(server = %name, error = %e, "dropping malformed frame");
            }
            Err(e) => {
                warn!(server = %name, error = %e, "read failed");
                break;
            }
        }
    }

    info!(server = %name, "client disconnected");
    let _ = events.send(ServerEvent::Disconnected).await;
    writer.lock().await.take();
    occupied.send_replace(false);
}
