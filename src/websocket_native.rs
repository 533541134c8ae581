//! Native guidance client for connecting to the store positioning service
//!
//! Uses tokio-tungstenite in a background thread. The caller talks to it
//! through a command channel and reads a shared snapshot; all decisions are
//! made by [`GuidanceMachine`], this module only carries out its effects.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::config::GuidanceConfig;
use crate::core::{DirectionFrame, Effect, GuidanceMachine, GuidanceView, TransportId};
use crate::error::GuidanceError;
use crate::time::now_seconds;
use crate::ws_state::ConnectionStatus;

/// How long dispose waits for the close handshake before dropping the socket
const CLOSE_GRACE: Duration = Duration::from_secs(1);

enum Command {
    FetchClosest,
    Dispose,
}

/// Everything that feeds the state machine from the I/O side
#[derive(Debug)]
enum DriverEvent {
    Opened(TransportId),
    Frame(TransportId, String),
    Error(TransportId, String),
    Closed(TransportId),
    LivenessElapsed(u64),
    ReconnectElapsed,
}

/// Snapshot published to the caller; frozen once `disposed` is set
#[derive(Default)]
struct Shared {
    view: GuidanceView,
    disposed: bool,
}

/// Native guidance client that runs in a background thread
pub struct NativeGuidanceClient {
    commands: UnboundedSender<Command>,
    shared: Arc<Mutex<Shared>>,
}

impl NativeGuidanceClient {
    /// Validate `config` and start connecting
    ///
    /// Spawns a background thread with a tokio runtime that owns the socket,
    /// the timers, and the state machine until [`dispose`](Self::dispose).
    pub fn connect(config: GuidanceConfig) -> Result<Self, GuidanceError> {
        config.validate()?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Mutex::new(Shared::default()));

        let driver = Driver::new(config, command_rx, shared.clone());
        std::thread::Builder::new()
            .name("guidance-ws".into())
            .spawn(move || runtime.block_on(driver.run()))?;

        Ok(Self { commands, shared })
    }

    /// Ask the positioning service for the nearest product
    pub fn send_fetch_closest(&self) -> Result<(), GuidanceError> {
        if self.shared.lock().disposed {
            return Err(GuidanceError::Disposed);
        }
        self.commands
            .send(Command::FetchClosest)
            .map_err(|_| GuidanceError::Disposed)
    }

    /// Stop the client. The snapshot is frozen as soon as this returns.
    pub fn dispose(&self) {
        {
            let mut shared = self.shared.lock();
            if shared.disposed {
                return;
            }
            shared.disposed = true;
        }
        // Driver already gone means nothing is left to clean up
        let _ = self.commands.send(Command::Dispose);
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.lock().disposed
    }

    pub fn view(&self) -> GuidanceView {
        self.shared.lock().view.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.lock().view.status
    }

    pub fn last_direction(&self) -> Option<DirectionFrame> {
        self.shared.lock().view.direction().cloned()
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared.lock().view.last_error.clone()
    }

    /// Bearing of the last direction, in degrees
    pub fn heading(&self) -> Option<f64> {
        self.shared.lock().view.heading()
    }
}

impl Drop for NativeGuidanceClient {
    fn drop(&mut self) {
        self.dispose();
    }
}

struct Socket {
    id: TransportId,
    outbound: UnboundedSender<String>,
    task: JoinHandle<()>,
}

/// Runs on the background runtime and executes machine effects
struct Driver {
    machine: GuidanceMachine,
    commands: UnboundedReceiver<Command>,
    events_tx: UnboundedSender<DriverEvent>,
    events: UnboundedReceiver<DriverEvent>,
    shared: Arc<Mutex<Shared>>,
    socket: Option<Socket>,
    /// Socket task finishing its close handshake after dispose
    closing: Option<JoinHandle<()>>,
    liveness: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

impl Driver {
    fn new(
        config: GuidanceConfig,
        commands: UnboundedReceiver<Command>,
        shared: Arc<Mutex<Shared>>,
    ) -> Self {
        let (events_tx, events) = mpsc::unbounded_channel();
        Self {
            machine: GuidanceMachine::new(config),
            commands,
            events_tx,
            events,
            shared,
            socket: None,
            closing: None,
            liveness: None,
            reconnect: None,
        }
    }

    async fn run(mut self) {
        let effects = self.machine.connect();
        self.apply(effects);
        self.publish();

        while !self.machine.is_disposed() {
            let effects = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::FetchClosest) => self.machine.send_fetch_closest(),
                    // Handle dropped without dispose() is treated the same
                    Some(Command::Dispose) | None => self.machine.dispose(),
                },
                Some(event) = self.events.recv() => self.handle(event),
            };
            self.apply(effects);
            self.publish();
        }

        if let Some(task) = self.closing.take() {
            if tokio::time::timeout(CLOSE_GRACE, task).await.is_err() {
                debug!("Close handshake timed out");
            }
        }
        info!("Guidance driver stopped");
    }

    fn handle(&mut self, event: DriverEvent) -> Vec<Effect> {
        match event {
            DriverEvent::Opened(id) => self.machine.on_open(id),
            DriverEvent::Frame(id, text) => self.machine.on_frame(id, &text, now_seconds()),
            DriverEvent::Error(id, message) => self.machine.on_transport_error(id, &message),
            DriverEvent::Closed(id) => {
                if self.socket.as_ref().is_some_and(|s| s.id == id) {
                    self.socket = None;
                }
                self.machine.on_transport_close(id)
            }
            DriverEvent::LivenessElapsed(generation) => self.machine.on_liveness_elapsed(generation),
            DriverEvent::ReconnectElapsed => {
                self.reconnect = None;
                self.machine.on_reconnect_elapsed()
            }
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Open { id, url } => {
                    if let Some(old) = self.socket.take() {
                        old.task.abort();
                    }
                    let (outbound, outbound_rx) = mpsc::unbounded_channel();
                    let task = tokio::spawn(run_socket(id, url, outbound_rx, self.events_tx.clone()));
                    self.socket = Some(Socket { id, outbound, task });
                }
                Effect::Send(text) => match &self.socket {
                    Some(socket) => {
                        if socket.outbound.send(text).is_err() {
                            warn!(transport = socket.id, "Socket task gone, frame dropped");
                        }
                    }
                    None => warn!("No socket to send on, frame dropped"),
                },
                Effect::Close => {
                    // Dropping the sender makes the socket task close gracefully
                    if let Some(Socket { task, .. }) = self.socket.take() {
                        self.closing = Some(task);
                    }
                }
                Effect::ArmLiveness { generation, after } => {
                    abort(self.liveness.take());
                    self.liveness = Some(self.after(after, DriverEvent::LivenessElapsed(generation)));
                }
                Effect::DisarmLiveness => abort(self.liveness.take()),
                Effect::ScheduleReconnect { after } => {
                    abort(self.reconnect.take());
                    self.reconnect = Some(self.after(after, DriverEvent::ReconnectElapsed));
                }
                Effect::CancelReconnect => abort(self.reconnect.take()),
            }
        }
    }

    /// Deliver `event` back to the loop after `delay`
    fn after(&self, delay: Duration, event: DriverEvent) -> JoinHandle<()> {
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(event);
        })
    }

    fn publish(&self) {
        let mut shared = self.shared.lock();
        if !shared.disposed {
            shared.view = self.machine.view().clone();
        }
    }
}

fn abort(task: Option<JoinHandle<()>>) {
    if let Some(task) = task {
        task.abort();
    }
}

/// One socket's lifetime: connect, pump frames both ways, report the close
async fn run_socket(
    id: TransportId,
    url: String,
    mut outbound: UnboundedReceiver<String>,
    events: UnboundedSender<DriverEvent>,
) {
    let ws_stream = match connect_async(url.as_str()).await {
        Ok((stream, _)) => {
            info!(transport = id, "WebSocket connected");
            let _ = events.send(DriverEvent::Opened(id));
            stream
        }
        Err(e) => {
            error!(transport = id, error = %e, "Failed to connect");
            let _ = events.send(DriverEvent::Error(id, e.to_string()));
            let _ = events.send(DriverEvent::Closed(id));
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            text = outbound.recv() => match text {
                Some(text) => {
                    debug!(transport = id, frame = %text, "Sending frame");
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        error!(transport = id, error = %e, "Failed to send frame");
                        let _ = events.send(DriverEvent::Error(id, e.to_string()));
                        break;
                    }
                }
                None => {
                    debug!(transport = id, "Closing WebSocket");
                    if let Err(e) = write.close().await {
                        debug!(transport = id, error = %e, "Close handshake failed");
                    }
                    break;
                }
            },
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if events.send(DriverEvent::Frame(id, text.to_string())).is_err() {
                        // Driver gone, exit
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    warn!(transport = id, ?frame, "WebSocket closed by server");
                    break;
                }
                Some(Err(e)) => {
                    error!(transport = id, error = %e, "WebSocket error");
                    let _ = events.send(DriverEvent::Error(id, e.to_string()));
                    break;
                }
                None => break,
                _ => {}
            }
        }
    }

    warn!(transport = id, "WebSocket stream ended");
    let _ = events.send(DriverEvent::Closed(id));
}
