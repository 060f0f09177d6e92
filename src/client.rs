//! Live vessel feed client
//!
//! [`FeedClient`] owns one background task (the driver) which holds the only
//! socket and the only reconnect timer. All socket events, timer ticks and
//! client commands are handled sequentially by that task; results reach the
//! UI layer exclusively through a [`watch`] channel of [`FeedSnapshot`]s.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{SinkExt as _, StreamExt as _};
use secrecy::{ExposeSecret as _, SecretString};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::{
    config::FeedConfig,
    connection::{Action, ConnectionMachine, ConnectionStatus, Event},
    credentials::CredentialProvider,
    decoder::{decode, ClientFrame, FeedMessage},
    errors::{FeedError, SessionError},
    models::{RawVesselRecord, Vessel},
    normalizer::{carry_forward, Normalizer},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Frame = Option<Result<Message, tokio_tungstenite::tungstenite::Error>>;

/// Upper bound on the close handshake during teardown or replacement.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Everything the UI layer can observe about the feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSnapshot {
    /// Mapped vessels, unique by MMSI (or id), in arrival order
    pub vessels: Arc<Vec<Vessel>>,
    /// Unmapped tracker records as received
    pub trackers: Arc<Vec<RawVesselRecord>>,
    pub status: ConnectionStatus,
    /// Reconnect attempts since the last successful authentication
    pub attempt: u32,
    /// Timestamp of the most recent update frame
    pub last_update: Option<DateTime<Utc>>,
    /// Session-fatal error, if any
    pub error: Option<SessionError>,
}

impl Default for FeedSnapshot {
    fn default() -> Self {
        Self {
            vessels: Arc::default(),
            trackers: Arc::default(),
            status: ConnectionStatus::Disconnected,
            attempt: 0,
            last_update: None,
            error: None,
        }
    }
}

impl FeedSnapshot {
    pub fn is_connected(&self) -> bool {
        self.status.is_connected()
    }

    pub fn vessel_count(&self) -> usize {
        self.vessels.len()
    }

    pub fn tracker_count(&self) -> usize {
        self.trackers.len()
    }

    pub fn total_count(&self) -> usize {
        self.vessel_count() + self.tracker_count()
    }
}

#[derive(Debug)]
enum Command {
    Reconnect,
    Teardown,
}

/// Handle to a running feed.
///
/// Must be created inside a Tokio runtime. Dropping the handle aborts the
/// driver task; [`FeedClient::teardown`] shuts it down cleanly.
pub struct FeedClient {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<FeedSnapshot>,
    handle: Option<JoinHandle<()>>,
}

impl FeedClient {
    /// Validate `config`, spawn the driver and start the first connection attempt.
    pub fn connect(
        config: FeedConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, FeedError> {
        config.validate()?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(FeedSnapshot::default());

        let driver = Driver {
            endpoint: config.endpoint()?,
            connect_timeout: config.connect_timeout,
            credentials,
            normalizer: config.normalizer(),
            machine: ConnectionMachine::new(config.reconnect_policy()),
            commands: command_rx,
            socket: None,
            token: None,
            reconnect_at: None,
            snapshot: snapshot_tx,
        };

        let handle = tokio::spawn(driver.run());

        Ok(Self {
            commands: command_tx,
            snapshot: snapshot_rx,
            handle: Some(handle),
        })
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> FeedSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified on every published change.
    pub fn subscribe(&self) -> watch::Receiver<FeedSnapshot> {
        self.snapshot.clone()
    }

    /// Drop the current socket (if any) and connect again right away.
    pub fn reconnect(&self) -> Result<(), FeedError> {
        if self.handle.is_none() {
            return Err(FeedError::TornDown);
        }
        self.commands
            .send(Command::Reconnect)
            .map_err(|_| FeedError::TornDown)
    }

    /// Cancel the reconnect timer, close the socket and wait for the driver
    /// to exit. Safe to call repeatedly.
    pub async fn teardown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        // The driver may already be gone; awaiting the handle covers both cases.
        let _ = self.commands.send(Command::Teardown);
        if let Err(e) = handle.await {
            warn!("Feed driver ended abnormally: {}", e);
        }
    }
}

impl Drop for FeedClient {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

struct Driver {
    endpoint: Url,
    connect_timeout: Duration,
    credentials: Arc<dyn CredentialProvider>,
    normalizer: Normalizer,
    machine: ConnectionMachine,
    commands: mpsc::UnboundedReceiver<Command>,
    socket: Option<WsStream>,
    /// Token fetched for the attempt in progress
    token: Option<SecretString>,
    reconnect_at: Option<Instant>,
    snapshot: watch::Sender<FeedSnapshot>,
}

impl Driver {
    async fn run(mut self) {
        let connect = self.credential_event(false);
        self.apply(connect).await;

        while !self.machine.is_torn_down() {
            let deadline = self.reconnect_at.unwrap_or_else(Instant::now);
            tokio::select! {
                command = self.commands.recv() => {
                    let event = self.command_event(command);
                    self.apply(event).await;
                }
                frame = next_frame(&mut self.socket), if self.socket.is_some() => {
                    self.on_frame(frame).await;
                }
                _ = sleep_until(deadline), if self.reconnect_at.is_some() => {
                    self.reconnect_at = None;
                    let event = self.credential_event(true);
                    self.apply(event).await;
                }
            }
        }

        debug!("Feed driver stopped");
    }

    /// Look up the token for a new attempt.
    fn credential_event(&mut self, from_timer: bool) -> Event {
        self.token = self.credentials.token();
        let has_credential = self.token.is_some();
        if from_timer {
            Event::TimerElapsed { has_credential }
        } else {
            Event::Connect { has_credential }
        }
    }

    fn command_event(&mut self, command: Option<Command>) -> Event {
        match command {
            Some(Command::Reconnect) => {
                info!("Manual reconnect requested");
                self.credential_event(false)
            }
            // A closed channel means the client handle is gone.
            Some(Command::Teardown) | None => Event::Teardown,
        }
    }

    /// Feed an event to the machine, perform the resulting actions and any
    /// events they produce, then publish the new state.
    async fn apply(&mut self, event: Event) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            trace!("Connection event: {:?}", event);
            for action in self.machine.handle(event) {
                queue.extend(self.perform(action).await);
            }
        }
        self.publish_status();
    }

    async fn perform(&mut self, action: Action) -> Vec<Event> {
        match action {
            Action::OpenSocket => return self.open_socket().await,
            Action::CloseSocket => self.close_socket().await,
            Action::ScheduleReconnect(delay) => {
                self.reconnect_at = Some(Instant::now() + delay);
            }
            Action::CancelTimer => self.reconnect_at = None,
            Action::ClearSnapshot => self.clear_snapshot(),
        }
        Vec::new()
    }

    async fn open_socket(&mut self) -> Vec<Event> {
        let Some(token) = self.token.take() else {
            return vec![Event::Connect {
                has_credential: false,
            }];
        };

        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("token", token.expose_secret());

        info!("Opening socket to {}", self.endpoint);
        self.publish_status();

        let attempt = timeout(self.connect_timeout, connect_async(url.as_str()));
        tokio::select! {
            result = attempt => match result {
                Ok(Ok((socket, _response))) => {
                    self.socket = Some(socket);
                    vec![Event::Opened]
                }
                Ok(Err(e)) => {
                    let error = FeedError::from(e);
                    vec![
                        Event::TransportError(format!("{}: {}", error, error_source(&error))),
                        Event::Closed { code: None },
                    ]
                }
                Err(_) => vec![
                    Event::TransportError(FeedError::ConnectTimeout.to_string()),
                    Event::Closed { code: None },
                ],
            },
            command = self.commands.recv() => {
                debug!("Connection attempt interrupted by {:?}", command);
                vec![self.command_event(command)]
            }
        }
    }

    async fn close_socket(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            debug!("Closing socket");
            match timeout(CLOSE_TIMEOUT, socket.close(None)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Socket close failed: {}", e),
                Err(_) => debug!("Socket close timed out"),
            }
        }
    }

    async fn on_frame(&mut self, frame: Frame) {
        match frame {
            Some(Ok(Message::Text(text))) => self.on_text(text.as_str()).await,
            Some(Ok(Message::Close(close))) => {
                let code = close.as_ref().map(|f| u16::from(f.code));
                info!("Socket closed by server: {:?}", close);
                // Flush the queued close reply before dropping the stream.
                self.close_socket().await;
                self.apply(Event::Closed { code }).await;
            }
            Some(Ok(other)) => trace!("Ignoring non-text frame: {:?}", other),
            Some(Err(e)) => {
                warn!("Socket error: {}", e);
                self.socket = None;
                self.apply(Event::TransportError(e.to_string())).await;
                self.apply(Event::Closed { code: None }).await;
            }
            None => {
                self.socket = None;
                self.apply(Event::Closed { code: None }).await;
            }
        }
    }

    async fn on_text(&mut self, text: &str) {
        match decode(text) {
            Ok(FeedMessage::AuthAck { success, reason }) => {
                self.apply(Event::AuthAck { success, reason }).await;
            }
            Ok(FeedMessage::VesselUpdate { records, timestamp }) => {
                self.on_update(records, timestamp);
            }
            Ok(FeedMessage::Heartbeat) => self.send_pong().await,
            Ok(FeedMessage::Unrecognized { raw }) => {
                debug!("Ignoring unrecognized frame: {}", raw);
            }
            Err(e) => warn!(error = %e, "Dropping undecodable frame"),
        }
    }

    fn on_update(&mut self, records: Vec<RawVesselRecord>, timestamp: Option<DateTime<Utc>>) {
        let reference = timestamp.unwrap_or_else(Utc::now);
        let total = records.len();
        let mut batch = self.normalizer.normalize_batch(records, reference);

        debug!(
            total,
            mapped = batch.vessels.len(),
            unmapped = batch.trackers.len(),
            rejected = batch.rejected,
            "Received vessel update"
        );

        self.snapshot.send_modify(|snapshot| {
            carry_forward(&snapshot.vessels, &mut batch.vessels);
            snapshot.vessels = Arc::new(batch.vessels);
            snapshot.trackers = Arc::new(batch.trackers);
            snapshot.last_update = Some(reference);
        });
    }

    /// Reply to a heartbeat before reading the next frame.
    async fn send_pong(&mut self) {
        let Some(socket) = self.socket.as_mut() else {
            return;
        };
        let pong = Message::Text(ClientFrame::Pong.encode().into());
        if let Err(e) = socket.send(pong).await {
            warn!("Failed to answer heartbeat: {}", e);
            self.socket = None;
            self.apply(Event::TransportError(e.to_string())).await;
            self.apply(Event::Closed { code: None }).await;
        }
    }

    fn clear_snapshot(&mut self) {
        self.snapshot.send_modify(|snapshot| {
            snapshot.vessels = Arc::default();
            snapshot.trackers = Arc::default();
            snapshot.last_update = None;
        });
    }

    fn publish_status(&self) {
        let status = self.machine.status().clone();
        let attempt = self.machine.attempt();
        let error = self.machine.fatal_error().cloned();

        self.snapshot.send_if_modified(|snapshot| {
            if snapshot.status == status && snapshot.attempt == attempt && snapshot.error == error {
                return false;
            }
            snapshot.status = status;
            snapshot.attempt = attempt;
            snapshot.error = error;
            true
        });
    }
}

async fn next_frame(socket: &mut Option<WsStream>) -> Frame {
    match socket {
        Some(socket) => socket.next().await,
        None => std::future::pending().await,
    }
}

fn error_source(error: &FeedError) -> String {
    std::error::Error::source(error)
        .map(ToString::to_string)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Position;
    use serde_json::json;

    #[test]
    fn snapshot_counts() {
        let normalizer = Normalizer::default();
        let batch = normalizer.normalize_batch(
            vec![
                RawVesselRecord::new(json!({"mmsi": 271000001, "mapped": true})),
                RawVesselRecord::new(json!({"imei": "1", "mapped": false})),
                RawVesselRecord::new(json!({"imei": "2", "mapped": false})),
            ],
            Utc::now(),
        );
        let snapshot = FeedSnapshot {
            vessels: Arc::new(batch.vessels),
            trackers: Arc::new(batch.trackers),
            ..FeedSnapshot::default()
        };

        assert_eq!(snapshot.vessel_count(), 1);
        assert_eq!(snapshot.tracker_count(), 2);
        assert_eq!(snapshot.total_count(), 3);
        assert_eq!(snapshot.vessels[0].position, Position::default());
        assert!(!snapshot.is_connected());
    }

    #[tokio::test]
    async fn connect_rejects_invalid_config() {
        let result = FeedClient::connect(
            FeedConfig::new("http://example.test"),
            Arc::new(crate::credentials::StaticToken::new("t")),
        );
        assert!(matches!(result, Err(FeedError::ConfigurationError { .. })));
    }
}
