//! Connection table and the periodic tick that drives every connection.
//!
//! Transport events feed [`ComponentServer::on_active`],
//! [`ComponentServer::on_message`] and [`ComponentServer::on_inactive`]; an
//! interval task calls [`ComponentServer::tick`]. Each tick drains a
//! connection's inbound queue through the dispatcher, then flushes the
//! outbound queues in one batched write.

use crate::config::ServerConfig;
use crate::dispatcher::{server_echo, DispatchContext, DispatchError, ProtocolDispatcher};
use crate::hooks::{HookContext, HookDecision, MessageHooks};
use crate::persistence::Persistence;
use crate::session::{ClientState, ConnectionId, ConnectionSession};
use crate::transport::{Transport, TransportError};
use scert_proto::{DisconnectReason, ScertMessage, ServerForcedDisconnect, ServerSystemMessage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const BANNED_TEXT: &str = "You have been banned!";
pub const MAINTENANCE_TEXT: &str = "Server in maintenance.";

#[derive(Debug, thiserror::Error)]
pub enum TickError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone)]
pub struct ComponentSettings {
    pub name: String,
    /// Quiet period after which a bound client is sent an echo
    pub server_echo_interval: Duration,
    /// Minimum spacing between two server echoes on one connection
    pub echo_resend_interval: Duration,
    pub ban_severity: u8,
}

impl Default for ComponentSettings {
    fn default() -> Self {
        Self {
            name: "MUIS".to_string(),
            server_echo_interval: Duration::from_secs(5),
            echo_resend_interval: Duration::from_secs(2),
            ban_severity: 20,
        }
    }
}

impl From<&ServerConfig> for ComponentSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            name: config.server.name.clone(),
            server_echo_interval: Duration::from_secs(config.tick.server_echo_interval_secs),
            echo_resend_interval: Duration::from_secs(config.tick.echo_resend_interval_secs),
            ban_severity: config.moderation.ban_system_message_severity,
        }
    }
}

/// A live connection: its state plus the write side of its transport
#[derive(Clone)]
pub struct Connection {
    pub session: Arc<ConnectionSession>,
    pub transport: Arc<dyn Transport>,
}

pub struct ComponentServer {
    settings: ComponentSettings,
    connections: RwLock<HashMap<ConnectionId, Connection>>,
    next_id: AtomicU64,
    dispatcher: Arc<dyn ProtocolDispatcher>,
    hooks: Arc<dyn MessageHooks>,
    persistence: Arc<dyn Persistence>,
}

/// System message shown to a banned or maintenance-blocked client
pub fn system_notice(severity: u8, text: &str) -> ScertMessage {
    ServerSystemMessage {
        severity,
        encoding: 1,
        language: 2,
        end_of_message: true,
        text: text.to_string(),
    }
    .into()
}

/// Resolves the ban and maintenance flags for a fresh connection.
///
/// A notice is queued rather than closing the socket. Lookup failures count
/// as "not banned".
pub async fn check_moderation(
    persistence: &dyn Persistence,
    session: &ConnectionSession,
    severity: u8,
) {
    let ip = session.peer().ip();
    let banned = match persistence.is_ip_banned(ip).await {
        Ok(banned) => banned,
        Err(e) => {
            warn!(conn = session.id(), "Ban lookup for {} failed: {}", ip, e);
            false
        }
    };
    session.set_banned(banned);

    if banned {
        info!(conn = session.id(), "Rejecting banned ip {}", ip);
        session.queue(system_notice(severity, BANNED_TEXT));
        return;
    }

    match persistence.server_flags().await {
        Ok(flags) => {
            let in_maintenance = flags
                .maintenance
                .map_or(false, |window| window.is_in_effect(chrono::Utc::now()));
            if in_maintenance {
                info!(conn = session.id(), "Server in maintenance, notifying {}", ip);
                session.queue(system_notice(severity, MAINTENANCE_TEXT));
            }
        }
        Err(e) => warn!(conn = session.id(), "Server flag lookup failed: {}", e),
    }
}

/// Writes the seven forced-disconnect reasons; failures are swallowed
pub async fn force_disconnect(transport: &dyn Transport) {
    let messages: Vec<ScertMessage> = DisconnectReason::ALL
        .into_iter()
        .map(|reason| ServerForcedDisconnect { reason }.into())
        .collect();

    if let Err(e) = transport.write_batch(&messages).await {
        debug!(peer = %transport.peer_addr(), "Forced disconnect write failed: {}", e);
    }
}

impl ComponentServer {
    pub fn new(
        settings: ComponentSettings,
        dispatcher: Arc<dyn ProtocolDispatcher>,
        hooks: Arc<dyn MessageHooks>,
        persistence: Arc<dyn Persistence>,
    ) -> Self {
        Self {
            settings,
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            dispatcher,
            hooks,
            persistence,
        }
    }

    pub fn settings(&self) -> &ComponentSettings {
        &self.settings
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn connection(&self, id: ConnectionId) -> Option<Connection> {
        self.connections.read().await.get(&id).cloned()
    }

    /// Registers a new connection in `CONNECTED` and starts its moderation lookups
    pub async fn on_active(&self, transport: Arc<dyn Transport>) -> Arc<ConnectionSession> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let peer = transport.peer_addr();
        let session = Arc::new(ConnectionSession::new(id, peer));

        self.connections.write().await.insert(
            id,
            Connection {
                session: session.clone(),
                transport,
            },
        );
        info!(conn = id, %peer, "{} connection active", self.settings.name);

        let persistence = self.persistence.clone();
        let severity = self.settings.ban_severity;
        let pending = session.clone();
        tokio::spawn(async move {
            check_moderation(persistence.as_ref(), &pending, severity).await;
        });

        session
    }

    /// Queues an inbound message unless the connection is ignored or banned
    pub async fn on_message(&self, id: ConnectionId, message: ScertMessage) {
        let Some(connection) = self.connection(id).await else {
            debug!(conn = id, "Message {} for unknown connection", message);
            return;
        };

        let session = &connection.session;
        if !session.accepts_inbound() {
            debug!(conn = id, "Discarding {}", message);
            return;
        }

        debug!(conn = id, "RECV {}", message);
        session.touch(Instant::now());
        if !session.enqueue_inbound(message) {
            debug!(conn = id, "Connection banned or ignored, message discarded");
        }
    }

    /// Runs a last tick, then drops the connection from the table
    pub async fn on_inactive(&self, id: ConnectionId) {
        let Some(connection) = self.connection(id).await else {
            return;
        };

        self.tick_connection(&connection).await;

        self.connections.write().await.remove(&id);
        connection.session.set_state(ClientState::Disconnected);
        if let Some(identity) = connection.session.identity() {
            identity.on_disconnected();
        }
        info!(conn = id, peer = %connection.session.peer(), "{} connection closed", self.settings.name);
    }

    /// Queues `message` on every listed connection that is still live
    pub async fn queue(&self, message: ScertMessage, targets: &[ConnectionId]) {
        self.queue_many(std::slice::from_ref(&message), targets).await;
    }

    pub async fn queue_many(&self, messages: &[ScertMessage], targets: &[ConnectionId]) {
        let connections = self.connections.read().await;
        for id in targets {
            match connections.get(id) {
                Some(connection) => connection.session.outbound().extend(messages.iter().cloned()),
                None => debug!(conn = id, "Queue target gone"),
            }
        }
    }

    /// One pass over every connection. Connections tick concurrently; a
    /// failure in one is logged and never reaches the others.
    pub async fn tick(self: &Arc<Self>) {
        let connections: Vec<Connection> =
            self.connections.read().await.values().cloned().collect();

        let mut tasks = JoinSet::new();
        for connection in connections {
            let server = Arc::clone(self);
            tasks.spawn(async move { server.tick_connection(&connection).await });
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("Tick task failed: {}", e);
            }
        }
    }

    /// Ticks one connection; never runs twice at once for the same connection
    pub async fn tick_connection(&self, connection: &Connection) {
        let _guard = connection.session.tick_guard.lock().await;
        if let Err(e) = self.run_tick(connection).await {
            warn!(conn = connection.session.id(), "Tick abandoned: {}", e);
        }
    }

    async fn run_tick(&self, connection: &Connection) -> Result<(), TickError> {
        let session = &connection.session;
        if session.is_ignored() {
            return Ok(());
        }

        self.process_inbound(connection).await;

        if !connection.transport.is_writable() {
            return Ok(());
        }

        let identity = session.identity();
        let mut batch = Vec::new();
        let pending = session
            .outbound()
            .drain()
            .into_iter()
            .chain(identity.iter().flat_map(|identity| identity.outbound().drain()));
        for message in pending {
            let ctx = HookContext {
                connection: session.id(),
                message: &message,
                identity: identity.as_deref(),
            };
            if self.hooks.before_send(&ctx) == HookDecision::Continue {
                batch.push(message);
            }
        }

        if let Some(identity) = &identity {
            let now = Instant::now();
            if now.duration_since(identity.last_echo()) > self.settings.server_echo_interval {
                let resend_due = session.last_echo_sent().map_or(true, |sent| {
                    now.duration_since(sent) > self.settings.echo_resend_interval
                });
                if resend_due {
                    session.set_last_echo_sent(now);
                    batch.push(server_echo());
                }
            }
        }

        if batch.is_empty() {
            return Ok(());
        }

        for message in &batch {
            debug!(conn = session.id(), "SEND {}", message);
        }
        connection.transport.write_batch(&batch).await?;
        Ok(())
    }

    async fn process_inbound(&self, connection: &Connection) {
        let session = &connection.session;
        let ctx = DispatchContext {
            session,
            transport: &connection.transport,
        };

        while let Some(message) = session.inbound().pop() {
            let identity = session.identity();
            let hook_ctx = HookContext {
                connection: session.id(),
                message: &message,
                identity: identity.as_deref(),
            };
            if self.hooks.before_process(&hook_ctx) == HookDecision::Ignore {
                continue;
            }

            let id = message.id();
            match self.dispatcher.handle(message, &ctx).await {
                Ok(()) => {}
                Err(DispatchError::Recoverable(reason)) => {
                    warn!(conn = session.id(), "Failed to process {}: {}", id, reason);
                }
                Err(DispatchError::Fatal(reason)) => {
                    error!(
                        conn = session.id(),
                        "Fatal error processing {}: {}; ignoring connection", id, reason
                    );
                    force_disconnect(connection.transport.as_ref()).await;
                    session.set_ignore();
                    break;
                }
            }
        }
    }

    /// Closes every transport; the read loops then run their final ticks
    pub async fn close_all(&self) {
        let connections: Vec<Connection> =
            self.connections.read().await.values().cloned().collect();
        for connection in connections {
            connection.transport.close().await;
        }
    }
}

/// Ticks `server` every `interval` until `shutdown` is cancelled
pub fn spawn_tick_loop(
    server: Arc<ComponentServer>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => server.tick().await,
            }
        }
        debug!("Tick loop stopped");
    })
}
