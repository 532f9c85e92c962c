use crate::session::{ClientState, ConnectionSession};
use crate::transport::Transport;
use async_trait::async_trait;
use bytes::Bytes;
use scert_proto::{
    AppMessage, ClientConnectTcp, ScertMessage, ServerConnectAcceptTcp, ServerConnectComplete,
    ServerConnectRequire, ServerCryptKeyGame, ServerCryptKeyPeer, ServerEcho, ServerHello,
};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Body of `SERVER_CONNECT_REQUIRE` sent in answer to a TCP connect
pub const CONNECT_REQUIRE_CONTENTS: [u8; 3] = [0x02, 0x48, 0x02];

/// Outcome of a failed dispatch, consumed by the tick loop
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Logged; the message is dropped and processing continues
    #[error("{0}")]
    Recoverable(String),

    /// Forced disconnect; the connection is never processed again
    #[error("{0}")]
    Fatal(String),
}

/// What a dispatcher may touch while handling one message
pub struct DispatchContext<'a> {
    pub session: &'a Arc<ConnectionSession>,
    pub transport: &'a Arc<dyn Transport>,
}

impl DispatchContext<'_> {
    pub fn queue(&self, message: impl Into<ScertMessage>) {
        self.session.queue(message);
    }
}

/// Per-role handler for decoded messages.
#[async_trait]
pub trait ProtocolDispatcher: Send + Sync {
    async fn handle(
        &self,
        message: ScertMessage,
        ctx: &DispatchContext<'_>,
    ) -> Result<(), DispatchError>;
}

/// Receives application envelopes once the SCERT layer is done with them.
#[async_trait]
pub trait AppMessageHandler: Send + Sync {
    async fn handle_app(
        &self,
        app: AppMessage,
        ctx: &DispatchContext<'_>,
    ) -> Result<(), DispatchError>;
}

/// Application handler for components that serve no application traffic
#[derive(Debug, Clone, Copy, Default)]
pub struct UnhandledApp;

#[async_trait]
impl AppMessageHandler for UnhandledApp {
    async fn handle_app(
        &self,
        app: AppMessage,
        ctx: &DispatchContext<'_>,
    ) -> Result<(), DispatchError> {
        warn!(conn = ctx.session.id(), "UNHANDLED APP MESSAGE: {}", app);
        Ok(())
    }
}

/// An echo stamped with the current time
pub fn server_echo() -> ScertMessage {
    ServerEcho {
        timestamp: chrono::Utc::now().timestamp() as u32,
        value: [0; 4],
    }
    .into()
}

fn peer_ipv4(ip: IpAddr) -> Option<Ipv4Addr> {
    match ip {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(v6) => v6.to_ipv4_mapped(),
    }
}

/// Answers the SCERT connection handshake and forwards application traffic.
pub struct HandshakeDispatcher {
    name: String,
    session_key: Vec<u8>,
    strict_state: bool,
    app: Arc<dyn AppMessageHandler>,
}

impl HandshakeDispatcher {
    pub fn new(
        name: impl Into<String>,
        session_key: Vec<u8>,
        strict_state: bool,
        app: Arc<dyn AppMessageHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            session_key,
            strict_state,
            app,
        }
    }

    fn on_hello(&self, ctx: &DispatchContext<'_>) {
        ctx.session.set_state(ClientState::Hello);
        ctx.queue(ServerHello);
    }

    fn on_cryptkey_public(&self, ctx: &DispatchContext<'_>) {
        ctx.session.set_state(ClientState::Handshake);
        ctx.queue(ServerCryptKeyPeer::from_key(&self.session_key));
    }

    fn on_connect_tcp(&self, request: &ClientConnectTcp, ctx: &DispatchContext<'_>) {
        debug!(
            conn = ctx.session.id(),
            "Connect to world {} from app {}", request.target_world_id, request.app_id
        );
        ctx.session.set_state(ClientState::Connect1);
        ctx.queue(ServerConnectRequire {
            contents: Bytes::from_static(&CONNECT_REQUIRE_CONTENTS),
        });
    }

    fn on_connect_ready_require(&self, ctx: &DispatchContext<'_>) {
        ctx.queue(ServerCryptKeyGame::from_key(&self.session_key));
        ctx.queue(ServerConnectAcceptTcp {
            reserved: [0; 6],
            flag: 1,
            ip: peer_ipv4(ctx.session.peer().ip()),
        });
    }

    fn on_connect_ready_tcp(&self, ctx: &DispatchContext<'_>) {
        ctx.queue(ServerConnectComplete { client_count: 1 });
        ctx.queue(server_echo());
    }
}

#[async_trait]
impl ProtocolDispatcher for HandshakeDispatcher {
    async fn handle(
        &self,
        message: ScertMessage,
        ctx: &DispatchContext<'_>,
    ) -> Result<(), DispatchError> {
        let state = ctx.session.state();
        if self.strict_state && !state.accepts(message.id()) {
            return Err(DispatchError::Recoverable(format!(
                "{} not valid in state {}",
                message.id(),
                state
            )));
        }

        match message {
            ScertMessage::ClientHello(_) => self.on_hello(ctx),
            ScertMessage::ClientCryptKeyPublic(_) => self.on_cryptkey_public(ctx),
            ScertMessage::ClientConnectTcp(request) => self.on_connect_tcp(&request, ctx),
            ScertMessage::ClientConnectReadyRequire(_) => self.on_connect_ready_require(ctx),
            ScertMessage::ClientConnectReadyTcp(_) => self.on_connect_ready_tcp(ctx),
            ScertMessage::ServerEcho(_) => {}
            ScertMessage::ClientEcho(echo) => ctx.queue(echo),
            ScertMessage::ClientAppToServer(msg) => self.app.handle_app(msg.app, ctx).await?,
            ScertMessage::ClientDisconnectWithReason(msg) => {
                info!(
                    conn = ctx.session.id(),
                    "{} client disconnecting, reason {}", self.name, msg.reason
                );
                ctx.transport.close().await;
            }
            other => warn!(
                conn = ctx.session.id(),
                "{} UNHANDLED MESSAGE: {}", self.name, other
            ),
        }

        Ok(())
    }
}
