pub mod component;
pub mod config;
pub mod dispatcher;
pub mod handler;
pub mod hooks;
pub mod identity;
pub mod persistence;
pub mod session;
pub mod transport;

pub use component::{ComponentServer, ComponentSettings, Connection, TickError};
pub use config::ServerConfig;
pub use dispatcher::{
    AppMessageHandler, DispatchContext, DispatchError, HandshakeDispatcher, ProtocolDispatcher,
    UnhandledApp,
};
pub use handler::{serve, ConnectionHandler};
pub use hooks::{HookContext, HookDecision, MessageHooks, NoHooks};
pub use identity::ClientObject;
pub use persistence::{MaintenanceWindow, Persistence, ServerFlags, StaticPersistence};
pub use session::{ClientState, ConnectionId, ConnectionSession, MessageQueue};
pub use transport::{TcpTransport, Transport, TransportError};
