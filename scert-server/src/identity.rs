use crate::session::MessageQueue;
use scert_proto::ScertMessage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;
use tracing::info;

/// Application-level identity bound to a connection once the client authenticates.
///
/// Other components queue traffic for the player here; the tick loop flushes
/// it after the connection's own queue.
#[derive(Debug)]
pub struct ClientObject {
    account_id: i32,
    account_name: String,
    app_id: i32,
    outbound: MessageQueue,
    last_echo: Mutex<Instant>,
    connected: AtomicBool,
}

impl ClientObject {
    pub fn new(account_id: i32, account_name: impl Into<String>, app_id: i32) -> Self {
        Self {
            account_id,
            account_name: account_name.into(),
            app_id,
            outbound: MessageQueue::default(),
            last_echo: Mutex::new(Instant::now()),
            connected: AtomicBool::new(true),
        }
    }

    pub fn account_id(&self) -> i32 {
        self.account_id
    }

    pub fn account_name(&self) -> &str {
        &self.account_name
    }

    pub fn app_id(&self) -> i32 {
        self.app_id
    }

    /// Queues a message for the next flush of whichever connection this identity is bound to
    pub fn queue(&self, message: impl Into<ScertMessage>) {
        self.outbound.push(message.into());
    }

    pub fn outbound(&self) -> &MessageQueue {
        &self.outbound
    }

    pub fn on_echo(&self, at: Instant) {
        *self.last_echo.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }

    pub fn last_echo(&self) -> Instant {
        *self.last_echo.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn on_disconnected(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            info!(
                account = self.account_id,
                "{} disconnected", self.account_name
            );
        }
    }
}
