use crate::identity::ClientObject;
use scert_proto::{RtMsgId, ScertMessage};
use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;

/// Process-unique, monotonically increasing connection id
pub type ConnectionId = u64;

/// Connection lifecycle, in handshake order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    Disconnected,
    Connected,
    Hello,
    Handshake,
    Connect1,
    Authenticated,
}

impl ClientState {
    /// Whether `id` is a legal next message from the client in this state.
    pub fn accepts(self, id: RtMsgId) -> bool {
        use ClientState::*;

        match id {
            RtMsgId::CLIENT_HELLO => self == Connected,
            RtMsgId::CLIENT_CRYPTKEY_PUBLIC => matches!(self, Connected | Hello),
            RtMsgId::CLIENT_CONNECT_TCP => matches!(self, Connected | Hello | Handshake),
            RtMsgId::CLIENT_CONNECT_READY_REQUIRE
            | RtMsgId::CLIENT_CONNECT_READY_TCP
            | RtMsgId::CLIENT_APP_TOSERVER => matches!(self, Connect1 | Authenticated),
            _ => self != Disconnected,
        }
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connected => "CONNECTED",
            Self::Hello => "HELLO",
            Self::Handshake => "HANDSHAKE",
            Self::Connect1 => "CONNECT_1",
            Self::Authenticated => "AUTHENTICATED",
        };
        f.write_str(name)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// FIFO of messages, safe for many producers and one consumer
#[derive(Debug, Default)]
pub struct MessageQueue {
    inner: Mutex<VecDeque<ScertMessage>>,
}

impl MessageQueue {
    pub fn push(&self, message: ScertMessage) {
        lock(&self.inner).push_back(message);
    }

    pub fn extend(&self, messages: impl IntoIterator<Item = ScertMessage>) {
        lock(&self.inner).extend(messages);
    }

    /// Pushes only if `admit` holds while the queue is locked
    pub fn push_if(&self, message: ScertMessage, admit: impl FnOnce() -> bool) -> bool {
        let mut queue = lock(&self.inner);
        if !admit() {
            return false;
        }
        queue.push_back(message);
        true
    }

    /// Runs `update` and empties the queue under one lock
    pub fn clear_with(&self, update: impl FnOnce()) {
        let mut queue = lock(&self.inner);
        update();
        queue.clear();
    }

    pub fn pop(&self) -> Option<ScertMessage> {
        lock(&self.inner).pop_front()
    }

    /// Takes everything queued so far, oldest first
    pub fn drain(&self) -> Vec<ScertMessage> {
        lock(&self.inner).drain(..).collect()
    }

    pub fn clear(&self) {
        lock(&self.inner).clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

const BAN_UNKNOWN: u8 = 0;
const BAN_CLEAR: u8 = 1;
const BAN_BANNED: u8 = 2;

/// Server-side state of one live connection.
#[derive(Debug)]
pub struct ConnectionSession {
    id: ConnectionId,
    peer: SocketAddr,
    state: Mutex<ClientState>,
    inbound: MessageQueue,
    outbound: MessageQueue,
    banned: AtomicU8,
    ignore: AtomicBool,
    last_echo_sent: Mutex<Option<Instant>>,
    last_received: Mutex<Instant>,
    identity: RwLock<Option<Arc<ClientObject>>>,
    /// Held for the duration of a tick
    pub(crate) tick_guard: tokio::sync::Mutex<()>,
}

impl ConnectionSession {
    pub fn new(id: ConnectionId, peer: SocketAddr) -> Self {
        Self {
            id,
            peer,
            state: Mutex::new(ClientState::Connected),
            inbound: MessageQueue::default(),
            outbound: MessageQueue::default(),
            banned: AtomicU8::new(BAN_UNKNOWN),
            ignore: AtomicBool::new(false),
            last_echo_sent: Mutex::new(None),
            last_received: Mutex::new(Instant::now()),
            identity: RwLock::new(None),
            tick_guard: tokio::sync::Mutex::new(()),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ClientState {
        *lock(&self.state)
    }

    pub fn set_state(&self, state: ClientState) {
        *lock(&self.state) = state;
    }

    pub fn inbound(&self) -> &MessageQueue {
        &self.inbound
    }

    pub fn outbound(&self) -> &MessageQueue {
        &self.outbound
    }

    /// Queues a message for the next flush
    pub fn queue(&self, message: impl Into<ScertMessage>) {
        self.outbound.push(message.into());
    }

    /// `None` until the ban lookup completes
    pub fn is_banned(&self) -> Option<bool> {
        match self.banned.load(Ordering::Acquire) {
            BAN_CLEAR => Some(false),
            BAN_BANNED => Some(true),
            _ => None,
        }
    }

    /// A ban also discards whatever was queued inbound
    pub fn set_banned(&self, banned: bool) {
        if banned {
            self.inbound
                .clear_with(|| self.banned.store(BAN_BANNED, Ordering::Release));
        } else {
            self.banned.store(BAN_CLEAR, Ordering::Release);
        }
    }

    pub fn is_ignored(&self) -> bool {
        self.ignore.load(Ordering::Acquire)
    }

    /// Stops all further inbound processing and drops what is queued; there is no way back
    pub fn set_ignore(&self) {
        self.inbound
            .clear_with(|| self.ignore.store(true, Ordering::Release));
    }

    /// Whether inbound messages may still be queued
    pub fn accepts_inbound(&self) -> bool {
        !self.is_ignored() && self.is_banned() != Some(true)
    }

    /// Queues an inbound message unless the session is banned or ignored.
    /// The check and the push happen under the queue lock, so a concurrent
    /// ban either discards the message or rejects it.
    pub fn enqueue_inbound(&self, message: ScertMessage) -> bool {
        self.inbound.push_if(message, || self.accepts_inbound())
    }

    pub fn last_echo_sent(&self) -> Option<Instant> {
        *lock(&self.last_echo_sent)
    }

    pub fn set_last_echo_sent(&self, at: Instant) {
        *lock(&self.last_echo_sent) = Some(at);
    }

    pub fn last_received(&self) -> Instant {
        *lock(&self.last_received)
    }

    /// Records inbound traffic at `at`, refreshing the bound identity's echo time too
    pub fn touch(&self, at: Instant) {
        *lock(&self.last_received) = at;
        if let Some(identity) = self.identity() {
            identity.on_echo(at);
        }
    }

    pub fn identity(&self) -> Option<Arc<ClientObject>> {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Binds an authenticated identity and moves the session to `AUTHENTICATED`
    pub fn bind_identity(&self, identity: Arc<ClientObject>) {
        *self
            .identity
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(identity);
        self.set_state(ClientState::Authenticated);
    }
}
