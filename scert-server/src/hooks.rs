use crate::identity::ClientObject;
use crate::session::ConnectionId;
use scert_proto::ScertMessage;

/// What a hook wants done with the message it was shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookDecision {
    #[default]
    Continue,
    /// Skip this one message
    Ignore,
}

pub struct HookContext<'a> {
    pub connection: ConnectionId,
    pub message: &'a ScertMessage,
    pub identity: Option<&'a ClientObject>,
}

/// Plugin boundary consulted by the tick loop for every message in and out.
pub trait MessageHooks: Send + Sync {
    fn before_process(&self, _ctx: &HookContext<'_>) -> HookDecision {
        HookDecision::Continue
    }

    fn before_send(&self, _ctx: &HookContext<'_>) -> HookDecision {
        HookDecision::Continue
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl MessageHooks for NoHooks {}
