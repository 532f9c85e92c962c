use crate::messages::{standard_descriptors, RawMessage, ScertBody, ScertMessage, WireReader};
use crate::{Result, RtMsgId};
use bytes::Bytes;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

pub type DecodeFn = fn(&mut WireReader<'_>) -> Result<ScertMessage>;

/// Decodes the body registered for one message id.
#[derive(Clone, Copy)]
pub struct MessageDescriptor {
    pub id: RtMsgId,
    pub name: &'static str,
    pub decode: DecodeFn,
}

impl fmt::Debug for MessageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

fn decode_as<T>(reader: &mut WireReader<'_>) -> Result<ScertMessage>
where
    T: ScertBody + Into<ScertMessage>,
{
    T::decode(reader).map(Into::into)
}

impl MessageDescriptor {
    pub fn of<T>() -> Self
    where
        T: ScertBody + Into<ScertMessage>,
    {
        Self {
            id: T::ID,
            name: T::ID.name().unwrap_or("RT_MSG_UNNAMED"),
            decode: decode_as::<T>,
        }
    }
}

/// Message id to body-decoder table. Lookup is a direct index.
#[derive(Debug, Clone)]
pub struct MessageRegistry {
    table: Box<[Option<MessageDescriptor>; 128]>,
}

static STANDARD: OnceLock<Arc<MessageRegistry>> = OnceLock::new();

impl Default for MessageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageRegistry {
    /// Empty registry; every id decodes to a raw message
    pub fn new() -> Self {
        Self {
            table: Box::new([None; 128]),
        }
    }

    /// Registry populated with every built-in message type
    pub fn with_standard() -> Self {
        let mut registry = Self::new();
        for descriptor in standard_descriptors() {
            registry.register(descriptor);
        }
        registry
    }

    /// Process-wide standard registry, built on first use
    pub fn shared() -> Arc<Self> {
        STANDARD
            .get_or_init(|| Arc::new(Self::with_standard()))
            .clone()
    }

    /// Sets or replaces the descriptor for its id; the last registration wins.
    pub fn register(&mut self, descriptor: MessageDescriptor) -> &mut Self {
        let slot = &mut self.table[(descriptor.id.0 & 0x7F) as usize];
        if let Some(previous) = slot.replace(descriptor) {
            debug!(
                "Overriding {} handler {} with {}",
                descriptor.id, previous.name, descriptor.name
            );
        }
        self
    }

    pub fn get(&self, id: RtMsgId) -> Option<&MessageDescriptor> {
        self.table[(id.0 & 0x7F) as usize].as_ref()
    }

    pub fn len(&self) -> usize {
        self.table.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decodes plaintext `body` as message `id`.
    ///
    /// Unregistered ids become [`ScertMessage::Raw`] with the exact bytes.
    /// A body that fails to decode is logged and dropped (`None`).
    pub fn instantiate(&self, id: RtMsgId, body: &[u8]) -> Option<ScertMessage> {
        let Some(descriptor) = self.get(id) else {
            return Some(ScertMessage::Raw(RawMessage {
                id,
                contents: Bytes::copy_from_slice(body),
            }));
        };

        let mut reader = WireReader::new(body, descriptor.name);
        match (descriptor.decode)(&mut reader) {
            Ok(message) => {
                if reader.remaining() > 0 {
                    debug!(
                        "{} left {} undecoded bytes: {}",
                        id,
                        reader.remaining(),
                        hex::encode(reader.rest())
                    );
                }
                Some(message)
            }
            Err(e) => {
                warn!("Error deserializing {} {}: {}", id, hex::encode(body), e);
                None
            }
        }
    }
}
