//! Application-layer (Medius) envelope carried inside the app-traffic SCERT messages.
//!
//! Wire layout: `[class:1][type:1][body...]`. The body is owned by the
//! application layer and is never interpreted here, except for the DME
//! packet-fragment type used to split oversized envelopes.

use crate::fragment::DME_PACKET_FRAGMENT;
use crate::messages::WireReader;
use crate::Result;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Size of the class + type sub-header in front of every application body
pub const APP_HEADER_LEN: usize = 2;

/// Application message class (first byte of the envelope)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageClass(pub u8);

impl MessageClass {
    pub const DME: Self = Self(0);
    pub const LOBBY: Self = Self(1);
    pub const APPLICATION: Self = Self(2);
    pub const LOBBY_REPORT: Self = Self(3);
    pub const LOBBY_EXT: Self = Self(4);
    pub const LOBBY_AUTHENTICATION: Self = Self(5);
}

impl fmt::Display for MessageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::DME => f.write_str("MessageClassDME"),
            Self::LOBBY => f.write_str("MessageClassLobby"),
            Self::APPLICATION => f.write_str("MessageClassApplication"),
            Self::LOBBY_REPORT => f.write_str("MessageClassLobbyReport"),
            Self::LOBBY_EXT => f.write_str("MessageClassLobbyExt"),
            Self::LOBBY_AUTHENTICATION => f.write_str("MessageClassLobbyAuthentication"),
            Self(other) => write!(f, "MessageClass({})", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppMessage {
    pub class: MessageClass,
    pub kind: u8,
    pub body: Bytes,
}

impl AppMessage {
    pub fn new(class: MessageClass, kind: u8, body: Bytes) -> Self {
        Self { class, kind, body }
    }

    pub fn is_fragment(&self) -> bool {
        self.class == MessageClass::DME && self.kind == DME_PACKET_FRAGMENT
    }

    /// Serialized length including the class/type sub-header
    pub fn encoded_len(&self) -> usize {
        APP_HEADER_LEN + self.body.len()
    }

    pub fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            class: MessageClass(reader.u8()?),
            kind: reader.u8()?,
            body: Bytes::copy_from_slice(reader.rest()),
        })
    }

    pub fn encode(&self, out: &mut BytesMut) {
        out.reserve(self.encoded_len());
        out.put_u8(self.class.0);
        out.put_u8(self.kind);
        out.put_slice(&self.body);
    }
}

impl fmt::Display for AppMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} type:0x{:02X} len:{}",
            self.class,
            self.kind,
            self.body.len()
        )
    }
}
