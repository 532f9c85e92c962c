use crate::registry::MessageDescriptor;
use crate::{AppMessage, ProtocolError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::net::Ipv4Addr;

/// Length of every key carried by the crypt-key exchange messages
pub const CRYPTKEY_LEN: usize = 0x40;

/// Wire width of an IPv4 address rendered as a NUL-padded string
pub const IP_STRING_LEN: usize = 16;

/// Wire discriminator of a SCERT message (low 7 bits of the header byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RtMsgId(pub u8);

impl RtMsgId {
    pub const CLIENT_CONNECT_TCP: Self = Self(0x00);
    pub const CLIENT_DISCONNECT: Self = Self(0x01);
    pub const CLIENT_APP_BROADCAST: Self = Self(0x02);
    pub const CLIENT_APP_SINGLE: Self = Self(0x03);
    pub const CLIENT_APP_LIST: Self = Self(0x04);
    pub const CLIENT_ECHO: Self = Self(0x05);
    pub const SERVER_CONNECT_REJECT: Self = Self(0x06);
    pub const SERVER_CONNECT_ACCEPT_TCP: Self = Self(0x07);
    pub const SERVER_CONNECT_NOTIFY: Self = Self(0x08);
    pub const SERVER_DISCONNECT_NOTIFY: Self = Self(0x09);
    pub const SERVER_APP: Self = Self(0x0A);
    pub const CLIENT_APP_TOSERVER: Self = Self(0x0B);
    pub const UDP_APP: Self = Self(0x0C);
    pub const SERVER_FORCED_DISCONNECT: Self = Self(0x11);
    pub const CLIENT_CRYPTKEY_PUBLIC: Self = Self(0x12);
    pub const SERVER_CRYPTKEY_PEER: Self = Self(0x13);
    pub const SERVER_CRYPTKEY_GAME: Self = Self(0x14);
    pub const SERVER_CONNECT_COMPLETE: Self = Self(0x1A);
    pub const CLIENT_CRYPTKEY_PEER: Self = Self(0x1B);
    pub const SERVER_SYSTEM_MESSAGE: Self = Self(0x1C);
    pub const SERVER_ECHO: Self = Self(0x1F);
    pub const CLIENT_DISCONNECT_WITH_REASON: Self = Self(0x20);
    pub const CLIENT_CONNECT_READY_TCP: Self = Self(0x21);
    pub const SERVER_CONNECT_REQUIRE: Self = Self(0x22);
    pub const CLIENT_CONNECT_READY_REQUIRE: Self = Self(0x23);
    pub const CLIENT_HELLO: Self = Self(0x24);
    pub const SERVER_HELLO: Self = Self(0x25);

    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::CLIENT_CONNECT_TCP => "RT_MSG_CLIENT_CONNECT_TCP",
            Self::CLIENT_DISCONNECT => "RT_MSG_CLIENT_DISCONNECT",
            Self::CLIENT_APP_BROADCAST => "RT_MSG_CLIENT_APP_BROADCAST",
            Self::CLIENT_APP_SINGLE => "RT_MSG_CLIENT_APP_SINGLE",
            Self::CLIENT_APP_LIST => "RT_MSG_CLIENT_APP_LIST",
            Self::CLIENT_ECHO => "RT_MSG_CLIENT_ECHO",
            Self::SERVER_CONNECT_REJECT => "RT_MSG_SERVER_CONNECT_REJECT",
            Self::SERVER_CONNECT_ACCEPT_TCP => "RT_MSG_SERVER_CONNECT_ACCEPT_TCP",
            Self::SERVER_CONNECT_NOTIFY => "RT_MSG_SERVER_CONNECT_NOTIFY",
            Self::SERVER_DISCONNECT_NOTIFY => "RT_MSG_SERVER_DISCONNECT_NOTIFY",
            Self::SERVER_APP => "RT_MSG_SERVER_APP",
            Self::CLIENT_APP_TOSERVER => "RT_MSG_CLIENT_APP_TOSERVER",
            Self::UDP_APP => "RT_MSG_UDP_APP",
            Self::SERVER_FORCED_DISCONNECT => "RT_MSG_SERVER_FORCED_DISCONNECT",
            Self::CLIENT_CRYPTKEY_PUBLIC => "RT_MSG_CLIENT_CRYPTKEY_PUBLIC",
            Self::SERVER_CRYPTKEY_PEER => "RT_MSG_SERVER_CRYPTKEY_PEER",
            Self::SERVER_CRYPTKEY_GAME => "RT_MSG_SERVER_CRYPTKEY_GAME",
            Self::SERVER_CONNECT_COMPLETE => "RT_MSG_SERVER_CONNECT_COMPLETE",
            Self::CLIENT_CRYPTKEY_PEER => "RT_MSG_CLIENT_CRYPTKEY_PEER",
            Self::SERVER_SYSTEM_MESSAGE => "RT_MSG_SERVER_SYSTEM_MESSAGE",
            Self::SERVER_ECHO => "RT_MSG_SERVER_ECHO",
            Self::CLIENT_DISCONNECT_WITH_REASON => "RT_MSG_CLIENT_DISCONNECT_WITH_REASON",
            Self::CLIENT_CONNECT_READY_TCP => "RT_MSG_CLIENT_CONNECT_READY_TCP",
            Self::SERVER_CONNECT_REQUIRE => "RT_MSG_SERVER_CONNECT_REQUIRE",
            Self::CLIENT_CONNECT_READY_REQUIRE => "RT_MSG_CLIENT_CONNECT_READY_REQUIRE",
            Self::CLIENT_HELLO => "RT_MSG_CLIENT_HELLO",
            Self::SERVER_HELLO => "RT_MSG_SERVER_HELLO",
            _ => return None,
        };
        Some(name)
    }

    /// Outer ids whose application envelope may be split into fragments
    pub fn is_fragmentable(self) -> bool {
        self == Self::SERVER_APP || self == Self::CLIENT_APP_TOSERVER
    }
}

impl fmt::Display for RtMsgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "RT_MSG_0x{:02X}", self.0),
        }
    }
}

/// Bounds-checked little-endian reader over a message body.
pub struct WireReader<'a> {
    buf: &'a [u8],
    what: &'static str,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8], what: &'static str) -> Self {
        Self { buf, what }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(ProtocolError::Truncated {
                what: self.what,
                needed: n,
                remaining: self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    /// Reads a fixed-width, NUL-padded string
    pub fn fixed_str(&mut self, width: usize) -> Result<String> {
        let raw = self.bytes(width)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    /// Reads a NUL-terminated string, or up to the end of the body
    pub fn cstr(&mut self) -> Result<String> {
        let end = self.buf.iter().position(|&b| b == 0);
        let text = match end {
            Some(end) => {
                let text = String::from_utf8_lossy(&self.buf[..end]).into_owned();
                self.buf = &self.buf[end + 1..];
                text
            }
            None => {
                let text = String::from_utf8_lossy(self.buf).into_owned();
                self.buf = &[];
                text
            }
        };
        Ok(text)
    }

    pub fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }
}

/// Writes `text` into exactly `width` bytes, truncating so a terminating NUL always fits.
pub fn put_fixed_str(out: &mut BytesMut, text: &str, width: usize) {
    let bytes = text.as_bytes();
    let len = bytes.len().min(width.saturating_sub(1));
    out.put_slice(&bytes[..len]);
    out.put_bytes(0, width - len);
}

/// A message body with a fixed wire id.
pub trait ScertBody: Sized {
    const ID: RtMsgId;

    fn decode(reader: &mut WireReader<'_>) -> Result<Self>;

    fn encode(&self, out: &mut BytesMut);
}

macro_rules! scert_messages {
    ($($variant:ident),* $(,)?) => {
        /// A decoded SCERT message.
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub enum ScertMessage {
            $($variant($variant),)*
            /// Message with no registered body type; contents kept undecoded.
            Raw(RawMessage),
        }

        impl ScertMessage {
            pub fn id(&self) -> RtMsgId {
                match self {
                    $(Self::$variant(_) => <$variant as ScertBody>::ID,)*
                    Self::Raw(raw) => raw.id,
                }
            }

            /// Serializes the body (everything after the frame header)
            pub fn encode_body(&self, out: &mut BytesMut) {
                match self {
                    $(Self::$variant(body) => body.encode(out),)*
                    Self::Raw(raw) => out.put_slice(&raw.contents),
                }
            }
        }

        $(
            impl From<$variant> for ScertMessage {
                fn from(body: $variant) -> Self {
                    Self::$variant(body)
                }
            }
        )*

        pub(crate) fn standard_descriptors() -> Vec<MessageDescriptor> {
            vec![$(MessageDescriptor::of::<$variant>(),)*]
        }
    };
}

scert_messages! {
    ClientConnectTcp,
    ClientEcho,
    ServerConnectAcceptTcp,
    ServerApp,
    ClientAppToServer,
    ServerForcedDisconnect,
    ClientCryptKeyPublic,
    ServerCryptKeyPeer,
    ServerCryptKeyGame,
    ServerConnectComplete,
    ServerSystemMessage,
    ServerEcho,
    ClientDisconnectWithReason,
    ClientConnectReadyTcp,
    ServerConnectRequire,
    ClientConnectReadyRequire,
    ClientHello,
    ServerHello,
}

impl ScertMessage {
    /// Application envelope carried by the app-traffic ids
    pub fn app(&self) -> Option<&AppMessage> {
        match self {
            Self::ServerApp(msg) => Some(&msg.app),
            Self::ClientAppToServer(msg) => Some(&msg.app),
            _ => None,
        }
    }

    /// Wraps an application envelope in the outer message for `id`
    pub fn wrap_app(id: RtMsgId, app: AppMessage) -> Option<Self> {
        match id {
            RtMsgId::SERVER_APP => Some(ServerApp { app }.into()),
            RtMsgId::CLIENT_APP_TOSERVER => Some(ClientAppToServer { app }.into()),
            _ => None,
        }
    }
}

impl fmt::Display for ScertMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id:{}", self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub id: RtMsgId,
    pub contents: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConnectTcp {
    pub target_world_id: u32,
    pub app_id: i32,
    /// Client-version specific tail (session key, access token), passed through untouched
    pub trailer: Bytes,
}

impl ScertBody for ClientConnectTcp {
    const ID: RtMsgId = RtMsgId::CLIENT_CONNECT_TCP;

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            target_world_id: reader.u32()?,
            app_id: reader.i32()?,
            trailer: Bytes::copy_from_slice(reader.rest()),
        })
    }

    fn encode(&self, out: &mut BytesMut) {
        out.put_u32_le(self.target_world_id);
        out.put_i32_le(self.app_id);
        out.put_slice(&self.trailer);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientEcho {
    pub value: Bytes,
}

impl ScertBody for ClientEcho {
    const ID: RtMsgId = RtMsgId::CLIENT_ECHO;

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            value: Bytes::copy_from_slice(reader.rest()),
        })
    }

    fn encode(&self, out: &mut BytesMut) {
        out.put_slice(&self.value);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerConnectAcceptTcp {
    pub reserved: [u8; 6],
    pub flag: u16,
    pub ip: Option<Ipv4Addr>,
}

impl ScertBody for ServerConnectAcceptTcp {
    const ID: RtMsgId = RtMsgId::SERVER_CONNECT_ACCEPT_TCP;

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        let reserved = reader.array()?;
        let flag = reader.u16()?;
        let ip = reader.fixed_str(IP_STRING_LEN)?;
        let ip = if ip.is_empty() {
            None
        } else {
            Some(
                ip.parse()
                    .map_err(|_| ProtocolError::Malformed(format!("invalid ip {:?}", ip)))?,
            )
        };
        Ok(Self { reserved, flag, ip })
    }

    fn encode(&self, out: &mut BytesMut) {
        out.put_slice(&self.reserved);
        out.put_u16_le(self.flag);
        let ip = self.ip.map(|ip| ip.to_string()).unwrap_or_default();
        put_fixed_str(out, &ip, IP_STRING_LEN);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerApp {
    pub app: AppMessage,
}

impl ScertBody for ServerApp {
    const ID: RtMsgId = RtMsgId::SERVER_APP;

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            app: AppMessage::decode(reader)?,
        })
    }

    fn encode(&self, out: &mut BytesMut) {
        self.app.encode(out);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAppToServer {
    pub app: AppMessage,
}

impl ScertBody for ClientAppToServer {
    const ID: RtMsgId = RtMsgId::CLIENT_APP_TOSERVER;

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            app: AppMessage::decode(reader)?,
        })
    }

    fn encode(&self, out: &mut BytesMut) {
        self.app.encode(out);
    }
}

/// Reason code carried by a forced disconnect
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DisconnectReason(pub u8);

impl DisconnectReason {
    pub const NONE: Self = Self(0);
    pub const ERROR: Self = Self(1);
    pub const SHUTDOWN: Self = Self(2);
    pub const END_SESSION: Self = Self(3);
    pub const END_GAME: Self = Self(4);
    pub const TIMEOUT: Self = Self(5);
    pub const BANNED: Self = Self(6);

    pub const ALL: [Self; 7] = [
        Self::NONE,
        Self::ERROR,
        Self::SHUTDOWN,
        Self::END_SESSION,
        Self::END_GAME,
        Self::TIMEOUT,
        Self::BANNED,
    ];
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerForcedDisconnect {
    pub reason: DisconnectReason,
}

impl ScertBody for ServerForcedDisconnect {
    const ID: RtMsgId = RtMsgId::SERVER_FORCED_DISCONNECT;

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            reason: DisconnectReason(reader.u8()?),
        })
    }

    fn encode(&self, out: &mut BytesMut) {
        out.put_u8(self.reason.0);
    }
}

macro_rules! cryptkey_message {
    ($name:ident, $id:expr) => {
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            pub key: [u8; CRYPTKEY_LEN],
        }

        impl $name {
            /// Builds the message from a key of any length, zero-padding or truncating to the wire width
            pub fn from_key(key: &[u8]) -> Self {
                let mut fixed = [0u8; CRYPTKEY_LEN];
                let len = key.len().min(CRYPTKEY_LEN);
                fixed[..len].copy_from_slice(&key[..len]);
                Self { key: fixed }
            }
        }

        impl ScertBody for $name {
            const ID: RtMsgId = $id;

            fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
                Ok(Self {
                    key: reader.array()?,
                })
            }

            fn encode(&self, out: &mut BytesMut) {
                out.put_slice(&self.key);
            }
        }
    };
}

cryptkey_message!(ClientCryptKeyPublic, RtMsgId::CLIENT_CRYPTKEY_PUBLIC);
cryptkey_message!(ServerCryptKeyPeer, RtMsgId::SERVER_CRYPTKEY_PEER);
cryptkey_message!(ServerCryptKeyGame, RtMsgId::SERVER_CRYPTKEY_GAME);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerConnectComplete {
    pub client_count: u16,
}

impl ScertBody for ServerConnectComplete {
    const ID: RtMsgId = RtMsgId::SERVER_CONNECT_COMPLETE;

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            client_count: reader.u16()?,
        })
    }

    fn encode(&self, out: &mut BytesMut) {
        out.put_u16_le(self.client_count);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerSystemMessage {
    pub severity: u8,
    pub encoding: u8,
    pub language: u8,
    pub end_of_message: bool,
    pub text: String,
}

impl ScertBody for ServerSystemMessage {
    const ID: RtMsgId = RtMsgId::SERVER_SYSTEM_MESSAGE;

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            severity: reader.u8()?,
            encoding: reader.u8()?,
            language: reader.u8()?,
            end_of_message: reader.u8()? != 0,
            text: reader.cstr()?,
        })
    }

    fn encode(&self, out: &mut BytesMut) {
        out.put_u8(self.severity);
        out.put_u8(self.encoding);
        out.put_u8(self.language);
        out.put_u8(u8::from(self.end_of_message));
        out.put_slice(self.text.as_bytes());
        out.put_u8(0);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerEcho {
    pub timestamp: u32,
    pub value: [u8; 4],
}

impl ScertBody for ServerEcho {
    const ID: RtMsgId = RtMsgId::SERVER_ECHO;

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            timestamp: reader.u32()?,
            value: reader.array()?,
        })
    }

    fn encode(&self, out: &mut BytesMut) {
        out.put_u32_le(self.timestamp);
        out.put_slice(&self.value);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientDisconnectWithReason {
    pub reason: u8,
}

impl ScertBody for ClientDisconnectWithReason {
    const ID: RtMsgId = RtMsgId::CLIENT_DISCONNECT_WITH_REASON;

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            reason: reader.u8()?,
        })
    }

    fn encode(&self, out: &mut BytesMut) {
        out.put_u8(self.reason);
    }
}

macro_rules! opaque_message {
    ($name:ident, $id:expr) => {
        #[derive(Debug, Clone, Default, PartialEq, Eq)]
        pub struct $name {
            pub contents: Bytes,
        }

        impl ScertBody for $name {
            const ID: RtMsgId = $id;

            fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
                Ok(Self {
                    contents: Bytes::copy_from_slice(reader.rest()),
                })
            }

            fn encode(&self, out: &mut BytesMut) {
                out.put_slice(&self.contents);
            }
        }
    };
}

opaque_message!(ClientConnectReadyTcp, RtMsgId::CLIENT_CONNECT_READY_TCP);
opaque_message!(ServerConnectRequire, RtMsgId::SERVER_CONNECT_REQUIRE);
opaque_message!(ClientConnectReadyRequire, RtMsgId::CLIENT_CONNECT_READY_REQUIRE);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientHello {
    pub parameters: Vec<u16>,
}

impl ScertBody for ClientHello {
    const ID: RtMsgId = RtMsgId::CLIENT_HELLO;

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        if reader.remaining() % 2 != 0 {
            return Err(ProtocolError::Malformed(format!(
                "hello parameters have odd length {}",
                reader.remaining()
            )));
        }
        let mut parameters = Vec::with_capacity(reader.remaining() / 2);
        while reader.remaining() > 0 {
            parameters.push(reader.u16()?);
        }
        Ok(Self { parameters })
    }

    fn encode(&self, out: &mut BytesMut) {
        for parameter in &self.parameters {
            out.put_u16_le(*parameter);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerHello;

impl ScertBody for ServerHello {
    const ID: RtMsgId = RtMsgId::SERVER_HELLO;

    fn decode(_reader: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self)
    }

    fn encode(&self, _out: &mut BytesMut) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<T: ScertBody + PartialEq + fmt::Debug>(body: T) {
        let mut out = BytesMut::new();
        body.encode(&mut out);
        let mut reader = WireReader::new(&out, "test");
        let decoded = T::decode(&mut reader).unwrap();
        assert_eq!(reader.remaining(), 0, "decode left trailing bytes");
        assert_eq!(decoded, body);
    }

    #[test]
    fn test_id_names() {
        assert_eq!(RtMsgId::CLIENT_HELLO.to_string(), "RT_MSG_CLIENT_HELLO");
        assert_eq!(RtMsgId(0x7E).to_string(), "RT_MSG_0x7E");
        assert!(RtMsgId::SERVER_APP.is_fragmentable());
        assert!(!RtMsgId::SERVER_ECHO.is_fragmentable());
    }

    #[test]
    fn test_system_message_empty_and_long_text() {
        roundtrip(ServerSystemMessage::default());
        roundtrip(ServerSystemMessage {
            severity: 3,
            encoding: 1,
            language: 2,
            end_of_message: true,
            text: "You have been banned!".repeat(20),
        });
    }

    #[test]
    fn test_connect_accept_ip_width() {
        roundtrip(ServerConnectAcceptTcp {
            reserved: [0; 6],
            flag: 0x0001,
            ip: Some(Ipv4Addr::new(255, 255, 255, 255)),
        });
        roundtrip(ServerConnectAcceptTcp::default());

        let mut out = BytesMut::new();
        ServerConnectAcceptTcp::default().encode(&mut out);
        assert_eq!(out.len(), 6 + 2 + IP_STRING_LEN);
    }

    #[test]
    fn test_fixed_str_truncates_to_width() {
        let mut out = BytesMut::new();
        put_fixed_str(&mut out, "abcdefgh", 4);
        assert_eq!(&out[..], b"abc\0");

        let mut reader = WireReader::new(&out, "test");
        assert_eq!(reader.fixed_str(4).unwrap(), "abc");
    }

    #[test]
    fn test_cryptkey_from_short_key_is_padded() {
        let msg = ServerCryptKeyPeer::from_key(&[1, 2, 3]);
        assert_eq!(&msg.key[..3], &[1, 2, 3]);
        assert!(msg.key[3..].iter().all(|&b| b == 0));
        roundtrip(msg);
    }

    #[test]
    fn test_hello_parameters() {
        roundtrip(ClientHello::default());
        roundtrip(ClientHello {
            parameters: vec![0, 1, 0xFFFF],
        });

        let mut reader = WireReader::new(&[1, 2, 3], "test");
        assert!(matches!(
            ClientHello::decode(&mut reader),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_truncated_body_is_an_error() {
        let mut reader = WireReader::new(&[1, 2], "RT_MSG_SERVER_ECHO");
        let err = ServerEcho::decode(&mut reader).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Truncated {
                needed: 4,
                remaining: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_wrap_app_only_for_app_ids() {
        let app = AppMessage::new(crate::MessageClass::LOBBY, 0x01, Bytes::from_static(b"x"));
        let wrapped = ScertMessage::wrap_app(RtMsgId::SERVER_APP, app.clone()).unwrap();
        assert_eq!(wrapped.id(), RtMsgId::SERVER_APP);
        assert_eq!(wrapped.app(), Some(&app));
        assert!(ScertMessage::wrap_app(RtMsgId::SERVER_ECHO, app).is_none());
    }
}
