//! SCERT wire framing.
//!
//! ```text
//! plaintext:  [id:1][length:2 LE][payload:length]
//! encrypted:  [id|0x80:1][length:2 LE][tag:4][payload:length]
//! ```

use crate::app::AppMessage;
use crate::crypto::{Cipher, CipherContext, CipherSelector, HASH_SIZE};
use crate::fragment::{fragment_app, MEDIUS_MESSAGE_MAXLEN};
use crate::registry::MessageRegistry;
use crate::{ProtocolError, Result, RtMsgId, ScertMessage};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::sync::Arc;
use tracing::{debug, warn};

pub const HEADER_SIZE: usize = 3;

/// Largest payload a single frame may carry
pub const MAX_FRAME_LEN: usize = 10 * 1024;

const ENCRYPTED_FLAG: u8 = 0x80;

/// Encodes a message into one or more wire frames.
///
/// A fragmentable message whose envelope exceeds [`MEDIUS_MESSAGE_MAXLEN`] is
/// split into fragment messages under the same outer id, each framed on its own.
pub fn encode_frames(message: &ScertMessage, cipher: Option<&dyn Cipher>) -> Result<Vec<Bytes>> {
    let mut body = BytesMut::new();
    message.encode_body(&mut body);

    if message.id().is_fragmentable() && body.len() > MEDIUS_MESSAGE_MAXLEN {
        if let Some(app) = message.app() {
            debug!(
                "Fragmenting {} ({} bytes) into {} byte pieces",
                message.id(),
                body.len(),
                crate::fragment::FRAGMENT_MAX_PAYLOAD
            );
            return fragment_app(app)?
                .into_iter()
                .map(|fragment| frame_app(message.id(), fragment, cipher))
                .collect();
        }
    }

    Ok(vec![frame(message.id(), &body, cipher)?])
}

fn frame_app(id: RtMsgId, app: AppMessage, cipher: Option<&dyn Cipher>) -> Result<Bytes> {
    let mut body = BytesMut::with_capacity(app.encoded_len());
    app.encode(&mut body);
    frame(id, &body, cipher)
}

/// Prepends the header to a serialized body, encrypting it when a cipher is given
pub fn frame(id: RtMsgId, body: &[u8], cipher: Option<&dyn Cipher>) -> Result<Bytes> {
    let (flag, tag, payload) = match cipher {
        Some(cipher) => {
            let (data, tag) = cipher.encrypt(body)?;
            (ENCRYPTED_FLAG, Some(tag), data)
        }
        None => (0, None, body.to_vec()),
    };

    if payload.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(payload.len(), MAX_FRAME_LEN));
    }

    let mut out = BytesMut::with_capacity(HEADER_SIZE + HASH_SIZE + payload.len());
    out.put_u8((id.0 & 0x7F) | flag);
    out.put_u16_le(payload.len() as u16);
    if let Some(tag) = tag {
        out.put_slice(&tag);
    }
    out.put_slice(&payload);
    Ok(out.freeze())
}

/// Turns one frame's payload into a message.
///
/// With a tag, the payload is decrypted by the cipher the tag's context
/// selects. Frames that fail to decrypt or decode are logged and dropped.
/// `RT_MSG_CLIENT_CRYPTKEY_PUBLIC` is still decoded when decryption fails:
/// the server answers it with its own key regardless of what the client proposed.
pub fn decode_message(
    registry: &MessageRegistry,
    selector: &CipherSelector,
    id: RtMsgId,
    tag: Option<&[u8; HASH_SIZE]>,
    payload: &[u8],
) -> Option<ScertMessage> {
    let Some(tag) = tag else {
        return registry.instantiate(id, payload);
    };

    let context = CipherContext::from_tag(tag);
    let decrypted = selector
        .select(id, context)
        .map(|cipher| cipher.decrypt(payload, tag));

    match decrypted {
        Some(out) if out.verified => registry.instantiate(id, &out.plain),
        other if id == RtMsgId::CLIENT_CRYPTKEY_PUBLIC => {
            debug!("Accepting unverified {} ({:?})", id, context);
            let plain = other.map(|out| out.plain);
            registry.instantiate(id, plain.as_deref().unwrap_or(payload))
        }
        _ => {
            warn!(
                "Unable to decrypt {} ({:?}), HASH:{} DATA:{}",
                id,
                context,
                hex::encode(tag),
                hex::encode(payload)
            );
            None
        }
    }
}

/// Codec for use with tokio_util::codec::Framed
#[derive(Clone)]
pub struct ScertCodec {
    registry: Arc<MessageRegistry>,
    selector: CipherSelector,
    outbound_cipher: Option<Arc<dyn Cipher>>,
    max_frame_size: usize,
}

impl ScertCodec {
    pub fn new(registry: Arc<MessageRegistry>, selector: CipherSelector) -> Self {
        Self {
            registry,
            selector,
            outbound_cipher: None,
            max_frame_size: MAX_FRAME_LEN,
        }
    }

    /// Encrypts every outbound frame with `cipher`
    pub fn with_outbound_cipher(mut self, cipher: Arc<dyn Cipher>) -> Self {
        self.outbound_cipher = Some(cipher);
        self
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size.min(MAX_FRAME_LEN);
        self
    }

    /// Serializes `message` into `dst`, fragmenting when needed
    pub fn encode_into(&self, message: &ScertMessage, dst: &mut BytesMut) -> Result<()> {
        for frame in encode_frames(message, self.outbound_cipher.as_deref())? {
            dst.put_slice(&frame);
        }
        Ok(())
    }
}

impl Default for ScertCodec {
    fn default() -> Self {
        Self::new(MessageRegistry::shared(), CipherSelector::default())
    }
}

impl tokio_util::codec::Decoder for ScertCodec {
    type Item = ScertMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            if src.len() < HEADER_SIZE {
                return Ok(None);
            }

            let raw_id = src[0];
            let length = u16::from_le_bytes([src[1], src[2]]) as usize;
            let encrypted = raw_id & ENCRYPTED_FLAG != 0;

            if length > self.max_frame_size {
                warn!(
                    "Received oversized frame: {} bytes (max: {})",
                    length, self.max_frame_size
                );
                return Err(ProtocolError::FrameTooLarge(length, self.max_frame_size));
            }

            let header = if encrypted {
                HEADER_SIZE + HASH_SIZE
            } else {
                HEADER_SIZE
            };
            let frame_size = header + length;
            if src.len() < frame_size {
                src.reserve(frame_size - src.len());
                return Ok(None);
            }

            let id = RtMsgId(raw_id & !ENCRYPTED_FLAG);
            src.advance(HEADER_SIZE);
            let tag = if encrypted {
                let mut tag = [0u8; HASH_SIZE];
                tag.copy_from_slice(&src[..HASH_SIZE]);
                src.advance(HASH_SIZE);
                Some(tag)
            } else {
                None
            };
            let payload = src.split_to(length);

            if let Some(message) =
                decode_message(&self.registry, &self.selector, id, tag.as_ref(), &payload)
            {
                debug!("Decoded {}", message);
                return Ok(Some(message));
            }
        }
    }
}

impl tokio_util::codec::Encoder<ScertMessage> for ScertCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: ScertMessage, dst: &mut BytesMut) -> Result<()> {
        self.encode_into(&item, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::MessageClass;
    use crate::crypto::HmacCipher;
    use crate::fragment::{PacketFragment, FRAGMENT_MAX_PAYLOAD};
    use crate::messages::*;
    use std::net::Ipv4Addr;
    use tokio_util::codec::{Decoder, Encoder};

    fn session_cipher() -> Arc<dyn Cipher> {
        Arc::new(HmacCipher::new(b"session", CipherContext::RcClientSession).unwrap())
    }

    fn auth_cipher() -> Arc<dyn Cipher> {
        Arc::new(HmacCipher::new(b"auth", CipherContext::RsaAuth).unwrap())
    }

    fn codec() -> ScertCodec {
        ScertCodec::new(
            MessageRegistry::shared(),
            CipherSelector::new(Some(session_cipher()), Some(auth_cipher())),
        )
    }

    fn decode_all(codec: &mut ScertCodec, buf: &mut BytesMut) -> Vec<ScertMessage> {
        let mut out = Vec::new();
        while let Some(msg) = codec.decode(buf).unwrap() {
            out.push(msg);
        }
        out
    }

    fn sample_messages() -> Vec<ScertMessage> {
        vec![
            ClientHello {
                parameters: vec![0, 1, 2],
            }
            .into(),
            ServerHello.into(),
            ClientCryptKeyPublic::from_key(&[7; CRYPTKEY_LEN]).into(),
            ServerCryptKeyPeer::from_key(b"peer").into(),
            ServerCryptKeyGame::from_key(b"game").into(),
            ClientConnectTcp {
                target_world_id: 1,
                app_id: 11184,
                trailer: Bytes::from_static(b"session-key\0"),
            }
            .into(),
            ServerConnectRequire {
                contents: Bytes::from_static(&[0x02, 0x48, 0x02]),
            }
            .into(),
            ClientConnectReadyRequire {
                contents: Bytes::from_static(&[0x01]),
            }
            .into(),
            ClientConnectReadyTcp::default().into(),
            ServerConnectAcceptTcp {
                reserved: [0; 6],
                flag: 1,
                ip: Some(Ipv4Addr::new(10, 0, 0, 7)),
            }
            .into(),
            ServerConnectComplete { client_count: 1 }.into(),
            ServerEcho {
                timestamp: 99,
                value: [1, 2, 3, 4],
            }
            .into(),
            ClientEcho {
                value: Bytes::new(),
            }
            .into(),
            ServerSystemMessage {
                severity: 20,
                encoding: 1,
                language: 2,
                end_of_message: true,
                text: "Server in maintenance.".to_string(),
            }
            .into(),
            ServerForcedDisconnect {
                reason: DisconnectReason::BANNED,
            }
            .into(),
            ClientDisconnectWithReason { reason: 3 }.into(),
            ServerApp {
                app: AppMessage::new(MessageClass::LOBBY, 0x10, Bytes::from_static(&[1; 64])),
            }
            .into(),
            ClientAppToServer {
                app: AppMessage::new(MessageClass::LOBBY_EXT, 0x3C, Bytes::from_static(&[9; 32])),
            }
            .into(),
        ]
    }

    #[test]
    fn test_samples_cover_every_registered_type() {
        let sampled: std::collections::BTreeSet<RtMsgId> =
            sample_messages().iter().map(ScertMessage::id).collect();
        let registered: std::collections::BTreeSet<RtMsgId> =
            standard_descriptors().iter().map(|d| d.id).collect();
        assert_eq!(sampled, registered);
    }

    #[test]
    fn test_plaintext_roundtrip() {
        let mut codec = codec();
        let messages = sample_messages();

        let mut buf = BytesMut::new();
        for msg in &messages {
            codec.encode(msg.clone(), &mut buf).unwrap();
        }

        assert_eq!(decode_all(&mut codec, &mut buf), messages);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_encrypted_roundtrip() {
        let mut codec = codec().with_outbound_cipher(session_cipher());
        let messages = sample_messages();

        let mut buf = BytesMut::new();
        for msg in &messages {
            codec.encode(msg.clone(), &mut buf).unwrap();
        }
        assert_eq!(buf[0] & ENCRYPTED_FLAG, ENCRYPTED_FLAG);

        assert_eq!(decode_all(&mut codec, &mut buf), messages);
    }

    #[test]
    fn test_header_layout() {
        let msg: ScertMessage = ServerConnectRequire {
            contents: Bytes::from_static(&[0x02, 0x48, 0x02]),
        }
        .into();
        let frames = encode_frames(&msg, None).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], &[0x22, 3, 0, 0x02, 0x48, 0x02]);
    }

    #[test]
    fn test_small_app_message_is_not_fragmented() {
        let body = Bytes::from(vec![5u8; MEDIUS_MESSAGE_MAXLEN - 2]);
        let msg: ScertMessage = ServerApp {
            app: AppMessage::new(MessageClass::LOBBY, 1, body),
        }
        .into();
        let frames = encode_frames(&msg, None).unwrap();
        assert_eq!(frames.len(), 1);
        let length = u16::from_le_bytes([frames[0][1], frames[0][2]]) as usize;
        assert_eq!(length, MEDIUS_MESSAGE_MAXLEN);
        assert_eq!(frames[0].len(), HEADER_SIZE + length);
    }

    #[test]
    fn test_oversized_app_message_is_fragmented() {
        let payload: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();
        let original = AppMessage::new(MessageClass::LOBBY_EXT, 0x33, Bytes::from(payload.clone()));
        let msg: ScertMessage = ServerApp {
            app: original.clone(),
        }
        .into();

        let frames = encode_frames(&msg, None).unwrap();
        assert_eq!(frames.len(), payload.len().div_ceil(FRAGMENT_MAX_PAYLOAD));

        let mut codec = codec();
        let mut buf = BytesMut::new();
        for frame in &frames {
            assert_eq!(frame[0], RtMsgId::SERVER_APP.0);
            assert!(frame.len() - HEADER_SIZE <= MEDIUS_MESSAGE_MAXLEN);
            buf.put_slice(frame);
        }

        let mut joined = Vec::new();
        for decoded in decode_all(&mut codec, &mut buf) {
            let fragment = PacketFragment::from_app(decoded.app().unwrap()).unwrap();
            assert_eq!(fragment.sub_class, original.class);
            assert_eq!(fragment.sub_type, original.kind);
            joined.extend_from_slice(&fragment.payload);
        }
        assert_eq!(joined, payload);
    }

    #[test]
    fn test_non_fragmentable_oversize_is_rejected() {
        let msg: ScertMessage = ClientEcho {
            value: Bytes::from(vec![0u8; MAX_FRAME_LEN + 1]),
        }
        .into();
        assert!(matches!(
            encode_frames(&msg, None),
            Err(ProtocolError::FrameTooLarge(_, _))
        ));
    }

    #[test]
    fn test_unregistered_id_decodes_raw() {
        let mut codec = codec();
        let mut buf = BytesMut::from(&[0x30, 2, 0, 0xAB, 0xCD][..]);
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(
            msg,
            ScertMessage::Raw(RawMessage {
                id: RtMsgId(0x30),
                contents: Bytes::from_static(&[0xAB, 0xCD]),
            })
        );
    }

    #[test]
    fn test_undecryptable_frame_is_skipped() {
        let foreign: Arc<dyn Cipher> =
            Arc::new(HmacCipher::new(b"other", CipherContext::RcClientSession).unwrap());
        let bad = ScertCodec::default().with_outbound_cipher(foreign);
        let mut buf = BytesMut::new();
        bad.encode_into(&ServerHello.into(), &mut buf).unwrap();
        ScertCodec::default()
            .encode_into(&ServerConnectComplete { client_count: 1 }.into(), &mut buf)
            .unwrap();

        let mut codec = codec();
        let decoded = decode_all(&mut codec, &mut buf);
        assert_eq!(
            decoded,
            vec![ScertMessage::from(ServerConnectComplete { client_count: 1 })]
        );
    }

    #[test]
    fn test_cryptkey_public_survives_failed_decrypt() {
        let foreign: Arc<dyn Cipher> =
            Arc::new(HmacCipher::new(b"client-guess", CipherContext::RsaAuth).unwrap());
        let key = [0x5Au8; CRYPTKEY_LEN];
        let msg: ScertMessage = ClientCryptKeyPublic { key }.into();

        let mut buf = BytesMut::new();
        ScertCodec::default()
            .with_outbound_cipher(foreign)
            .encode_into(&msg, &mut buf)
            .unwrap();

        let mut codec = codec();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.id(), RtMsgId::CLIENT_CRYPTKEY_PUBLIC);
    }

    #[test]
    fn test_malformed_frame_does_not_poison_next() {
        let mut codec = codec();
        let mut buf = BytesMut::from(&[RtMsgId::SERVER_ECHO.0, 1, 0, 0xFF][..]);
        codec
            .encode(ServerConnectComplete { client_count: 2 }.into(), &mut buf)
            .unwrap();

        let decoded = decode_all(&mut codec, &mut buf);
        assert_eq!(
            decoded,
            vec![ScertMessage::from(ServerConnectComplete { client_count: 2 })]
        );
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let mut codec = codec();
        let frames = encode_frames(&ServerConnectComplete { client_count: 5 }.into(), None).unwrap();
        let mut buf = BytesMut::from(&frames[0][..2]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.put_slice(&frames[0][2..4]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.put_slice(&frames[0][4..]);
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_oversized_header_rejected() {
        let mut codec = codec().with_max_frame_size(1024);
        let mut buf = BytesMut::from(&[0x0B, 0x01, 0x08][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::FrameTooLarge(0x0801, 1024))
        ));
    }
}
