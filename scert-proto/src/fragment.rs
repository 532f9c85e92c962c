//! Splitting of oversized application envelopes into DME packet fragments,
//! and the matching in-order reassembly.
//!
//! Fragment body layout (little-endian):
//!
//! ```text
//! [sub_class:1][sub_type:1][sub_size:2][sub_count:2][sub_index:2]
//! [buffer_size:4][buffer_offset:4][payload:sub_size]
//! ```

use crate::app::{AppMessage, MessageClass};
use crate::messages::{ScertMessage, WireReader};
use crate::{ProtocolError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;
use tracing::debug;

/// Largest serialized envelope (class + type + body) sent without fragmenting
pub const MEDIUS_MESSAGE_MAXLEN: usize = 512;

/// Inner body bytes carried by a single fragment
pub const FRAGMENT_MAX_PAYLOAD: usize = 400;

/// DME message type of a packet fragment
pub const DME_PACKET_FRAGMENT: u8 = 0x08;

pub const FRAGMENT_HEADER_LEN: usize = 14;

/// Upper bound on a reassembled body; larger announced sizes are rejected
pub const MAX_REASSEMBLED_LEN: usize = 64 * 1024;

/// Payloads one assembler keeps in flight; starting another evicts the oldest
pub const MAX_PENDING_PAYLOADS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketFragment {
    pub sub_class: MessageClass,
    pub sub_type: u8,
    pub sub_count: u16,
    pub sub_index: u16,
    pub buffer_size: u32,
    pub buffer_offset: u32,
    pub payload: Bytes,
}

impl PacketFragment {
    /// Parses the fragment carried by `app`, which must be a DME packet fragment
    pub fn from_app(app: &AppMessage) -> Result<Self> {
        if !app.is_fragment() {
            return Err(ProtocolError::Malformed(format!(
                "{} is not a packet fragment",
                app
            )));
        }

        let mut reader = WireReader::new(&app.body, "DMETypePacketFragment");
        let sub_class = MessageClass(reader.u8()?);
        let sub_type = reader.u8()?;
        let sub_size = reader.u16()? as usize;
        let sub_count = reader.u16()?;
        let sub_index = reader.u16()?;
        let buffer_size = reader.u32()?;
        let buffer_offset = reader.u32()?;
        let payload = Bytes::copy_from_slice(reader.bytes(sub_size)?);

        if reader.remaining() != 0 {
            return Err(ProtocolError::Malformed(format!(
                "{} trailing bytes after fragment payload",
                reader.remaining()
            )));
        }

        Ok(Self {
            sub_class,
            sub_type,
            sub_count,
            sub_index,
            buffer_size,
            buffer_offset,
            payload,
        })
    }

    pub fn to_app(&self) -> AppMessage {
        let mut body = BytesMut::with_capacity(FRAGMENT_HEADER_LEN + self.payload.len());
        body.put_u8(self.sub_class.0);
        body.put_u8(self.sub_type);
        body.put_u16_le(self.payload.len() as u16);
        body.put_u16_le(self.sub_count);
        body.put_u16_le(self.sub_index);
        body.put_u32_le(self.buffer_size);
        body.put_u32_le(self.buffer_offset);
        body.put_slice(&self.payload);
        AppMessage::new(MessageClass::DME, DME_PACKET_FRAGMENT, body.freeze())
    }
}

/// Splits `payload` into `ceil(len / chunk)` fragments in emission order.
pub fn split_payload(
    class: MessageClass,
    kind: u8,
    payload: &[u8],
    chunk: usize,
) -> Result<Vec<PacketFragment>> {
    if chunk == 0 || chunk > u16::MAX as usize {
        return Err(ProtocolError::Malformed(format!(
            "invalid fragment chunk size {}",
            chunk
        )));
    }

    let count = payload.len().div_ceil(chunk);
    let sub_count = u16::try_from(count).map_err(|_| {
        ProtocolError::Malformed(format!("payload needs {} fragments", count))
    })?;
    let buffer_size = u32::try_from(payload.len()).map_err(|_| {
        ProtocolError::Malformed(format!("payload of {} bytes", payload.len()))
    })?;

    let fragments = payload
        .chunks(chunk)
        .enumerate()
        .map(|(index, piece)| PacketFragment {
            sub_class: class,
            sub_type: kind,
            sub_count,
            sub_index: index as u16,
            buffer_size,
            buffer_offset: (index * chunk) as u32,
            payload: Bytes::copy_from_slice(piece),
        })
        .collect();

    Ok(fragments)
}

/// Splits an envelope's body into fragment envelopes of `FRAGMENT_MAX_PAYLOAD` bytes.
pub fn fragment_app(app: &AppMessage) -> Result<Vec<AppMessage>> {
    let fragments = split_payload(app.class, app.kind, &app.body, FRAGMENT_MAX_PAYLOAD)?;
    Ok(fragments.iter().map(PacketFragment::to_app).collect())
}

struct PartialPayload {
    sub_count: u16,
    buffer_size: u32,
    next_index: u16,
    started: u64,
    buffer: BytesMut,
}

/// Rebuilds fragmented envelopes, one pending payload per (class, type).
///
/// Fragments must arrive in emission order; any gap or mismatch discards the
/// pending payload for that key.
pub struct FragmentAssembler {
    pending: HashMap<(MessageClass, u8), PartialPayload>,
    max_len: usize,
    started: u64,
}

impl Default for FragmentAssembler {
    fn default() -> Self {
        Self::new(MAX_REASSEMBLED_LEN)
    }
}

impl FragmentAssembler {
    pub fn new(max_len: usize) -> Self {
        Self {
            pending: HashMap::new(),
            max_len,
            started: 0,
        }
    }

    /// Number of payloads waiting for more fragments
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Feeds one fragment; returns the original envelope once the last fragment arrives.
    pub fn push(&mut self, fragment: PacketFragment) -> Result<Option<AppMessage>> {
        let key = (fragment.sub_class, fragment.sub_type);

        if fragment.sub_index == 0 {
            if fragment.sub_count == 0 {
                return Err(ProtocolError::FragmentSequence(
                    "fragment count is zero".to_string(),
                ));
            }
            if fragment.buffer_size as usize > self.max_len {
                return Err(ProtocolError::FragmentSequence(format!(
                    "announced size {} exceeds {}",
                    fragment.buffer_size, self.max_len
                )));
            }
            if self.pending.remove(&key).is_some() {
                debug!(
                    "Discarding incomplete payload for {} type 0x{:02X}",
                    key.0, key.1
                );
            }
            if self.pending.len() >= MAX_PENDING_PAYLOADS {
                self.evict_oldest();
            }
            self.started += 1;
            self.pending.insert(
                key,
                PartialPayload {
                    sub_count: fragment.sub_count,
                    buffer_size: fragment.buffer_size,
                    next_index: 0,
                    started: self.started,
                    buffer: BytesMut::new(),
                },
            );
        }

        let partial = self.pending.get_mut(&key).ok_or_else(|| {
            ProtocolError::FragmentSequence(format!(
                "fragment {} for {} type 0x{:02X} without a start",
                fragment.sub_index, key.0, key.1
            ))
        })?;

        let violation = if fragment.sub_count != partial.sub_count {
            Some(format!(
                "count changed from {} to {}",
                partial.sub_count, fragment.sub_count
            ))
        } else if fragment.buffer_size != partial.buffer_size {
            Some(format!(
                "size changed from {} to {}",
                partial.buffer_size, fragment.buffer_size
            ))
        } else if fragment.sub_index != partial.next_index {
            Some(format!(
                "expected index {}, got {}",
                partial.next_index, fragment.sub_index
            ))
        } else if fragment.buffer_offset as usize != partial.buffer.len() {
            Some(format!(
                "expected offset {}, got {}",
                partial.buffer.len(),
                fragment.buffer_offset
            ))
        } else if partial.buffer.len() + fragment.payload.len() > partial.buffer_size as usize {
            Some("fragment overruns announced size".to_string())
        } else {
            None
        };

        if let Some(violation) = violation {
            self.pending.remove(&key);
            return Err(ProtocolError::FragmentSequence(violation));
        }

        partial.buffer.put_slice(&fragment.payload);
        partial.next_index += 1;

        if partial.next_index < partial.sub_count {
            return Ok(None);
        }

        let Some(done) = self.pending.remove(&key) else {
            return Ok(None);
        };
        if done.buffer.len() != done.buffer_size as usize {
            return Err(ProtocolError::FragmentSequence(format!(
                "reassembled {} bytes, announced {}",
                done.buffer.len(),
                done.buffer_size
            )));
        }

        Ok(Some(AppMessage::new(key.0, key.1, done.buffer.freeze())))
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .pending
            .iter()
            .min_by_key(|(_, partial)| partial.started)
            .map(|(key, _)| *key);
        if let Some(key) = oldest {
            debug!(
                "Too many pending payloads, dropping {} type 0x{:02X}",
                key.0, key.1
            );
            self.pending.remove(&key);
        }
    }

    /// Passes non-fragment messages straight through. A fragment is absorbed,
    /// and the rebuilt message under the same outer id is returned with the last piece.
    pub fn accept(&mut self, message: ScertMessage) -> Result<Option<ScertMessage>> {
        let fragment = match message.app() {
            Some(app) if app.is_fragment() => PacketFragment::from_app(app)?,
            _ => return Ok(Some(message)),
        };

        Ok(self
            .push(fragment)?
            .and_then(|app| ScertMessage::wrap_app(message.id(), app)))
    }
}
