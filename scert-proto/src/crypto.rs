use crate::{ProtocolError, Result, RtMsgId};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

/// Size of the authentication tag accompanying encrypted frames
pub const HASH_SIZE: usize = 4;

/// Selects which keyed cipher applies to a frame (top 3 bits of tag byte 3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CipherContext {
    Id00 = 0,
    RcServComm = 1,
    Id02 = 2,
    RcClientSession = 3,
    Id04 = 4,
    Id05 = 5,
    RsaAuth = 6,
    Id07 = 7,
}

impl CipherContext {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => Self::Id00,
            1 => Self::RcServComm,
            2 => Self::Id02,
            3 => Self::RcClientSession,
            4 => Self::Id04,
            5 => Self::Id05,
            6 => Self::RsaAuth,
            _ => Self::Id07,
        }
    }

    pub fn from_tag(tag: &[u8; HASH_SIZE]) -> Self {
        Self::from_bits(tag[3] >> 5)
    }

    /// Stamps this context into the top 3 bits of tag byte 3
    pub fn stamp(self, tag: &mut [u8; HASH_SIZE]) {
        tag[3] = (tag[3] & 0x1F) | ((self as u8) << 5);
    }
}

/// Output of a decrypt attempt.
///
/// The plaintext is produced even when the tag does not verify; callers
/// decide whether unverified bytes may be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decrypted {
    pub plain: Vec<u8>,
    pub verified: bool,
}

/// A keyed cipher bound to one context.
pub trait Cipher: Send + Sync + fmt::Debug {
    fn context(&self) -> CipherContext;

    fn encrypt(&self, plain: &[u8]) -> Result<(Vec<u8>, [u8; HASH_SIZE])>;

    fn decrypt(&self, data: &[u8], tag: &[u8; HASH_SIZE]) -> Decrypted;
}

/// Reference keyed cipher built on HMAC-SHA256.
///
/// The tag is the truncated MAC of the plaintext with the context stamped in;
/// the keystream is derived from the key and the tag. Not wire-compatible
/// with the legacy client ciphers, which plug in through [`Cipher`].
#[derive(Clone)]
pub struct HmacCipher {
    mac: HmacSha256,
    context: CipherContext,
}

impl fmt::Debug for HmacCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HmacCipher")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl HmacCipher {
    pub fn new(key: &[u8], context: CipherContext) -> Result<Self> {
        let mac = HmacSha256::new_from_slice(key)
            .map_err(|e| ProtocolError::Cipher(format!("invalid key: {}", e)))?;
        Ok(Self { mac, context })
    }

    fn tag(&self, plain: &[u8]) -> [u8; HASH_SIZE] {
        let mut mac = self.mac.clone();
        mac.update(plain);
        let digest = mac.finalize().into_bytes();
        let mut tag = [0u8; HASH_SIZE];
        tag.copy_from_slice(&digest[..HASH_SIZE]);
        self.context.stamp(&mut tag);
        tag
    }

    fn apply_keystream(&self, tag: &[u8; HASH_SIZE], data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len());
        for (counter, block) in data.chunks(32).enumerate() {
            let mut mac = self.mac.clone();
            mac.update(b"scert-keystream");
            mac.update(tag);
            mac.update(&(counter as u32).to_le_bytes());
            let stream = mac.finalize().into_bytes();
            out.extend(block.iter().zip(stream.iter()).map(|(d, k)| d ^ k));
        }
        out
    }
}

impl Cipher for HmacCipher {
    fn context(&self) -> CipherContext {
        self.context
    }

    fn encrypt(&self, plain: &[u8]) -> Result<(Vec<u8>, [u8; HASH_SIZE])> {
        let tag = self.tag(plain);
        Ok((self.apply_keystream(&tag, plain), tag))
    }

    fn decrypt(&self, data: &[u8], tag: &[u8; HASH_SIZE]) -> Decrypted {
        let plain = self.apply_keystream(tag, data);
        let verified = CipherContext::from_tag(tag) == self.context
            && constant_time_eq(&self.tag(&plain), tag);
        Decrypted { plain, verified }
    }
}

/// Constant-time comparison to prevent timing attacks
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }

    result == 0
}

/// Maps a (message id, context) pair to the keyed cipher that handles it.
#[derive(Debug, Clone, Default)]
pub struct CipherSelector {
    session: Option<Arc<dyn Cipher>>,
    auth: Option<Arc<dyn Cipher>>,
}

impl CipherSelector {
    pub fn new(session: Option<Arc<dyn Cipher>>, auth: Option<Arc<dyn Cipher>>) -> Self {
        Self { session, auth }
    }

    pub fn select(&self, _id: RtMsgId, context: CipherContext) -> Option<&Arc<dyn Cipher>> {
        match context {
            CipherContext::RcClientSession => self.session.as_ref(),
            CipherContext::RsaAuth => self.auth.as_ref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_from_every_tag_value() {
        for bits in 0u8..8 {
            let tag = [0xAA, 0xBB, 0xCC, (bits << 5) | 0x1F];
            assert_eq!(CipherContext::from_tag(&tag) as u8, bits);
        }
    }

    #[test]
    fn test_stamp_preserves_low_bits() {
        let mut tag = [0, 0, 0, 0xFF];
        CipherContext::RcClientSession.stamp(&mut tag);
        assert_eq!(tag[3], 0x7F);
        assert_eq!(CipherContext::from_tag(&tag), CipherContext::RcClientSession);
    }

    #[test]
    fn test_encrypt_decrypt() {
        let cipher = HmacCipher::new(b"session-key", CipherContext::RcClientSession).unwrap();
        let plain = b"hello scert, this spans more than one keystream block".to_vec();

        let (data, tag) = cipher.encrypt(&plain).unwrap();
        assert_ne!(data, plain);
        assert_eq!(CipherContext::from_tag(&tag), CipherContext::RcClientSession);

        let out = cipher.decrypt(&data, &tag);
        assert!(out.verified);
        assert_eq!(out.plain, plain);
    }

    #[test]
    fn test_wrong_key_fails_verification() {
        let a = HmacCipher::new(b"key-a", CipherContext::RsaAuth).unwrap();
        let b = HmacCipher::new(b"key-b", CipherContext::RsaAuth).unwrap();

        let (data, tag) = a.encrypt(b"payload").unwrap();
        assert!(!b.decrypt(&data, &tag).verified);
    }

    #[test]
    fn test_tampered_data_fails_verification() {
        let cipher = HmacCipher::new(b"key", CipherContext::RcClientSession).unwrap();
        let (mut data, tag) = cipher.encrypt(b"payload").unwrap();
        data[0] ^= 1;
        assert!(!cipher.decrypt(&data, &tag).verified);
    }

    #[test]
    fn test_selector_routes_contexts() {
        let session: Arc<dyn Cipher> =
            Arc::new(HmacCipher::new(b"s", CipherContext::RcClientSession).unwrap());
        let auth: Arc<dyn Cipher> = Arc::new(HmacCipher::new(b"a", CipherContext::RsaAuth).unwrap());
        let selector = CipherSelector::new(Some(session), Some(auth));

        let id = RtMsgId::CLIENT_CRYPTKEY_PUBLIC;
        assert_eq!(
            selector.select(id, CipherContext::RcClientSession).map(|c| c.context()),
            Some(CipherContext::RcClientSession)
        );
        assert_eq!(
            selector.select(id, CipherContext::RsaAuth).map(|c| c.context()),
            Some(CipherContext::RsaAuth)
        );
        for bits in [0, 1, 2, 4, 5, 7] {
            assert!(selector.select(id, CipherContext::from_bits(bits)).is_none());
        }
    }
}
