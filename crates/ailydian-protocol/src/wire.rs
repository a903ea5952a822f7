//! Wire envelope
//!
//! Big-endian layout:
//!
//! ```text
//! version u8 | flags u8
//! [flags & HANDSHAKE: identity 64 | ephemeral 32 | spk id u32 | opk flag u8 | opk id u32]
//! ratchet key 32 | counter u32 | previous counter u32
//! aead u8 | iv len u8 | iv | ciphertext
//! ```
//!
//! Transports carry the envelope as base64.

use ailydian_crypto::{
    aead::{AeadAlgorithm, Nonce, TAG_SIZE},
    identity::{IdentityPublicKey, IDENTITY_PUBLIC_KEY_SIZE},
    keys::PublicKeyBytes,
    ratchet::EncryptedMessage,
    x3dh::HandshakeHeader,
    PROTOCOL_VERSION,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};

/// Envelope carries a handshake header
pub const FLAG_HANDSHAKE: u8 = 0x01;

const HANDSHAKE_LEN: usize = IDENTITY_PUBLIC_KEY_SIZE + 32 + 4 + 1 + 4;
const MESSAGE_HEADER_LEN: usize = 32 + 4 + 4 + 1 + 1;

/// A ratchet message plus the optional handshake that opens the session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// Present until the initiator has heard back
    pub handshake: Option<HandshakeHeader>,
    /// The encrypted message
    pub message: EncryptedMessage,
}

impl Envelope {
    /// Serialize to wire bytes
    pub fn encode(&self) -> Bytes {
        let iv = self.message.nonce.as_bytes();
        let mut buf = BytesMut::with_capacity(
            2 + HANDSHAKE_LEN + MESSAGE_HEADER_LEN + iv.len() + self.message.ciphertext.len(),
        );

        buf.put_u8(PROTOCOL_VERSION);
        match &self.handshake {
            Some(header) => {
                buf.put_u8(FLAG_HANDSHAKE);
                buf.put_slice(&header.identity_key.to_bytes());
                buf.put_slice(header.ephemeral_key.as_bytes());
                buf.put_u32(header.signed_pre_key_id);
                match header.one_time_pre_key_id {
                    Some(id) => {
                        buf.put_u8(1);
                        buf.put_u32(id);
                    }
                    None => {
                        buf.put_u8(0);
                        buf.put_u32(0);
                    }
                }
            }
            None => buf.put_u8(0),
        }

        buf.put_slice(self.message.ratchet_key.as_bytes());
        buf.put_u32(self.message.counter);
        buf.put_u32(self.message.previous_counter);
        buf.put_u8(self.message.nonce.algorithm().to_byte());
        // nonce lengths are 12 or 24
        buf.put_u8(iv.len() as u8);
        buf.put_slice(iv);
        buf.put_slice(&self.message.ciphertext);

        buf.freeze()
    }

    /// Parse wire bytes
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        need(buf, 2, "envelope header")?;
        let version = buf.get_u8();
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::malformed(format!(
                "unsupported protocol version {}",
                version
            )));
        }

        let flags = buf.get_u8();
        if flags & !FLAG_HANDSHAKE != 0 {
            return Err(ProtocolError::malformed(format!("unknown flags {:#04x}", flags)));
        }

        let handshake = if flags & FLAG_HANDSHAKE != 0 {
            need(buf, HANDSHAKE_LEN, "handshake header")?;
            let identity_key = IdentityPublicKey::from_bytes(&buf[..IDENTITY_PUBLIC_KEY_SIZE])
                .map_err(|e| ProtocolError::malformed(format!("identity key: {}", e)))?;
            buf.advance(IDENTITY_PUBLIC_KEY_SIZE);
            let ephemeral_key = read_key(&mut buf)?;
            let signed_pre_key_id = buf.get_u32();
            let has_one_time = buf.get_u8();
            let one_time_id = buf.get_u32();
            let one_time_pre_key_id = match has_one_time {
                0 => None,
                1 => Some(one_time_id),
                other => {
                    return Err(ProtocolError::malformed(format!(
                        "invalid one-time pre-key flag {}",
                        other
                    )))
                }
            };
            Some(HandshakeHeader {
                identity_key,
                ephemeral_key,
                signed_pre_key_id,
                one_time_pre_key_id,
            })
        } else {
            None
        };

        need(buf, MESSAGE_HEADER_LEN, "message header")?;
        let ratchet_key = read_key(&mut buf)?;
        let counter = buf.get_u32();
        let previous_counter = buf.get_u32();
        let algorithm = AeadAlgorithm::from_byte(buf.get_u8())
            .ok_or_else(|| ProtocolError::malformed("unknown aead algorithm"))?;
        let iv_len = usize::from(buf.get_u8());
        if iv_len != algorithm.nonce_len() {
            return Err(ProtocolError::malformed(format!(
                "iv length {} does not match algorithm",
                iv_len
            )));
        }

        need(buf, iv_len + TAG_SIZE, "iv and ciphertext")?;
        let nonce = Nonce::from_parts(algorithm, &buf[..iv_len])
            .map_err(|e| ProtocolError::malformed(e.to_string()))?;
        buf.advance(iv_len);
        let ciphertext = buf.to_vec();

        Ok(Envelope {
            handshake,
            message: EncryptedMessage {
                ratchet_key,
                counter,
                previous_counter,
                nonce,
                ciphertext,
            },
        })
    }

    /// Base64 transport encoding
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.encode())
    }

    /// Parse the base64 transport encoding
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| ProtocolError::malformed(format!("base64: {}", e)))?;
        Self::decode(&bytes)
    }
}

fn need(buf: &[u8], len: usize, what: &str) -> Result<()> {
    if buf.len() < len {
        return Err(ProtocolError::malformed(format!(
            "truncated {}: need {} bytes, have {}",
            what,
            len,
            buf.len()
        )));
    }
    Ok(())
}

fn read_key(buf: &mut &[u8]) -> Result<PublicKeyBytes> {
    let key = PublicKeyBytes::from_slice(&buf[..32])
        .map_err(|e| ProtocolError::malformed(e.to_string()))?;
    buf.advance(32);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ailydian_crypto::identity::IdentityKeyPair;

    fn message(algorithm: AeadAlgorithm) -> EncryptedMessage {
        EncryptedMessage {
            ratchet_key: PublicKeyBytes([9u8; 32]),
            counter: 7,
            previous_counter: 3,
            nonce: Nonce::random(algorithm).unwrap(),
            ciphertext: vec![0xAB; 40],
        }
    }

    fn header(one_time: Option<u32>) -> HandshakeHeader {
        HandshakeHeader {
            identity_key: IdentityKeyPair::generate().unwrap().public_key(),
            ephemeral_key: PublicKeyBytes([5u8; 32]),
            signed_pre_key_id: 1,
            one_time_pre_key_id: one_time,
        }
    }

    #[test]
    fn test_plain_envelope() {
        let envelope = Envelope {
            handshake: None,
            message: message(AeadAlgorithm::Aes256Gcm),
        };

        let bytes = envelope.encode();
        assert_eq!(bytes[0], PROTOCOL_VERSION);
        assert_eq!(bytes[1], 0);
        assert_eq!(bytes.len(), 2 + MESSAGE_HEADER_LEN + 12 + 40);
        assert_eq!(Envelope::decode(&bytes).unwrap(), envelope);
    }

    #[test]
    fn test_handshake_envelope() {
        for one_time in [Some(42), None] {
            let envelope = Envelope {
                handshake: Some(header(one_time)),
                message: message(AeadAlgorithm::XChaCha20Poly1305),
            };
            let decoded = Envelope::from_base64(&envelope.to_base64()).unwrap();
            assert_eq!(decoded, envelope);
        }
    }

    #[test]
    fn test_counters_are_big_endian() {
        let envelope = Envelope {
            handshake: None,
            message: message(AeadAlgorithm::Aes256Gcm),
        };
        let bytes = envelope.encode();
        assert_eq!(&bytes[2 + 32..2 + 36], &[0, 0, 0, 7]);
        assert_eq!(&bytes[2 + 36..2 + 40], &[0, 0, 0, 3]);
    }

    #[test]
    fn test_rejects_bad_input() {
        let bytes = Envelope {
            handshake: Some(header(Some(1))),
            message: message(AeadAlgorithm::Aes256Gcm),
        }
        .encode();

        for len in [0, 1, 10, 2 + HANDSHAKE_LEN, bytes.len() - 30] {
            let err = Envelope::decode(&bytes[..len]).unwrap_err();
            assert_eq!(err.kind(), crate::ErrorKind::Malformed);
        }

        let mut wrong_version = bytes.to_vec();
        wrong_version[0] = 99;
        assert!(Envelope::decode(&wrong_version).is_err());

        let mut wrong_flags = bytes.to_vec();
        wrong_flags[1] = 0x80;
        assert!(Envelope::decode(&wrong_flags).is_err());

        assert!(Envelope::from_base64("not base64!").is_err());
    }
}
