use aes_gcm::{AeadInPlace, Aes256Gcm, KeyInit, Nonce, Tag};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::transport::error::{crypto_error, TransportResult};
use crate::transport::frame::Frame;

/// HKDF context string for session-key derivation. Fixed by the wire
/// contract; both ends must expand with the same info bytes.
pub const SESSION_CONTEXT: &[u8] = b"session";

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Derives the 256-bit per-peer session key: X25519 agreement over the
/// long-term keys, then HKDF-SHA256 with no salt and the fixed context.
pub fn derive_session_key(secret: &StaticSecret, peer_public: &PublicKey) -> [u8; 32] {
    let shared = secret.diffie_hellman(peer_public);
    let hkdf = Hkdf::<Sha256>::new(None, shared.as_bytes());
    let mut key = [0u8; 32];
    hkdf.expand(SESSION_CONTEXT, &mut key)
        .expect("32 bytes is a valid hkdf output length");
    key
}

/// Seals a plaintext into one wire frame under a fresh random 96-bit IV.
pub fn encrypt_frame(session_key: &[u8; 32], plaintext: &[u8]) -> TransportResult<Frame> {
    let cipher = Aes256Gcm::new_from_slice(session_key)
        .map_err(|err| crypto_error(format!("invalid session key: {}", err)))?;

    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);

    let mut ciphertext = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&iv), b"", &mut ciphertext)
        .map_err(|err| crypto_error(format!("frame encryption failed: {}", err)))?;

    Ok(Frame {
        ciphertext,
        iv: iv.to_vec(),
        tag: tag.to_vec(),
    })
}

/// Opens one wire frame. Any tampering with ciphertext, IV or tag fails
/// authentication and the caller must drop the connection.
pub fn decrypt_frame(session_key: &[u8; 32], frame: &Frame) -> TransportResult<Vec<u8>> {
    if frame.iv.len() != IV_LEN {
        return Err(crypto_error(format!("unexpected IV length {}", frame.iv.len())));
    }
    if frame.tag.len() != TAG_LEN {
        return Err(crypto_error(format!("unexpected tag length {}", frame.tag.len())));
    }

    let cipher = Aes256Gcm::new_from_slice(session_key)
        .map_err(|err| crypto_error(format!("invalid session key: {}", err)))?;

    let mut plaintext = frame.ciphertext.clone();
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(&frame.iv),
            b"",
            &mut plaintext,
            Tag::from_slice(&frame.tag),
        )
        .map_err(|_| crypto_error("frame failed authentication"))?;
    Ok(plaintext)
}
