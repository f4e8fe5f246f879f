//! DER encodings for the long-term X25519 key pair.
//!
//! Public keys travel as `SubjectPublicKeyInfo` (RFC 8410 `id-X25519`) so
//! that discovery TXT records and the keys table hold the same bytes every
//! peer expects; private keys are stored as one-key PKCS#8 documents.

use x25519_dalek::{PublicKey, StaticSecret};

use crate::identity::error::{invalid_key, IdentityResult};

/// DER prefix of a `SubjectPublicKeyInfo` wrapping a raw X25519 public key:
/// SEQUENCE(42) { SEQUENCE(5) { OID 1.3.101.110 }, BIT STRING(33) }.
const SPKI_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x6e, 0x03, 0x21, 0x00,
];

/// DER prefix of a PKCS#8 `PrivateKeyInfo` wrapping a raw X25519 secret:
/// SEQUENCE(46) { INTEGER 0, SEQUENCE(5) { OID 1.3.101.110 },
/// OCTET STRING(34) { OCTET STRING(32) } }.
const PKCS8_PREFIX: [u8; 16] = [
    0x30, 0x2e, 0x02, 0x01, 0x00, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x6e, 0x04, 0x22, 0x04,
    0x20,
];

pub fn encode_public_key_der(key: &PublicKey) -> Vec<u8> {
    let mut out = Vec::with_capacity(SPKI_PREFIX.len() + 32);
    out.extend_from_slice(&SPKI_PREFIX);
    out.extend_from_slice(key.as_bytes());
    out
}

pub fn decode_public_key_der(der: &[u8]) -> IdentityResult<PublicKey> {
    if der.len() != SPKI_PREFIX.len() + 32 || der[..SPKI_PREFIX.len()] != SPKI_PREFIX {
        return Err(invalid_key(format!(
            "expected an X25519 SubjectPublicKeyInfo, got {} bytes",
            der.len()
        )));
    }
    let mut raw = [0u8; 32];
    raw.copy_from_slice(&der[SPKI_PREFIX.len()..]);
    Ok(PublicKey::from(raw))
}

pub fn encode_secret_key_der(secret: &StaticSecret) -> Vec<u8> {
    let mut out = Vec::with_capacity(PKCS8_PREFIX.len() + 32);
    out.extend_from_slice(&PKCS8_PREFIX);
    out.extend_from_slice(&secret.to_bytes());
    out
}

pub fn decode_secret_key_der(der: &[u8]) -> IdentityResult<StaticSecret> {
    if der.len() != PKCS8_PREFIX.len() + 32 || der[..PKCS8_PREFIX.len()] != PKCS8_PREFIX {
        return Err(invalid_key(format!(
            "expected an X25519 PKCS#8 private key, got {} bytes",
            der.len()
        )));
    }
    let mut raw = [0u8; 32];
    raw.copy_from_slice(&der[PKCS8_PREFIX.len()..]);
    Ok(StaticSecret::from(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn public_key_round_trips_through_der() {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);

        let der = encode_public_key_der(&public);
        assert_eq!(der.len(), 44);
        let decoded = decode_public_key_der(&der).unwrap();
        assert_eq!(decoded.as_bytes(), public.as_bytes());
    }

    #[test]
    fn secret_key_round_trips_through_der() {
        let secret = StaticSecret::random_from_rng(OsRng);

        let der = encode_secret_key_der(&secret);
        assert_eq!(der.len(), 48);
        let decoded = decode_secret_key_der(&der).unwrap();
        assert_eq!(decoded.to_bytes(), secret.to_bytes());
    }

    #[test]
    fn decode_rejects_foreign_der() {
        let err = decode_public_key_der(&[0u8; 44]).unwrap_err();
        assert_eq!(err.code_str(), "identity/invalid-key");

        match decode_secret_key_der(b"not a key") {
            Err(err) => assert_eq!(err.code_str(), "identity/invalid-key"),
            Ok(_) => panic!("expected decode_secret_key_der to reject foreign DER"),
        }
    }
}
