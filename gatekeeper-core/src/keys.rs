//! Handshake key material.
//!
//! X25519 key agreement with a fresh ephemeral server keypair per session,
//! followed by HKDF-SHA256 with a fixed application label. The handshake id
//! is the HKDF salt, so no two sessions share a derivation context.
//!
//! # Security Properties
//!
//! - Server secrets are ephemeral, consumed by the single agreement, never serialized
//! - Shared secrets and session keys are zeroized on drop
//! - Low-order client points are rejected before a session is created
//! - The server keeps only a truncated hash of a released key

use std::fmt;

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::Zeroizing;

use crate::error::GateError;

/// X25519 public value and session key length.
pub const KEY_LEN: usize = 32;

/// Session key size in bits, as reported to the oracle.
pub const KEY_BITS: u32 = (KEY_LEN * 8) as u32;

/// Handshake id length in bytes.
pub const HANDSHAKE_ID_LEN: usize = 16;

/// HKDF info label for session keys.
pub const SESSION_KEY_LABEL: &[u8] = b"gatekeeper/session-key/v1";

/// HMAC label for the client's key-confirmation signature.
pub const CONFIRM_LABEL: &[u8] = b"gatekeeper/confirm/v1";

/// Opaque, unguessable handshake identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandshakeId([u8; HANDSHAKE_ID_LEN]);

impl HandshakeId {
    /// Fresh random id from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; HANDSHAKE_ID_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap raw id bytes.
    pub fn from_bytes(bytes: [u8; HANDSHAKE_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse the hex form.
    pub fn from_hex(s: &str) -> Result<Self, GateError> {
        let raw = hex::decode(s).map_err(|_| GateError::SessionNotFound)?;
        let bytes: [u8; HANDSHAKE_ID_LEN] =
            raw.try_into().map_err(|_| GateError::SessionNotFound)?;
        Ok(Self(bytes))
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; HANDSHAKE_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for HandshakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for HandshakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandshakeId({})", self)
    }
}

impl Serialize for HandshakeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HandshakeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Parse and vet a client public value.
///
/// # Errors
///
/// [`GateError::InvalidKeyMaterial`] when the value is not 32 bytes or is a
/// low-order point (agreement with it would not be contributory).
pub fn parse_public_key(bytes: &[u8]) -> Result<PublicKey, GateError> {
    let raw: [u8; KEY_LEN] = bytes
        .try_into()
        .map_err(|_| GateError::InvalidKeyMaterial)?;
    let public = PublicKey::from(raw);

    // Low-order points give an all-zero output for every clamped scalar,
    // so one exchange with a throwaway secret is enough.
    let scratch = EphemeralSecret::random_from_rng(OsRng);
    if !scratch.diffie_hellman(&public).was_contributory() {
        return Err(GateError::InvalidKeyMaterial);
    }
    Ok(public)
}

/// Ephemeral server keypair for one handshake.
pub struct ServerKeypair {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl ServerKeypair {
    /// Generate a new keypair from the OS CSPRNG.
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Public half.
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Split into the secret (consumed by agreement) and the public value.
    pub fn into_parts(self) -> (EphemeralSecret, PublicKey) {
        (self.secret, self.public)
    }
}

/// Symmetric session key. Not `Clone`; zeroized on drop.
pub struct SessionKey(Zeroizing<[u8; KEY_LEN]>);

impl SessionKey {
    /// Wrap raw key bytes (client side, after receiving the released key).
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// First 8 bytes of SHA-256(key) as hex. Safe to log and to retain.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_slice());
        hex::encode(&digest[..8])
    }

    /// Key-confirmation signature: HMAC-SHA256(key, label || handshake id).
    pub fn confirmation_tag(&self, id: &HandshakeId) -> Result<[u8; KEY_LEN], GateError> {
        let mac = self.confirmation_mac(id)?;
        let mut tag = [0u8; KEY_LEN];
        tag.copy_from_slice(&mac.finalize().into_bytes());
        Ok(tag)
    }

    /// Constant-time check of a client's confirmation signature.
    pub fn verify_confirmation(&self, id: &HandshakeId, tag: &[u8]) -> bool {
        match self.confirmation_mac(id) {
            Ok(mac) => mac.verify_slice(tag).is_ok(),
            Err(_) => false,
        }
    }

    fn confirmation_mac(&self, id: &HandshakeId) -> Result<Hmac<Sha256>, GateError> {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(self.0.as_slice())
            .map_err(|_| GateError::InternalError)?;
        mac.update(CONFIRM_LABEL);
        mac.update(id.as_bytes());
        Ok(mac)
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey({})", self.fingerprint())
    }
}

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        // no early exit
        self.0
            .iter()
            .zip(other.0.iter())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
    }
}

impl Eq for SessionKey {}

/// Run the agreement and derive the session key.
///
/// Used by both sides: the server passes its ephemeral secret and the client
/// public value; a client passes its own secret and the server public value.
/// `client_public`/`server_public` are always given in protocol order.
///
/// # Errors
///
/// [`GateError::InvalidKeyMaterial`] for a non-contributory exchange.
pub fn agree_and_derive(
    secret: EphemeralSecret,
    peer: &PublicKey,
    id: &HandshakeId,
    client_public: &[u8; KEY_LEN],
    server_public: &[u8; KEY_LEN],
) -> Result<SessionKey, GateError> {
    let shared = secret.diffie_hellman(peer);
    if !shared.was_contributory() {
        return Err(GateError::InvalidKeyMaterial);
    }
    derive_session_key(shared.as_bytes(), id, client_public, server_public)
}

/// HKDF-SHA256(ikm = shared secret, salt = handshake id,
/// info = label || client public || server public).
pub fn derive_session_key(
    shared: &[u8; KEY_LEN],
    id: &HandshakeId,
    client_public: &[u8; KEY_LEN],
    server_public: &[u8; KEY_LEN],
) -> Result<SessionKey, GateError> {
    let hk = Hkdf::<Sha256>::new(Some(id.as_bytes()), shared);
    let mut info = Vec::with_capacity(SESSION_KEY_LABEL.len() + 2 * KEY_LEN);
    info.extend_from_slice(SESSION_KEY_LABEL);
    info.extend_from_slice(client_public);
    info.extend_from_slice(server_public);

    let mut okm = Zeroizing::new([0u8; KEY_LEN]);
    hk.expand(&info, okm.as_mut())
        .map_err(|_| GateError::InternalError)?;
    Ok(SessionKey(okm))
}
