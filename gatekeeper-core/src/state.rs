//! Handshake session state machine.
//!
//! States: INIT → PENDING → VALIDATING → VALIDATED | FAILED
//!                 PENDING → EXPIRED
//!
//! A session leaves PENDING exactly once. The ephemeral server secret moves
//! out of the session on the claim, so a second derivation cannot happen.
//! Terminal states never change again.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use x25519_dalek::{EphemeralSecret, PublicKey};

use crate::error::GateError;
use crate::keys::{self, HandshakeId, ServerKeypair, SessionKey, KEY_LEN};

/// Default handshake lifetime.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Handshake state enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HandshakeState {
    /// Created, server keypair not yet bound.
    Init,
    /// Waiting for validation.
    Pending,
    /// Claimed by exactly one validation call.
    Validating,
    /// Session key released. Final state.
    Validated,
    /// Validation rejected or errored. Final state.
    Failed,
    /// Lifetime elapsed while pending. Final state.
    Expired,
}

impl HandshakeState {
    /// VALIDATED, FAILED and EXPIRED never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Validated | Self::Failed | Self::Expired)
    }
}

/// One handshake session as held by the server.
pub struct HandshakeSession {
    id: HandshakeId,
    state: HandshakeState,
    client_public: PublicKey,
    server_public: PublicKey,
    server_secret: Option<EphemeralSecret>,
    created_at: Instant,
    expires_at: Instant,
    finished_at: Option<Instant>,
    validate_attempts: u32,
    key_fingerprint: Option<String>,
}

impl HandshakeSession {
    /// Vet the client public value and bind a fresh server keypair.
    ///
    /// # Errors
    ///
    /// [`GateError::InvalidKeyMaterial`] for a malformed or low-order point.
    pub fn open(client_public: &[u8], ttl: Duration, now: Instant) -> Result<Self, GateError> {
        let client_public = keys::parse_public_key(client_public)?;
        let (server_secret, server_public) = ServerKeypair::generate().into_parts();
        let mut session = Self {
            id: HandshakeId::generate(),
            state: HandshakeState::Init,
            client_public,
            server_public,
            server_secret: Some(server_secret),
            created_at: now,
            expires_at: now + ttl,
            finished_at: None,
            validate_attempts: 0,
            key_fingerprint: None,
        };
        session.state = HandshakeState::Pending;
        Ok(session)
    }

    /// Session id.
    pub fn id(&self) -> HandshakeId {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Client public value.
    pub fn client_public(&self) -> [u8; KEY_LEN] {
        self.client_public.to_bytes()
    }

    /// Server public value.
    pub fn server_public(&self) -> [u8; KEY_LEN] {
        self.server_public.to_bytes()
    }

    /// Creation time.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Deadline for validation.
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// When the session reached a terminal state.
    pub fn finished_at(&self) -> Option<Instant> {
        self.finished_at
    }

    /// Validation calls seen so far, including rejected ones.
    pub fn validate_attempts(&self) -> u32 {
        self.validate_attempts
    }

    /// Fingerprint of the released key, once validated.
    pub fn key_fingerprint(&self) -> Option<&str> {
        self.key_fingerprint.as_deref()
    }

    /// Expire a PENDING session whose deadline has passed.
    ///
    /// Returns true when the session is EXPIRED after the call.
    pub fn check_expiry(&mut self, now: Instant) -> bool {
        if self.state == HandshakeState::Pending && now >= self.expires_at {
            self.finish(HandshakeState::Expired, now);
        }
        self.state == HandshakeState::Expired
    }

    /// Move PENDING → VALIDATING and hand out the key material.
    ///
    /// Counts the attempt even when it is rejected.
    ///
    /// # Errors
    ///
    /// - [`GateError::SessionExpired`] when the deadline passed
    /// - [`GateError::InvalidSessionState`] for any other non-PENDING state
    pub fn claim(&mut self, now: Instant) -> Result<Claim, GateError> {
        self.validate_attempts = self.validate_attempts.saturating_add(1);
        if self.check_expiry(now) {
            return Err(GateError::SessionExpired);
        }
        if self.state != HandshakeState::Pending {
            return Err(GateError::InvalidSessionState);
        }
        let secret = self
            .server_secret
            .take()
            .ok_or(GateError::InternalError)?;
        self.state = HandshakeState::Validating;
        Ok(Claim {
            id: self.id,
            secret,
            client_public: self.client_public,
            server_public: self.server_public,
            elapsed: now.saturating_duration_since(self.created_at),
        })
    }

    /// VALIDATING → VALIDATED. Only the key fingerprint is retained.
    pub fn complete(&mut self, key: &SessionKey, now: Instant) -> Result<(), GateError> {
        if self.state != HandshakeState::Validating {
            return Err(GateError::InvalidSessionState);
        }
        self.key_fingerprint = Some(key.fingerprint());
        self.finish(HandshakeState::Validated, now);
        Ok(())
    }

    /// Any non-terminal state → FAILED.
    pub fn fail(&mut self, now: Instant) {
        if !self.state.is_terminal() {
            self.finish(HandshakeState::Failed, now);
        }
    }

    fn finish(&mut self, state: HandshakeState, now: Instant) {
        // EphemeralSecret zeroizes on drop
        self.server_secret = None;
        self.state = state;
        self.finished_at = Some(now);
    }
}

/// Key material handed to the single winning validation call.
pub struct Claim {
    /// Session id.
    pub id: HandshakeId,
    secret: EphemeralSecret,
    client_public: PublicKey,
    server_public: PublicKey,
    /// Time between init and this claim.
    pub elapsed: Duration,
}

impl Claim {
    /// Client public value.
    pub fn client_public(&self) -> [u8; KEY_LEN] {
        self.client_public.to_bytes()
    }

    /// Server public value.
    pub fn server_public(&self) -> [u8; KEY_LEN] {
        self.server_public.to_bytes()
    }

    /// Consume the server secret and derive the session key.
    pub fn derive(self) -> Result<SessionKey, GateError> {
        let client = self.client_public.to_bytes();
        let server = self.server_public.to_bytes();
        keys::agree_and_derive(self.secret, &self.client_public, &self.id, &client, &server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn client_public() -> [u8; KEY_LEN] {
        PublicKey::from(&EphemeralSecret::random_from_rng(OsRng)).to_bytes()
    }

    #[test]
    fn test_open_is_pending() {
        let now = Instant::now();
        let session = HandshakeSession::open(&client_public(), HANDSHAKE_TIMEOUT, now).unwrap();
        assert_eq!(session.state(), HandshakeState::Pending);
        assert_eq!(session.expires_at(), now + HANDSHAKE_TIMEOUT);
        assert_eq!(session.validate_attempts(), 0);
    }

    #[test]
    fn test_open_rejects_bad_key() {
        let res = HandshakeSession::open(&[0u8; 12], HANDSHAKE_TIMEOUT, Instant::now());
        assert_eq!(res.err(), Some(GateError::InvalidKeyMaterial));
    }

    #[test]
    fn test_full_validation() {
        let now = Instant::now();
        let mut session = HandshakeSession::open(&client_public(), HANDSHAKE_TIMEOUT, now).unwrap();
        let claim = session.claim(now + Duration::from_millis(40)).unwrap();
        assert_eq!(claim.elapsed, Duration::from_millis(40));
        assert_eq!(session.state(), HandshakeState::Validating);

        let key = claim.derive().unwrap();
        session.complete(&key, now).unwrap();
        assert_eq!(session.state(), HandshakeState::Validated);
        assert_eq!(session.key_fingerprint(), Some(key.fingerprint().as_str()));
    }

    #[test]
    fn test_second_claim_rejected() {
        let now = Instant::now();
        let mut session = HandshakeSession::open(&client_public(), HANDSHAKE_TIMEOUT, now).unwrap();
        let _claim = session.claim(now).unwrap();
        assert_eq!(session.claim(now).err(), Some(GateError::InvalidSessionState));
        assert_eq!(session.validate_attempts(), 2);
    }

    #[test]
    fn test_claim_after_deadline_expires() {
        let now = Instant::now();
        let mut session =
            HandshakeSession::open(&client_public(), Duration::from_secs(1), now).unwrap();
        let late = now + Duration::from_secs(1);
        assert_eq!(session.claim(late).err(), Some(GateError::SessionExpired));
        assert_eq!(session.state(), HandshakeState::Expired);
        assert_eq!(session.finished_at(), Some(late));
        // stays expired
        assert_eq!(session.claim(late).err(), Some(GateError::SessionExpired));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let now = Instant::now();
        let mut session = HandshakeSession::open(&client_public(), HANDSHAKE_TIMEOUT, now).unwrap();
        let claim = session.claim(now).unwrap();
        session.fail(now);
        assert_eq!(session.state(), HandshakeState::Failed);

        let key = claim.derive().unwrap();
        assert_eq!(
            session.complete(&key, now).err(),
            Some(GateError::InvalidSessionState)
        );
        assert!(!session.check_expiry(now + Duration::from_secs(3600)));
        assert_eq!(session.state(), HandshakeState::Failed);
    }

    #[test]
    fn test_client_derives_same_key() {
        let now = Instant::now();
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret).to_bytes();
        let mut session = HandshakeSession::open(&public, HANDSHAKE_TIMEOUT, now).unwrap();
        let server_public = session.server_public();
        let id = session.id();

        let server_key = session.claim(now).unwrap().derive().unwrap();
        let client_key = keys::agree_and_derive(
            secret,
            &PublicKey::from(server_public),
            &id,
            &public,
            &server_public,
        )
        .unwrap();
        assert_eq!(server_key, client_key);
    }
}
