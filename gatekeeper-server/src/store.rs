//! Handshake session table.
//!
//! Every state transition runs under the shard lock of its entry, so the
//! PENDING → VALIDATING claim is a check-and-set: of two concurrent
//! validations exactly one wins, the other sees `InvalidSessionState`.
//! No lock is held across the oracle call.
//!
//! Purged sessions leave a tombstone for another `ttl + retention`, so a
//! late replay still sees its state error rather than `SessionNotFound`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use gatekeeper_core::keys::KEY_LEN;
use gatekeeper_core::state::Claim;
use gatekeeper_core::{GateError, HandshakeId, HandshakeSession, HandshakeState, SessionKey};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Result of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// PENDING sessions moved to EXPIRED.
    pub expired: usize,
    /// Claims abandoned mid-validation, moved to FAILED.
    pub abandoned: usize,
    /// Terminal sessions removed.
    pub purged: usize,
}

/// Keyed store of handshake sessions.
pub struct SessionStore {
    sessions: DashMap<HandshakeId, HandshakeSession>,
    tombstones: DashMap<HandshakeId, (HandshakeState, Instant)>,
    ttl: Duration,
    retention: Duration,
}

impl SessionStore {
    /// Empty store.
    pub fn new(ttl: Duration, retention: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            tombstones: DashMap::new(),
            ttl,
            retention,
        }
    }

    /// Handshake lifetime for new sessions.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Open a session for `client_public` and insert it.
    ///
    /// Returns the new id and the server public value.
    pub fn open(
        &self,
        client_public: &[u8],
        now: Instant,
    ) -> Result<(HandshakeId, [u8; KEY_LEN]), GateError> {
        let session = HandshakeSession::open(client_public, self.ttl, now)?;
        let id = session.id();
        let server_public = session.server_public();
        match self.sessions.entry(id) {
            // never overwrite a live session
            Entry::Occupied(_) => Err(GateError::InternalError),
            Entry::Vacant(slot) => {
                slot.insert(session);
                Ok((id, server_public))
            }
        }
    }

    /// Atomically claim a PENDING session for validation.
    pub fn claim(&self, id: &HandshakeId, now: Instant) -> Result<Claim, GateError> {
        let Some(mut session) = self.sessions.get_mut(id) else {
            return Err(self.missing(id));
        };
        session.claim(now)
    }

    /// VALIDATING → VALIDATED.
    pub fn complete(&self, id: &HandshakeId, key: &SessionKey, now: Instant) -> Result<(), GateError> {
        let Some(mut session) = self.sessions.get_mut(id) else {
            return Err(self.missing(id));
        };
        session.complete(key, now)
    }

    /// Any non-terminal state → FAILED.
    pub fn fail(&self, id: &HandshakeId, now: Instant) {
        if let Some(mut session) = self.sessions.get_mut(id) {
            session.fail(now);
        }
    }

    /// Current state, after a lazy expiry check.
    pub fn state(&self, id: &HandshakeId, now: Instant) -> Option<HandshakeState> {
        let Some(mut session) = self.sessions.get_mut(id) else {
            return self.tombstones.get(id).map(|t| t.0);
        };
        session.check_expiry(now);
        Some(session.state())
    }

    /// Error for an id with no live session.
    fn missing(&self, id: &HandshakeId) -> GateError {
        match self.tombstones.get(id).map(|t| t.0) {
            Some(HandshakeState::Expired) => GateError::SessionExpired,
            Some(_) => GateError::InvalidSessionState,
            None => GateError::SessionNotFound,
        }
    }

    /// Fingerprint of the released key, for VALIDATED sessions.
    pub fn key_fingerprint(&self, id: &HandshakeId) -> Option<String> {
        self.sessions
            .get(id)
            .and_then(|s| s.key_fingerprint().map(str::to_string))
    }

    /// Sessions currently held.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Expire stale PENDING sessions, fail abandoned claims and purge
    /// terminal sessions older than the retention window.
    pub fn sweep(&self, now: Instant) -> SweepStats {
        let mut stats = SweepStats::default();
        let retention = self.retention;
        self.sessions.retain(|id, session| {
            let was_pending = session.state() == HandshakeState::Pending;
            if was_pending && session.check_expiry(now) {
                stats.expired += 1;
            }
            if session.state() == HandshakeState::Validating
                && now >= session.expires_at() + retention
            {
                session.fail(now);
                stats.abandoned += 1;
            }
            let keep = match session.finished_at() {
                Some(done) if session.state().is_terminal() => {
                    now.saturating_duration_since(done) < retention
                }
                _ => true,
            };
            if !keep {
                self.tombstones.insert(*id, (session.state(), now));
                stats.purged += 1;
            }
            keep
        });
        let window = self.ttl + retention;
        self.tombstones
            .retain(|_, (_, purged_at)| now.saturating_duration_since(*purged_at) < window);
        stats
    }

    /// Run [`SessionStore::sweep`] every `period` until the task is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let stats = store.sweep(Instant::now());
                if stats != SweepStats::default() {
                    info!(
                        expired = stats.expired,
                        abandoned = stats.abandoned,
                        purged = stats.purged,
                        remaining = store.len(),
                        "session sweep"
                    );
                } else {
                    debug!(remaining = store.len(), "session sweep");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use x25519_dalek::{EphemeralSecret, PublicKey};

    const TTL: Duration = Duration::from_secs(30);
    const RETENTION: Duration = Duration::from_secs(300);

    fn client_public() -> [u8; 32] {
        PublicKey::from(&EphemeralSecret::random_from_rng(OsRng)).to_bytes()
    }

    #[test]
    fn test_unknown_id() {
        let store = SessionStore::new(TTL, RETENTION);
        let id = HandshakeId::from_bytes([9; 16]);
        assert_eq!(
            store.claim(&id, Instant::now()).err(),
            Some(GateError::SessionNotFound)
        );
    }

    #[test]
    fn test_ids_unique() {
        let store = SessionStore::new(TTL, RETENTION);
        let now = Instant::now();
        let key = client_public();
        let (a, _) = store.open(&key, now).unwrap();
        let (b, _) = store.open(&key, now).unwrap();
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_sweep_expires_then_purges() {
        let store = SessionStore::new(TTL, RETENTION);
        let t0 = Instant::now();
        let (id, _) = store.open(&client_public(), t0).unwrap();

        let stats = store.sweep(t0 + TTL);
        assert_eq!(stats.expired, 1);
        assert_eq!(store.state(&id, t0 + TTL), Some(HandshakeState::Expired));
        assert_eq!(
            store.claim(&id, t0 + TTL).err(),
            Some(GateError::SessionExpired)
        );

        let purged_at = t0 + TTL + RETENTION;
        let stats = store.sweep(purged_at);
        assert_eq!(stats.purged, 1);
        assert!(store.is_empty());
        assert_eq!(
            store.claim(&id, purged_at).err(),
            Some(GateError::SessionExpired)
        );

        let forgotten_at = purged_at + TTL + RETENTION;
        store.sweep(forgotten_at);
        assert_eq!(
            store.claim(&id, forgotten_at).err(),
            Some(GateError::SessionNotFound)
        );
    }

    #[test]
    fn test_replay_after_purge_is_state_error() {
        let store = SessionStore::new(TTL, RETENTION);
        let t0 = Instant::now();
        let (id, _) = store.open(&client_public(), t0).unwrap();
        let key = store.claim(&id, t0).unwrap().derive().unwrap();
        store.complete(&id, &key, t0).unwrap();

        let stats = store.sweep(t0 + RETENTION);
        assert_eq!(stats.purged, 1);
        assert_eq!(
            store.claim(&id, t0 + RETENTION).err(),
            Some(GateError::InvalidSessionState)
        );
        assert_eq!(
            store.state(&id, t0 + RETENTION),
            Some(HandshakeState::Validated)
        );
    }

    #[test]
    fn test_sweep_keeps_live_sessions() {
        let store = SessionStore::new(TTL, RETENTION);
        let t0 = Instant::now();
        let (id, _) = store.open(&client_public(), t0).unwrap();
        assert_eq!(store.sweep(t0 + Duration::from_secs(1)), SweepStats::default());
        assert_eq!(store.state(&id, t0), Some(HandshakeState::Pending));
    }

    #[test]
    fn test_abandoned_claim_fails() {
        let store = SessionStore::new(TTL, RETENTION);
        let t0 = Instant::now();
        let (id, _) = store.open(&client_public(), t0).unwrap();
        let _claim = store.claim(&id, t0).unwrap();

        let stats = store.sweep(t0 + TTL + RETENTION);
        assert_eq!(stats.abandoned, 1);
        assert_eq!(stats.purged, 0);
        assert_eq!(store.state(&id, t0), Some(HandshakeState::Failed));
    }

    #[test]
    fn test_concurrent_claims_single_winner() {
        let store = Arc::new(SessionStore::new(TTL, RETENTION));
        let (id, _) = store.open(&client_public(), Instant::now()).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.claim(&id, Instant::now()).is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(store.state(&id, Instant::now()), Some(HandshakeState::Validating));
    }
}
