//! Session management for the server edge: HMAC-signed, self-describing
//! session tokens plus the in-memory session table used for idle
//! eviction and reconnect.
//!
//! Ref (architecture): the pack's session managers keep connection state
//! in a map owned by a manager type that a cleanup task periodically
//! sweeps (`SeleniaProject-Nyx`'s `SessionManager::cleanup_loop`); the
//! constant-time signature comparison follows the same discipline as
//! `frecar-beam`'s hand-rolled comparator, here provided by the `hmac`
//! crate's built-in `verify_slice`.

use hmac::{Hmac, Mac};
use msweep_world::PlayerId;
use rand::RngCore;
use sha2::Sha256;
use std::collections::HashMap;
use std::time::{Duration, Instant};

type HmacSha256 = Hmac<Sha256>;

/// 128-bit random hex string. Ref: spec §3 Session, §4.2.
pub type SessionId = String;

/// Absolute session lifetime regardless of activity. Ref: spec §3
/// Session, "expired after 24 h absolute or 30 s idle, whichever first".
const ABSOLUTE_SESSION_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session token is malformed")]
    MalformedToken,
    #[error("session token signature is invalid")]
    BadSignature,
    #[error("session is not known to this server")]
    UnknownSession,
    #[error("session has been idle too long and was evicted")]
    Expired,
}

/// In-memory record for one live (or recently disconnected) session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub id: SessionId,
    pub player_id: PlayerId,
    pub username: String,
    pub connected: bool,
    created_at: Instant,
    last_seen: Instant,
}

/// Issues and verifies bearer tokens, and owns the session table plus
/// idle-eviction sweep. Ref: spec §4.2, §5 (sweeper task re-enters the
/// pipeline under the world lock).
pub struct SessionManager {
    secret: [u8; 32],
    idle_timeout: Duration,
    sessions: HashMap<SessionId, SessionRecord>,
    by_player: HashMap<PlayerId, SessionId>,
}

impl SessionManager {
    pub fn new(secret: [u8; 32], idle_timeout: Duration) -> Self {
        Self {
            secret,
            idle_timeout,
            sessions: HashMap::new(),
            by_player: HashMap::new(),
        }
    }

    /// Register a freshly connected player and issue a signed token for
    /// it. `created_at_unix_ms` is supplied by the caller so this type
    /// never reads the wall clock itself.
    pub fn create_session(
        &mut self,
        player_id: PlayerId,
        username: &str,
        created_at_unix_ms: u64,
        now: Instant,
    ) -> (SessionId, String) {
        let session_id = generate_session_id();

        let token = issue_token(&self.secret, &session_id, player_id, username, created_at_unix_ms);

        self.sessions.insert(
            session_id.clone(),
            SessionRecord {
                id: session_id.clone(),
                player_id,
                username: username.to_string(),
                connected: true,
                created_at: now,
                last_seen: now,
            },
        );
        self.by_player.insert(player_id, session_id.clone());

        (session_id, token)
    }

    /// Verify a bearer token and, if it still names a live, unexpired
    /// session, mark it reconnected and return its record.
    pub fn resume(&mut self, token: &str, now: Instant) -> Result<&SessionRecord, SessionError> {
        let payload = verify_token(&self.secret, token)?;
        let expired = {
            let record = self
                .sessions
                .get(&payload.session_id)
                .ok_or(SessionError::UnknownSession)?;
            now.duration_since(record.created_at) > ABSOLUTE_SESSION_LIFETIME
        };
        if expired {
            let player_id = self.sessions.get(&payload.session_id).unwrap().player_id;
            self.sessions.remove(&payload.session_id);
            self.by_player.remove(&player_id);
            return Err(SessionError::Expired);
        }
        let record = self
            .sessions
            .get_mut(&payload.session_id)
            .ok_or(SessionError::UnknownSession)?;
        record.connected = true;
        record.last_seen = now;
        Ok(record)
    }

    pub fn touch(&mut self, session_id: &SessionId, now: Instant) {
        if let Some(record) = self.sessions.get_mut(session_id) {
            record.last_seen = now;
        }
    }

    pub fn session(&self, session_id: &SessionId) -> Option<&SessionRecord> {
        self.sessions.get(session_id)
    }

    pub fn session_for_player(&self, player_id: PlayerId) -> Option<&SessionRecord> {
        self.by_player
            .get(&player_id)
            .and_then(|id| self.sessions.get(id))
    }

    /// Mark a session disconnected without evicting it; it remains
    /// eligible for `resume` until the idle sweeper removes it.
    pub fn disconnect(&mut self, session_id: &SessionId, now: Instant) {
        if let Some(record) = self.sessions.get_mut(session_id) {
            record.connected = false;
            record.last_seen = now;
        }
    }

    /// Remove every session idle for longer than the configured timeout
    /// or past its 24 h absolute lifetime, returning the evicted players
    /// so the caller can remove them from the world and forget their
    /// security bookkeeping.
    pub fn sweep_idle(&mut self, now: Instant) -> Vec<PlayerId> {
        let idle_timeout = self.idle_timeout;
        let expired: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| {
                now.duration_since(s.last_seen) > idle_timeout
                    || now.duration_since(s.created_at) > ABSOLUTE_SESSION_LIFETIME
            })
            .map(|s| s.id.clone())
            .collect();

        let mut evicted_players = Vec::with_capacity(expired.len());
        for session_id in expired {
            if let Some(record) = self.sessions.remove(&session_id) {
                self.by_player.remove(&record.player_id);
                evicted_players.push(record.player_id);
            }
        }
        evicted_players
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

fn generate_session_id() -> SessionId {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

struct TokenPayload {
    session_id: SessionId,
    player_id: PlayerId,
}

fn encode_payload(session_id: &str, player_id: PlayerId, username: &str, created_at_unix_ms: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + session_id.len() + 8 + 4 + username.len() + 8);
    buf.extend_from_slice(&(session_id.len() as u32).to_le_bytes());
    buf.extend_from_slice(session_id.as_bytes());
    buf.extend_from_slice(&player_id.to_le_bytes());
    buf.extend_from_slice(&(username.len() as u32).to_le_bytes());
    buf.extend_from_slice(username.as_bytes());
    buf.extend_from_slice(&created_at_unix_ms.to_le_bytes());
    buf
}

fn issue_token(secret: &[u8; 32], session_id: &str, player_id: PlayerId, username: &str, created_at_unix_ms: u64) -> String {
    let payload = encode_payload(session_id, player_id, username, created_at_unix_ms);
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(&payload);
    let signature = mac.finalize().into_bytes();

    format!("{}.{}", hex::encode(&payload), hex::encode(signature))
}

fn verify_token(secret: &[u8; 32], token: &str) -> Result<TokenPayload, SessionError> {
    let (payload_hex, sig_hex) = token.split_once('.').ok_or(SessionError::MalformedToken)?;
    let payload = hex::decode(payload_hex).map_err(|_| SessionError::MalformedToken)?;
    let signature = hex::decode(sig_hex).map_err(|_| SessionError::MalformedToken)?;

    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(&payload);
    mac.verify_slice(&signature)
        .map_err(|_| SessionError::BadSignature)?;

    if payload.len() < 4 {
        return Err(SessionError::MalformedToken);
    }
    let id_len = u32::from_le_bytes(payload[0..4].try_into().unwrap()) as usize;
    let id_start: usize = 4;
    let id_end = id_start.checked_add(id_len).ok_or(SessionError::MalformedToken)?;
    if payload.len() < id_end + 8 {
        return Err(SessionError::MalformedToken);
    }
    let session_id = String::from_utf8(payload[id_start..id_end].to_vec()).map_err(|_| SessionError::MalformedToken)?;
    let player_id = PlayerId::from_le_bytes(payload[id_end..id_end + 8].try_into().unwrap());

    Ok(TokenPayload {
        session_id,
        player_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        SessionManager::new([7u8; 32], Duration::from_secs(300))
    }

    #[test]
    fn issued_token_resumes_to_the_same_session() {
        let mut mgr = manager();
        let now = Instant::now();
        let (session_id, token) = mgr.create_session(1, "alice", 1_000, now);
        let resumed = mgr.resume(&token, now + Duration::from_secs(1)).unwrap();
        assert_eq!(resumed.id, session_id);
        assert_eq!(resumed.player_id, 1);
    }

    #[test]
    fn session_ids_are_not_sequential() {
        let mut mgr = manager();
        let now = Instant::now();
        let (id_a, _) = mgr.create_session(1, "alice", 0, now);
        let (id_b, _) = mgr.create_session(2, "bob", 0, now);
        assert_ne!(id_a, id_b);
        assert_eq!(id_a.len(), 32, "16 random bytes hex-encoded");
    }

    #[test]
    fn tampered_token_is_rejected() {
        let mut mgr = manager();
        let now = Instant::now();
        let (_, token) = mgr.create_session(1, "alice", 1_000, now);
        let mut tampered = token.clone();
        tampered.push('0');
        assert_eq!(mgr.resume(&tampered, now), Err(SessionError::BadSignature));
    }

    #[test]
    fn token_signed_by_a_different_secret_is_rejected() {
        let mut mgr_a = SessionManager::new([1u8; 32], Duration::from_secs(300));
        let mut mgr_b = SessionManager::new([2u8; 32], Duration::from_secs(300));
        let now = Instant::now();
        let (_, token) = mgr_a.create_session(1, "alice", 1_000, now);
        assert_eq!(mgr_b.resume(&token, now), Err(SessionError::BadSignature));
    }

    #[test]
    fn idle_sweep_evicts_past_timeout() {
        let mut mgr = SessionManager::new([9u8; 32], Duration::from_secs(10));
        let t0 = Instant::now();
        mgr.create_session(1, "bob", 0, t0);
        let evicted = mgr.sweep_idle(t0 + Duration::from_secs(5));
        assert!(evicted.is_empty());
        let evicted = mgr.sweep_idle(t0 + Duration::from_secs(11));
        assert_eq!(evicted, vec![1]);
        assert_eq!(mgr.session_count(), 0);
    }

    #[test]
    fn absolute_lifetime_evicts_even_when_active() {
        let mut mgr = SessionManager::new([3u8; 32], Duration::from_secs(3600));
        let t0 = Instant::now();
        mgr.create_session(1, "carl", 0, t0);
        let past_absolute_lifetime = t0 + ABSOLUTE_SESSION_LIFETIME + Duration::from_secs(1);
        let evicted = mgr.sweep_idle(past_absolute_lifetime);
        assert_eq!(evicted, vec![1]);
    }
}
