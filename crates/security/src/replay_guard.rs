//! Replay, duplicate, and sequence-sanity detection.
//!
//! Every admitted action is content-hashed over player-id, action kind,
//! argument payload, and a second-granularity timestamp (spec §3 Action
//! record), and the record is retained for 5 min. Three independent
//! checks run against that retained history on every new action. Ref:
//! spec §4.4.
//!
//! Timestamps here are whole seconds, matching the action record's
//! stated hash granularity; the spec's "within the last 100 ms" replay
//! window therefore collapses to "an identical hash in the same second"
//! at this resolution (see DESIGN.md).

use crate::ActionKind;
use msweep_world::PlayerId;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};

/// How long an action record is retained for replay/duplicate/sequence
/// lookups. Ref: spec §4.4.
const RETENTION_SECS: u64 = 5 * 60;
/// Default window for duplicate (kind, payload) detection. Ref: spec §4.4.
const DEFAULT_DUPLICATE_WINDOW_SECS: u64 = 1;
/// Burst threshold: this many actions inside any trailing 1 s span
/// trips sequence sanity. Ref: spec §4.4.
const BURST_THRESHOLD: usize = 10;
/// Consecutive flag/unflag alternations that trip sequence sanity.
/// Ref: spec §4.4.
const ALTERNATION_THRESHOLD: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayError {
    /// An identical content hash was seen within the replay window.
    Replay,
    /// The same (kind, payload) recurred within the duplicate window.
    DuplicateAction,
    /// A burst of actions or a flag/unflag alternation run tripped
    /// sequence sanity.
    SequenceSanity,
}

/// SHA-256 over the player id, action kind, raw argument payload, and
/// second-granularity timestamp. Ref: spec §3 Action record.
pub fn hash_action(player_id: PlayerId, kind: ActionKind, payload: &[u8], second_timestamp: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(player_id.to_le_bytes());
    hasher.update(kind.label().as_bytes());
    hasher.update(payload);
    hasher.update(second_timestamp.to_le_bytes());
    hasher.finalize().into()
}

struct ActionRecord {
    timestamp: u64,
    hash: [u8; 32],
    kind: ActionKind,
    payload: Vec<u8>,
}

#[derive(Default)]
struct PlayerReplayState {
    records: VecDeque<ActionRecord>,
}

pub struct ReplayGuard {
    duplicate_window_secs: u64,
    per_player: HashMap<PlayerId, PlayerReplayState>,
}

impl ReplayGuard {
    pub fn new() -> Self {
        Self::with_duplicate_window(DEFAULT_DUPLICATE_WINDOW_SECS)
    }

    pub fn with_duplicate_window(duplicate_window_secs: u64) -> Self {
        Self {
            duplicate_window_secs,
            per_player: HashMap::new(),
        }
    }

    /// Check `(kind, payload)` arriving at `second_timestamp` against the
    /// player's retained history, recording it if admitted.
    pub fn check_and_record(
        &mut self,
        player_id: PlayerId,
        kind: ActionKind,
        payload: &[u8],
        second_timestamp: u64,
    ) -> Result<(), ReplayError> {
        let state = self.per_player.entry(player_id).or_default();
        state
            .records
            .retain(|r| second_timestamp.saturating_sub(r.timestamp) <= RETENTION_SECS);

        let hash = hash_action(player_id, kind, payload, second_timestamp);

        if state.records.iter().any(|r| r.hash == hash) {
            return Err(ReplayError::Replay);
        }
        if state.records.iter().any(|r| {
            r.kind == kind && r.payload == payload && second_timestamp.saturating_sub(r.timestamp) <= self.duplicate_window_secs
        }) {
            return Err(ReplayError::DuplicateAction);
        }

        let burst_count = state
            .records
            .iter()
            .filter(|r| second_timestamp.saturating_sub(r.timestamp) <= 1)
            .count()
            + 1;
        if burst_count >= BURST_THRESHOLD {
            return Err(ReplayError::SequenceSanity);
        }

        if matches!(kind, ActionKind::Flag | ActionKind::Unflag) {
            let mut recent: Vec<ActionKind> = state
                .records
                .iter()
                .rev()
                .take(ALTERNATION_THRESHOLD - 1)
                .map(|r| r.kind)
                .collect();
            recent.reverse();
            recent.push(kind);
            if recent.len() >= ALTERNATION_THRESHOLD && is_alternating(&recent) {
                return Err(ReplayError::SequenceSanity);
            }
        }

        state.records.push_back(ActionRecord {
            timestamp: second_timestamp,
            hash,
            kind,
            payload: payload.to_vec(),
        });
        Ok(())
    }

    pub fn forget_player(&mut self, player_id: PlayerId) {
        self.per_player.remove(&player_id);
    }
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::new()
    }
}

fn is_alternating(kinds: &[ActionKind]) -> bool {
    kinds.windows(2).all(|w| w[0] != w[1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_identical_hash_as_replay() {
        let mut guard = ReplayGuard::new();
        assert!(guard.check_and_record(1, ActionKind::Move, b"a", 100).is_ok());
        assert_eq!(
            guard.check_and_record(1, ActionKind::Move, b"a", 100),
            Err(ReplayError::Replay)
        );
    }

    #[test]
    fn rejects_same_kind_and_payload_within_duplicate_window() {
        let mut guard = ReplayGuard::new();
        assert!(guard.check_and_record(2, ActionKind::Flag, b"same", 100).is_ok());
        assert_eq!(
            guard.check_and_record(2, ActionKind::Flag, b"same", 101),
            Err(ReplayError::DuplicateAction)
        );
        // Outside the 1 s default duplicate window, it's admitted again.
        assert!(guard.check_and_record(2, ActionKind::Flag, b"same", 103).is_ok());
    }

    #[test]
    fn burst_of_ten_within_a_second_trips_sequence_sanity() {
        let mut guard = ReplayGuard::new();
        for i in 0..9u8 {
            assert!(guard
                .check_and_record(3, ActionKind::Move, &[i], 200)
                .is_ok());
        }
        assert_eq!(
            guard.check_and_record(3, ActionKind::Move, &[9], 200),
            Err(ReplayError::SequenceSanity)
        );
    }

    #[test]
    fn six_flag_unflag_alternations_trip_sequence_sanity() {
        let mut guard = ReplayGuard::new();
        let kinds = [
            ActionKind::Flag,
            ActionKind::Unflag,
            ActionKind::Flag,
            ActionKind::Unflag,
            ActionKind::Flag,
        ];
        for (i, kind) in kinds.iter().enumerate() {
            assert!(guard
                .check_and_record(4, *kind, &[i as u8], (i as u64) * 10)
                .is_ok());
        }
        assert_eq!(
            guard.check_and_record(4, ActionKind::Unflag, &[9], 40),
            Err(ReplayError::SequenceSanity)
        );
    }

    #[test]
    fn players_are_isolated() {
        let mut guard = ReplayGuard::new();
        assert!(guard.check_and_record(1, ActionKind::Move, b"x", 0).is_ok());
        assert!(guard.check_and_record(2, ActionKind::Move, b"x", 0).is_ok());
    }
}
