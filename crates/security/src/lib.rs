//! Minesweeper-MMO Security Guard
//!
//! This crate owns the abuse-resistance layer sitting between the wire
//! decoder and the action pipeline: per-action-kind sliding-window rate
//! limiting, replay/duplicate/sequence-abuse detection via content
//! hashing, and an operator-facing risk dashboard.
//!
//! Ref (architecture): the Flowstate teacher's replay crate records
//! match facts and emits a verification report; this crate repoints the
//! same "record facts, emit a report" shape at recording each player's
//! recent actions for abuse detection instead of match replay.

#![deny(unsafe_code)]

mod rate_limit;
mod replay_guard;

pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use replay_guard::{hash_action, ReplayError, ReplayGuard};

use msweep_wire::{PlayerRiskWire, SecuritySnapshotWire};
use msweep_world::PlayerId;
use std::collections::HashMap;
use std::time::Instant;
use tracing::warn;

/// A player with at least this many strikes is flagged for operator
/// review. Ref: spec §4.4.
const OPERATOR_REVIEW_STRIKE_THRESHOLD: u32 = 3;

/// The kind of gameplay action being admitted, used both for rate
/// limiting buckets and for content hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Move,
    Flip,
    Flag,
    Unflag,
}

impl ActionKind {
    const ALL: [ActionKind; 4] = [
        ActionKind::Move,
        ActionKind::Flip,
        ActionKind::Flag,
        ActionKind::Unflag,
    ];

    fn label(self) -> &'static str {
        match self {
            ActionKind::Move => "move",
            ActionKind::Flip => "flip",
            ActionKind::Flag => "flag",
            ActionKind::Unflag => "unflag",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SecurityRejection {
    #[error("rate limit exceeded for {0:?}")]
    RateLimited(ActionKind),
    #[error("identical action replayed")]
    Replay,
    #[error("duplicate action content")]
    DuplicateAction,
    #[error("action burst or flag/unflag alternation tripped sequence sanity")]
    SequenceSanity,
}

/// Per-player abuse bookkeeping: strikes accrued from rejected actions,
/// used to compute a coarse operator-facing risk score.
#[derive(Debug, Default, Clone, Copy)]
struct PlayerStrikes {
    strikes: u32,
}

/// Aggregates rate limiting, replay detection, and risk scoring for
/// every connected player. Owned by the server edge alongside the world
/// lock; `admit` is called once per inbound action before it reaches
/// the action pipeline.
pub struct SecurityGuard {
    rate_limiter: RateLimiter,
    replay_guard: ReplayGuard,
    strikes: HashMap<PlayerId, PlayerStrikes>,
}

impl SecurityGuard {
    pub fn new(rate_limits: RateLimitConfig) -> Self {
        Self {
            rate_limiter: RateLimiter::new(rate_limits),
            replay_guard: ReplayGuard::new(),
            strikes: HashMap::new(),
        }
    }

    /// Admit (or reject) one inbound action. `payload` is the raw,
    /// canonical byte representation of the action's arguments (e.g. the
    /// encoded `dx`/`dy` or `x`/`y`), used for content hashing.
    /// `second_timestamp` is the caller-supplied, second-granularity
    /// wall-clock time used by the replay guard; `now` is the
    /// `Instant` used by the rate limiter's sliding windows. Keeping
    /// both means this crate never reads the wall clock itself.
    pub fn admit(
        &mut self,
        player_id: PlayerId,
        kind: ActionKind,
        payload: &[u8],
        second_timestamp: u64,
        now: Instant,
    ) -> Result<(), SecurityRejection> {
        if !self.rate_limiter.check_and_record(player_id, kind, now) {
            warn!(player_id, ?kind, "rate limit exceeded");
            self.strike(player_id);
            return Err(SecurityRejection::RateLimited(kind));
        }

        if let Err(e) = self
            .replay_guard
            .check_and_record(player_id, kind, payload, second_timestamp)
        {
            let rejection = match e {
                ReplayError::Replay => SecurityRejection::Replay,
                ReplayError::DuplicateAction => SecurityRejection::DuplicateAction,
                ReplayError::SequenceSanity => SecurityRejection::SequenceSanity,
            };
            warn!(player_id, ?kind, reason = %rejection, "action rejected by replay guard");
            self.strike(player_id);
            return Err(rejection);
        }

        Ok(())
    }

    fn strike(&mut self, player_id: PlayerId) {
        let strikes = &mut self.strikes.entry(player_id).or_default().strikes;
        *strikes += 1;
        if *strikes == OPERATOR_REVIEW_STRIKE_THRESHOLD {
            warn!(player_id, strikes = *strikes, "player flagged for operator review");
        }
    }

    /// Drop all per-player bookkeeping; called on disconnect/eviction so
    /// memory doesn't accumulate across the player's session lifetime.
    pub fn forget_player(&mut self, player_id: PlayerId) {
        self.rate_limiter.forget_player(player_id);
        self.replay_guard.forget_player(player_id);
        self.strikes.remove(&player_id);
    }

    fn risk_score(&self, player_id: PlayerId) -> u32 {
        self.strikes
            .get(&player_id)
            .map(|s| (s.strikes * 10).min(100))
            .unwrap_or(0)
    }

    /// Build the operator dashboard snapshot for every tracked player.
    /// Ref: spec §7 security dashboard (admin-key gated topic).
    pub fn snapshot(&self, generated_for: String, known_players: &[PlayerId]) -> SecuritySnapshotWire {
        let players = known_players
            .iter()
            .map(|&id| PlayerRiskWire {
                player_id: id,
                risk_score: self.risk_score(id),
                recent_strikes: self.strikes.get(&id).map(|s| s.strikes).unwrap_or(0),
                rate_limited: ActionKind::ALL
                    .iter()
                    .any(|&kind| self.rate_limiter.is_currently_limited(id, kind)),
            })
            .collect();

        SecuritySnapshotWire {
            generated_for,
            players,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_is_stable_for_hashing() {
        assert_eq!(ActionKind::Move.label(), "move");
        assert_eq!(ActionKind::Unflag.label(), "unflag");
    }

    #[test]
    fn strikes_accumulate_into_risk_score() {
        let mut guard = SecurityGuard::new(RateLimitConfig::default());
        let now = Instant::now();
        for i in 0..5u8 {
            let _ = guard.admit(1, ActionKind::Move, &[i], 1_000, now);
        }
        // Replaying the same payload at the same timestamp should strike.
        let err = guard.admit(1, ActionKind::Move, &[0], 1_000, now);
        assert!(err.is_err());
        assert!(guard.risk_score(1) > 0);
    }

    #[test]
    fn forget_player_clears_all_state() {
        let mut guard = SecurityGuard::new(RateLimitConfig::default());
        let now = Instant::now();
        let _ = guard.admit(2, ActionKind::Flag, b"x", 1_000, now);
        guard.forget_player(2);
        assert_eq!(guard.risk_score(2), 0);
    }
}
