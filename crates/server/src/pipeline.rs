//! The action pipeline: admits an inbound action past the security
//! guard, then applies it to the world under the caller's lock.
//!
//! Every rejection category from the error taxonomy collapses into one
//! exhaustively matchable [`RejectReason`] so the connection fan-out can
//! decide, without re-deriving the cause, whether a drop warrants a
//! warning log or a disconnect.

use msweep_security::{ActionKind, SecurityGuard, SecurityRejection};
use msweep_world::{FlagOutcome, FlipOutcome, MoveOutcome, PlayerId, RuleError, World};
use msweep_wire::ClientMessage;
use std::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum RejectReason {
    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),
    #[error("security: {0}")]
    Security(#[from] SecurityRejection),
    #[error("rule violation: {0}")]
    Rule(#[from] RuleError),
    #[error("message does not carry a gameplay action")]
    NotAnAction,
}

impl RejectReason {
    /// Coarse category for the `rejected` wire topic, so a client can
    /// decide whether to retry, back off, or just log and move on.
    pub fn category(&self) -> &'static str {
        match self {
            RejectReason::UnknownPlayer(_) => "unknown_player",
            RejectReason::Security(_) => "security",
            RejectReason::Rule(_) => "rule",
            RejectReason::NotAnAction => "protocol",
        }
    }
}

#[derive(Debug)]
pub enum PipelineOutcome {
    Moved(MoveOutcome),
    Flipped(FlipOutcome),
    Flagged(FlagOutcome),
}

/// Gameplay actions admitted through the security guard. `Hello`,
/// `Resume`, `Ping`, and `SecurityDashboard` are handled directly by the
/// connection layer and never reach this pipeline.
pub fn classify(msg: &ClientMessage) -> Option<(ActionKind, Vec<u8>)> {
    match *msg {
        ClientMessage::Move { dx, dy, .. } => {
            let mut payload = Vec::with_capacity(8);
            payload.extend_from_slice(&dx.to_le_bytes());
            payload.extend_from_slice(&dy.to_le_bytes());
            Some((ActionKind::Move, payload))
        }
        ClientMessage::Flip { x, y, .. } => Some((ActionKind::Flip, coord_payload(x, y))),
        ClientMessage::Flag { x, y, .. } => Some((ActionKind::Flag, coord_payload(x, y))),
        ClientMessage::Unflag { x, y, .. } => Some((ActionKind::Unflag, coord_payload(x, y))),
        _ => None,
    }
}

fn coord_payload(x: i32, y: i32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(8);
    payload.extend_from_slice(&x.to_le_bytes());
    payload.extend_from_slice(&y.to_le_bytes());
    payload
}

/// Admit and apply one gameplay action. `second_timestamp` is the
/// caller's second-granularity wall-clock time, used by the security
/// guard's replay/duplicate/sequence-sanity detection (spec §3, §4.4).
pub fn apply_action(
    world: &mut World,
    security: &mut SecurityGuard,
    player_id: PlayerId,
    msg: &ClientMessage,
    second_timestamp: u64,
    now: Instant,
) -> Result<PipelineOutcome, RejectReason> {
    let (kind, payload) = classify(msg).ok_or(RejectReason::NotAnAction)?;
    security.admit(player_id, kind, &payload, second_timestamp, now)?;

    if world.player(player_id).is_none() {
        return Err(RejectReason::UnknownPlayer(player_id));
    }

    match *msg {
        ClientMessage::Move { dx, dy, .. } => {
            let from = world.player(player_id).unwrap().position;
            let target = (from.0 + dx, from.1 + dy);
            Ok(PipelineOutcome::Moved(world.try_move(player_id, target)?))
        }
        ClientMessage::Flip { x, y, .. } => Ok(PipelineOutcome::Flipped(world.try_flip(player_id, (x, y))?)),
        ClientMessage::Flag { x, y, .. } => Ok(PipelineOutcome::Flagged(world.try_flag(player_id, (x, y))?)),
        ClientMessage::Unflag { x, y, .. } => {
            world.try_unflag(player_id, (x, y))?;
            unreachable!("try_unflag always returns Err")
        }
        _ => unreachable!("classify() already filtered non-action messages"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use msweep_security::RateLimitConfig;
    use msweep_world::GenConfig;

    fn setup() -> (World, SecurityGuard, PlayerId) {
        let mut world = World::generate(GenConfig {
            size: 30,
            mine_density: 0.0,
            flag_token_density: 0.0,
            spawn_point_count: 2,
            seed: 3,
        })
        .unwrap();
        let mut rng = rand_chacha::ChaCha8Rng::from_seed([1u8; 32]);
        use rand::SeedableRng;
        let id = world.add_player("zoe", "red".to_string(), &mut rng);
        (world, SecurityGuard::new(RateLimitConfig::default()), id)
    }

    #[test]
    fn unflag_always_rejected_as_a_rule_violation() {
        let (mut world, mut security, id) = setup();
        let now = Instant::now();
        let pos = world.player(id).unwrap().position;
        let msg = ClientMessage::Unflag {
            x: pos.0,
            y: pos.1,
            viewport_width: None,
            viewport_height: None,
        };
        let err = apply_action(&mut world, &mut security, id, &msg, 1_000, now).unwrap_err();
        assert!(matches!(err, RejectReason::Rule(RuleError::UnflagDisallowed)));
    }

    #[test]
    fn replayed_action_is_rejected_as_security() {
        let (mut world, mut security, id) = setup();
        let now = Instant::now();
        let msg = ClientMessage::Move {
            dx: 0,
            dy: 0,
            viewport_width: None,
            viewport_height: None,
        };
        // dx=0,dy=0 is rejected by the rule engine (not adjacent to self),
        // but it's still admitted past security the first time.
        let _ = apply_action(&mut world, &mut security, id, &msg, 1_000, now);
        let err = apply_action(&mut world, &mut security, id, &msg, 1_000, now).unwrap_err();
        assert!(matches!(err, RejectReason::Security(SecurityRejection::Replay)));
    }
}
