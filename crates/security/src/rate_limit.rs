//! Sliding-window, per-action-kind rate limiting.

use crate::ActionKind;
use msweep_world::PlayerId;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Window length, per-kind budgets, and the global cap for the
/// sliding-window limiter. Ref: spec §4.3.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub max_move: u32,
    pub max_flip: u32,
    pub max_flag: u32,
    pub max_unflag: u32,
    /// Total actions of any kind admitted per player per window,
    /// independent of the per-kind budgets above.
    pub max_global: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(1),
            max_move: 10,
            max_flip: 5,
            max_flag: 5,
            max_unflag: 5,
            max_global: 20,
        }
    }
}

impl RateLimitConfig {
    fn budget(&self, kind: ActionKind) -> u32 {
        match kind {
            ActionKind::Move => self.max_move,
            ActionKind::Flip => self.max_flip,
            ActionKind::Flag => self.max_flag,
            ActionKind::Unflag => self.max_unflag,
        }
    }
}

/// Tracks a rolling window of recent action timestamps per
/// `(player, kind)` bucket and rejects once the budget is exceeded.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: HashMap<(PlayerId, ActionKind), VecDeque<Instant>>,
    global_windows: HashMap<PlayerId, VecDeque<Instant>>,
}

fn trim(entry: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&oldest) = entry.front() {
        if now.duration_since(oldest) > window {
            entry.pop_front();
        } else {
            break;
        }
    }
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: HashMap::new(),
            global_windows: HashMap::new(),
        }
    }

    /// Record `now` against the player/kind bucket and the player's
    /// global bucket, admitting only if both budgets are satisfied. The
    /// caller supplies `now` explicitly so this type never reads the
    /// wall clock itself. Ref: spec §4.3.
    pub fn check_and_record(&mut self, player_id: PlayerId, kind: ActionKind, now: Instant) -> bool {
        let budget = self.config.budget(kind);
        let window = self.config.window;

        let entry = self.windows.entry((player_id, kind)).or_default();
        trim(entry, now, window);
        let global_entry = self.global_windows.entry(player_id).or_default();
        trim(global_entry, now, window);

        if self.windows[&(player_id, kind)].len() as u32 >= budget {
            return false;
        }
        if self.global_windows[&player_id].len() as u32 >= self.config.max_global {
            return false;
        }

        self.windows.get_mut(&(player_id, kind)).unwrap().push_back(now);
        self.global_windows.get_mut(&player_id).unwrap().push_back(now);
        true
    }

    pub fn is_currently_limited(&self, player_id: PlayerId, kind: ActionKind) -> bool {
        let per_kind_limited = self
            .windows
            .get(&(player_id, kind))
            .map(|w| w.len() as u32 >= self.config.budget(kind))
            .unwrap_or(false);
        let global_limited = self
            .global_windows
            .get(&player_id)
            .map(|w| w.len() as u32 >= self.config.max_global)
            .unwrap_or(false);
        per_kind_limited || global_limited
    }

    pub fn forget_player(&mut self, player_id: PlayerId) {
        self.windows.retain(|(id, _), _| *id != player_id);
        self.global_windows.remove(&player_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_budget_then_rejects() {
        let mut limiter = RateLimiter::new(RateLimitConfig {
            window: Duration::from_secs(1),
            max_move: 2,
            max_flip: 2,
            max_flag: 2,
            max_unflag: 2,
            max_global: 20,
        });
        let now = Instant::now();
        assert!(limiter.check_and_record(1, ActionKind::Move, now));
        assert!(limiter.check_and_record(1, ActionKind::Move, now));
        assert!(!limiter.check_and_record(1, ActionKind::Move, now));
    }

    #[test]
    fn window_expiry_frees_budget() {
        let mut limiter = RateLimiter::new(RateLimitConfig {
            window: Duration::from_millis(10),
            max_move: 1,
            max_flip: 1,
            max_flag: 1,
            max_unflag: 1,
            max_global: 20,
        });
        let t0 = Instant::now();
        assert!(limiter.check_and_record(1, ActionKind::Move, t0));
        assert!(!limiter.check_and_record(1, ActionKind::Move, t0));
        let t1 = t0 + Duration::from_millis(20);
        assert!(limiter.check_and_record(1, ActionKind::Move, t1));
    }

    #[test]
    fn buckets_are_independent_per_kind() {
        let mut limiter = RateLimiter::new(RateLimitConfig {
            window: Duration::from_secs(1),
            max_move: 1,
            max_flip: 1,
            max_flag: 1,
            max_unflag: 1,
            max_global: 20,
        });
        let now = Instant::now();
        assert!(limiter.check_and_record(1, ActionKind::Move, now));
        assert!(limiter.check_and_record(1, ActionKind::Flip, now));
    }

    #[test]
    fn global_cap_applies_across_kinds() {
        let mut limiter = RateLimiter::new(RateLimitConfig {
            window: Duration::from_secs(1),
            max_move: 10,
            max_flip: 10,
            max_flag: 10,
            max_unflag: 10,
            max_global: 2,
        });
        let now = Instant::now();
        assert!(limiter.check_and_record(1, ActionKind::Move, now));
        assert!(limiter.check_and_record(1, ActionKind::Flip, now));
        assert!(!limiter.check_and_record(1, ActionKind::Flag, now));
    }
}
