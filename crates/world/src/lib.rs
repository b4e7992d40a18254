//! Minesweeper-MMO World Core
//!
//! This crate contains the deterministic, I/O-free grid world: tile and
//! player state, world generation, and the game-rules engine that mutates
//! that state in response to a single player action at a time.
//!
//! # Architecture Constraints
//!
//! The World Core MUST NOT:
//! - Perform I/O operations (file, network, etc.)
//! - Read wall-clock time
//! - Use ambient/unseeded randomness (generation takes an explicit seed)
//! - Depend on a network transport or wire format
//!
//! All external communication (sessions, rate limiting, broadcasts) is
//! owned by the Server Edge crate, which holds the single writer lock
//! around every call into this crate.

#![deny(unsafe_code)]

mod generate;
mod rules;

pub use generate::{GenConfig, GenConfigError};
pub use rules::{
    ExplosionOutcome, FlagOutcome, FlipOutcome, MoveOutcome, RuleError, TileChange,
};

use std::collections::HashMap;

/// Stable, server-assigned player identifier.
pub type PlayerId = u64;

/// Integer grid coordinate.
pub type Coord = (i32, i32);

/// Maximum length of a player's display name.
pub const MAX_USERNAME_LEN: usize = 12;

/// Kill/visual radius of an explosion. Fixed at 3 per the authoritative
/// rule (the source material disagreed between 2 and 3; see DESIGN.md).
pub const EXPLOSION_RADIUS: i32 = 3;

/// The underlying, pre-reveal content of a tile. Immutable once the world
/// is generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroundKind {
    Empty,
    Numbered(u8),
    Mine,
    FlagToken,
}

/// What a revealed (or exploded) tile displays as. Set exactly once, the
/// first time a tile is revealed, and never changes afterward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealedKind {
    Empty,
    Numbered(u8),
    Mine,
    FlagToken,
    Explosion,
}

/// One cell of the grid.
///
/// Invariants (spec §3):
/// - a tile is either covered or revealed, never both ambiguously;
/// - a tile cannot be both flagged and revealed;
/// - `revealed_kind` is `Some` iff `revealed`;
/// - `flagged_by` is `Some` iff `flagged`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    ground: GroundKind,
    revealed: bool,
    revealed_kind: Option<RevealedKind>,
    flagged: bool,
    flagged_by: Option<PlayerId>,
    exploded: bool,
}

impl Tile {
    fn covered(ground: GroundKind) -> Self {
        Self {
            ground,
            revealed: false,
            revealed_kind: None,
            flagged: false,
            flagged_by: None,
            exploded: false,
        }
    }

    fn revealed(ground: GroundKind) -> Self {
        let revealed_kind = Some(match ground {
            GroundKind::Empty => RevealedKind::Empty,
            GroundKind::Numbered(n) => RevealedKind::Numbered(n),
            GroundKind::Mine => RevealedKind::Mine,
            GroundKind::FlagToken => RevealedKind::FlagToken,
        });
        Self {
            ground,
            revealed: true,
            revealed_kind,
            flagged: false,
            flagged_by: None,
            exploded: false,
        }
    }

    pub fn ground(&self) -> GroundKind {
        self.ground
    }

    pub fn is_revealed(&self) -> bool {
        self.revealed
    }

    pub fn is_flagged(&self) -> bool {
        self.flagged
    }

    pub fn flagged_by(&self) -> Option<PlayerId> {
        self.flagged_by
    }

    pub fn is_exploded(&self) -> bool {
        self.exploded
    }

    pub fn revealed_kind(&self) -> Option<RevealedKind> {
        self.revealed_kind
    }

    /// A tile is walkable iff it's revealed and not a mine, or it's
    /// flagged (covered tiles become walkable once flagged).
    pub fn is_walkable(&self) -> bool {
        if self.flagged {
            return true;
        }
        self.revealed && !matches!(self.revealed_kind, Some(RevealedKind::Mine))
    }
}

/// A connected (or disconnected-but-not-evicted) player.
///
/// Invariants (spec §3): position is in-bounds; score and flags are
/// non-negative (enforced by type: both are `u32`); a dead player cannot
/// act except implicitly spectating (enforced by the pipeline, not here).
#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub username: String,
    pub color: String,
    pub position: Coord,
    pub score: u32,
    pub flags: u32,
    pub alive: bool,
    pub connected: bool,
}

impl Player {
    /// Truncate a raw display name to the maximum allowed length.
    /// Ref: spec §3 Player invariants.
    pub fn sanitize_username(raw: &str) -> String {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return "player".to_string();
        }
        trimmed.chars().take(MAX_USERNAME_LEN).collect()
    }
}

/// The authoritative world: grid, players, spawn points, and mine-count
/// accounting. Owned exclusively by the Server Edge and mutated only
/// through the methods on this type (single-writer discipline, see §5).
pub struct World {
    size: i32,
    tiles: Vec<Tile>,
    players: HashMap<PlayerId, Player>,
    spawn_points: Vec<Coord>,
    total_mines: u32,
    flagged_mines: u32,
    next_player_id: PlayerId,
}

impl World {
    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.size || y >= self.size {
            return None;
        }
        Some((y * self.size + x) as usize)
    }

    pub fn size(&self) -> i32 {
        self.size
    }

    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < self.size && y < self.size
    }

    pub fn tile_at(&self, x: i32, y: i32) -> Option<&Tile> {
        self.index(x, y).map(|i| &self.tiles[i])
    }

    fn tile_at_mut(&mut self, x: i32, y: i32) -> Option<&mut Tile> {
        let idx = self.index(x, y)?;
        Some(&mut self.tiles[idx])
    }

    pub fn spawn_points(&self) -> &[Coord] {
        &self.spawn_points
    }

    pub fn total_mines(&self) -> u32 {
        self.total_mines
    }

    pub fn flagged_mines(&self) -> u32 {
        self.flagged_mines
    }

    /// True iff every mine has been flagged. Ref: spec §4.6 Game end.
    pub fn is_game_over(&self) -> bool {
        self.total_mines > 0 && self.flagged_mines >= self.total_mines
    }

    /// Sanitized completion percentage; the raw remaining-mine count is
    /// deliberately not exposed (spec §4.6, anti-cheat).
    pub fn progress_percent(&self) -> u32 {
        if self.total_mines == 0 {
            return 100;
        }
        (self.flagged_mines * 100) / self.total_mines
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn player_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.players.get_mut(&id)
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    /// Register a new player at a random spawn point.
    pub fn add_player(
        &mut self,
        username: &str,
        color: String,
        rng: &mut impl rand::RngCore,
    ) -> PlayerId {
        use rand::Rng;
        let id = self.next_player_id;
        self.next_player_id += 1;

        let spawn = self.spawn_points[rng.gen_range(0..self.spawn_points.len())];
        let player = Player {
            id,
            username: Player::sanitize_username(username),
            color,
            position: spawn,
            score: 0,
            flags: 0,
            alive: true,
            connected: true,
        };
        self.players.insert(id, player);
        id
    }

    /// Remove a player permanently. Only called by idle-session eviction
    /// (spec §4.2); disconnect alone leaves the record intact.
    pub fn remove_player(&mut self, id: PlayerId) -> Option<Player> {
        self.players.remove(&id)
    }

    /// Count mines among the 8-neighborhood of `(x, y)`. Out-of-bounds
    /// neighbors are treated as non-mine (spec §4.1 edge policy).
    fn neighbor_mine_count(&self, x: i32, y: i32) -> u8 {
        let mut count = 0u8;
        for dy in -1..=1 {
            for dx in -1..=1 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                if let Some(t) = self.tile_at(x + dx, y + dy) {
                    if t.ground == GroundKind::Mine {
                        count += 1;
                    }
                }
            }
        }
        count
    }
}
