//! Game rules: the only code paths that mutate a [`World`] after
//! generation. Every public function here takes a single player action
//! and returns either the resulting state change or a typed rejection —
//! nothing here performs I/O or touches a clock.

use crate::{Coord, GroundKind, Player, PlayerId, RevealedKind, Tile, World, EXPLOSION_RADIUS};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("player {0} is not known to this world")]
    PlayerNotFound(PlayerId),
    #[error("player {0} is not alive")]
    PlayerNotAlive(PlayerId),
    #[error("target cell is out of bounds")]
    OutOfBounds,
    #[error("target cell is not adjacent to the player")]
    NotAdjacent,
    #[error("target cell is not walkable")]
    NotWalkable,
    #[error("target cell is already revealed")]
    AlreadyRevealed,
    #[error("target cell is already flagged")]
    AlreadyFlagged,
    #[error("target cell is not flagged")]
    NotFlagged,
    #[error("player has no flags to place")]
    NoFlagsAvailable,
    #[error("unflagging is not supported")]
    UnflagDisallowed,
}

/// Describes one tile's state after a mutation, for broadcasting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileChange {
    pub x: i32,
    pub y: i32,
    pub revealed_kind: Option<RevealedKind>,
    pub flagged: bool,
    pub flagged_by: Option<PlayerId>,
    pub exploded: bool,
}

impl TileChange {
    fn from_tile(x: i32, y: i32, tile: &Tile) -> Self {
        Self {
            x,
            y,
            revealed_kind: tile.revealed_kind(),
            flagged: tile.is_flagged(),
            flagged_by: tile.flagged_by(),
            exploded: tile.is_exploded(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveOutcome {
    pub player_id: PlayerId,
    pub new_position: Coord,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlipOutcome {
    Revealed(TileChange),
    CollectedFlagToken(TileChange),
    Exploded(ExplosionOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagOutcome {
    pub tile: TileChange,
    pub defused_mine: bool,
    pub game_over: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplosionOutcome {
    pub origin: Coord,
    pub affected: Vec<TileChange>,
    pub killed_players: Vec<PlayerId>,
    /// Mines newly uncovered within blast radius that have not yet
    /// exploded themselves; the server schedules a follow-up explosion
    /// for each of these after the chain-reaction delay (spec §5).
    pub chain_origins: Vec<Coord>,
}

fn chebyshev(a: Coord, b: Coord) -> i32 {
    (a.0 - b.0).abs().max((a.1 - b.1).abs())
}

fn is_adjacent(a: Coord, b: Coord) -> bool {
    let dx = (a.0 - b.0).abs();
    let dy = (a.1 - b.1).abs();
    (dx, dy) != (0, 0) && dx <= 1 && dy <= 1
}

/// Cardinal single-step check for movement: exactly one of x/y changes,
/// by exactly one tile. Diagonal steps are rejected. Ref: spec §4.5 step
/// 6, §4.6 Move, §8.
fn is_cardinal_step(a: Coord, b: Coord) -> bool {
    let dx = (a.0 - b.0).abs();
    let dy = (a.1 - b.1).abs();
    dx + dy == 1
}

impl World {
    fn live_player(&self, id: PlayerId) -> Result<&Player, RuleError> {
        let player = self.player(id).ok_or(RuleError::PlayerNotFound(id))?;
        if !player.alive {
            return Err(RuleError::PlayerNotAlive(id));
        }
        Ok(player)
    }

    /// Move a player one cardinal step (no diagonals) onto a walkable,
    /// in-bounds tile. Ref: spec §4.5 step 6, §4.6 Move.
    pub fn try_move(&mut self, player_id: PlayerId, target: Coord) -> Result<MoveOutcome, RuleError> {
        let player = self.live_player(player_id)?;
        let from = player.position;

        if !self.in_bounds(target.0, target.1) {
            return Err(RuleError::OutOfBounds);
        }
        if !is_cardinal_step(from, target) {
            return Err(RuleError::NotAdjacent);
        }
        let tile = self.tile_at(target.0, target.1).ok_or(RuleError::OutOfBounds)?;
        if !tile.is_walkable() {
            return Err(RuleError::NotWalkable);
        }

        self.player_mut(player_id).unwrap().position = target;
        Ok(MoveOutcome {
            player_id,
            new_position: target,
        })
    }

    /// Reveal a covered tile. Flipping a mine triggers an explosion
    /// centered on that tile; flipping a flag token grants the player a
    /// flag (+1 score) and then reveals as empty/numbered underneath it;
    /// flipping empty/numbered ground grants +1 score. Ref: spec §4.6 Flip.
    pub fn try_flip(&mut self, player_id: PlayerId, target: Coord) -> Result<FlipOutcome, RuleError> {
        let player = self.live_player(player_id)?;
        let from = player.position;
        if !self.in_bounds(target.0, target.1) {
            return Err(RuleError::OutOfBounds);
        }
        if !is_adjacent(from, target) {
            return Err(RuleError::NotAdjacent);
        }
        let tile = self.tile_at(target.0, target.1).ok_or(RuleError::OutOfBounds)?;
        if tile.is_revealed() {
            return Err(RuleError::AlreadyRevealed);
        }
        if tile.is_flagged() {
            return Err(RuleError::AlreadyFlagged);
        }

        let ground = tile.ground();
        if ground == GroundKind::Mine {
            return Ok(FlipOutcome::Exploded(self.trigger_explosion(target)));
        }

        if ground == GroundKind::FlagToken {
            let n = self.neighbor_mine_count(target.0, target.1);
            let revealed_kind = if n == 0 {
                RevealedKind::Empty
            } else {
                RevealedKind::Numbered(n)
            };
            let t = self.tile_at_mut(target.0, target.1).unwrap();
            t.revealed = true;
            t.revealed_kind = Some(revealed_kind);
            let p = self.player_mut(player_id).unwrap();
            p.flags += 1;
            p.score += 1;
            let change = TileChange::from_tile(target.0, target.1, self.tile_at(target.0, target.1).unwrap());
            return Ok(FlipOutcome::CollectedFlagToken(change));
        }

        let t = self.tile_at_mut(target.0, target.1).unwrap();
        t.revealed = true;
        t.revealed_kind = Some(match ground {
            GroundKind::Empty => RevealedKind::Empty,
            GroundKind::Numbered(n) => RevealedKind::Numbered(n),
            GroundKind::Mine | GroundKind::FlagToken => unreachable!(),
        });
        self.player_mut(player_id).unwrap().score += 1;
        let change = TileChange::from_tile(target.0, target.1, self.tile_at(target.0, target.1).unwrap());
        Ok(FlipOutcome::Revealed(change))
    }

    /// Place a flag on a covered, unflagged tile adjacent to the player.
    /// If the tile is a mine, this defuses it (+3 score, progresses the
    /// win condition). Ref: spec §4.6 Flag, §4.6 Game end.
    pub fn try_flag(&mut self, player_id: PlayerId, target: Coord) -> Result<FlagOutcome, RuleError> {
        let player = self.live_player(player_id)?;
        let from = player.position;
        if player.flags == 0 {
            return Err(RuleError::NoFlagsAvailable);
        }
        if !self.in_bounds(target.0, target.1) {
            return Err(RuleError::OutOfBounds);
        }
        if !is_adjacent(from, target) {
            return Err(RuleError::NotAdjacent);
        }
        let tile = self.tile_at(target.0, target.1).ok_or(RuleError::OutOfBounds)?;
        if tile.is_revealed() {
            return Err(RuleError::AlreadyRevealed);
        }
        if tile.is_flagged() {
            return Err(RuleError::AlreadyFlagged);
        }

        let is_mine = tile.ground() == GroundKind::Mine;
        let t = self.tile_at_mut(target.0, target.1).unwrap();
        t.flagged = true;
        t.flagged_by = Some(player_id);
        let p = self.player_mut(player_id).unwrap();
        p.flags -= 1;

        if is_mine {
            p.score += 3;
            self.flagged_mines += 1;
        }

        let change = TileChange::from_tile(target.0, target.1, self.tile_at(target.0, target.1).unwrap());
        Ok(FlagOutcome {
            tile: change,
            defused_mine: is_mine,
            game_over: self.is_game_over(),
        })
    }

    /// Always rejected. The wire protocol still parses an `unflag`
    /// action so older clients don't get a protocol-level drop, but the
    /// server never mutates state for it (see DESIGN.md open-question
    /// decision).
    pub fn try_unflag(&mut self, _player_id: PlayerId, _target: Coord) -> Result<(), RuleError> {
        Err(RuleError::UnflagDisallowed)
    }

    /// Reveal every covered tile within [`EXPLOSION_RADIUS`] (Chebyshev
    /// distance) of `origin`, kill any player standing on one of them,
    /// and report any freshly uncovered mines for chained scheduling.
    /// Ref: spec §4.6 Explosion / chain reactions, §5 concurrency model.
    fn trigger_explosion(&mut self, origin: Coord) -> ExplosionOutcome {
        let mut affected = Vec::new();
        let mut chain_origins = Vec::new();
        let mut killed_players = Vec::new();

        for dy in -EXPLOSION_RADIUS..=EXPLOSION_RADIUS {
            for dx in -EXPLOSION_RADIUS..=EXPLOSION_RADIUS {
                let pos = (origin.0 + dx, origin.1 + dy);
                if !self.in_bounds(pos.0, pos.1) {
                    continue;
                }
                if chebyshev(origin, pos) > EXPLOSION_RADIUS {
                    continue;
                }
                let is_origin = pos == origin;
                let was_mine;
                {
                    let tile = self.tile_at(pos.0, pos.1).unwrap();
                    if tile.is_revealed() && tile.is_exploded() {
                        continue;
                    }
                    was_mine = tile.ground() == GroundKind::Mine;
                }

                let tile = self.tile_at_mut(pos.0, pos.1).unwrap();
                tile.flagged = false;
                tile.flagged_by = None;
                tile.exploded = true;
                if !tile.revealed {
                    tile.revealed = true;
                    tile.revealed_kind = Some(if is_origin {
                        RevealedKind::Mine
                    } else {
                        RevealedKind::Explosion
                    });
                } else if !is_origin {
                    tile.revealed_kind = Some(RevealedKind::Explosion);
                }

                if was_mine && !is_origin {
                    chain_origins.push(pos);
                }

                let change = TileChange::from_tile(pos.0, pos.1, self.tile_at(pos.0, pos.1).unwrap());
                affected.push(change);
            }
        }

        for player in self.players.values_mut() {
            if player.alive && chebyshev(origin, player.position) <= EXPLOSION_RADIUS {
                player.alive = false;
                killed_players.push(player.id);
            }
        }

        ExplosionOutcome {
            origin,
            affected,
            killed_players,
            chain_origins,
        }
    }

    /// Entry point used by the server's chain-reaction scheduler to
    /// detonate a mine uncovered by a previous explosion, re-entering
    /// the world lock after the chain-reaction delay (spec §5).
    pub fn trigger_chained_explosion(&mut self, origin: Coord) -> ExplosionOutcome {
        self.trigger_explosion(origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GenConfig;

    fn world_with_player() -> (World, PlayerId) {
        let mut world = World::generate(GenConfig {
            size: 30,
            mine_density: 0.1,
            flag_token_density: 0.02,
            spawn_point_count: 3,
            seed: 42,
        })
        .unwrap();
        let mut rng = rand_chacha::ChaCha8Rng::from_seed([3u8; 32]);
        use rand::SeedableRng;
        let id = world.add_player("bob", "blue".to_string(), &mut rng);
        (world, id)
    }

    #[test]
    fn move_rejects_non_adjacent() {
        let (mut world, id) = world_with_player();
        let pos = world.player(id).unwrap().position;
        let far = (pos.0 + 5, pos.1);
        assert_eq!(world.try_move(id, far), Err(RuleError::NotAdjacent));
    }

    #[test]
    fn move_rejects_diagonal_step() {
        let (mut world, id) = world_with_player();
        let pos = world.player(id).unwrap().position;
        let diagonal = (pos.0 + 1, pos.1 + 1);
        assert_eq!(world.try_move(id, diagonal), Err(RuleError::NotAdjacent));
    }

    #[test]
    fn unflag_is_always_refused() {
        let (mut world, id) = world_with_player();
        let pos = world.player(id).unwrap().position;
        assert_eq!(
            world.try_unflag(id, (pos.0 + 1, pos.1)),
            Err(RuleError::UnflagDisallowed)
        );
    }

    #[test]
    fn flag_with_no_flags_available() {
        let (mut world, id) = world_with_player();
        let pos = world.player(id).unwrap().position;
        assert_eq!(world.player(id).unwrap().flags, 0);
        let target = (pos.0 + 1, pos.1);
        assert_eq!(world.try_flag(id, target), Err(RuleError::NoFlagsAvailable));
    }

    #[test]
    fn flagging_a_mine_defuses_it_and_can_end_the_game() {
        let mut world = World::generate(GenConfig {
            size: 10,
            mine_density: 0.0,
            flag_token_density: 0.0,
            spawn_point_count: 1,
            seed: 1,
        })
        .unwrap();
        let spawn = world.spawn_points()[0];
        let mine_pos = (spawn.0, (spawn.1 + 2) % 10);
        let idx = (mine_pos.1 * world.size() + mine_pos.0) as usize;
        world.tiles[idx] = Tile::covered(GroundKind::Mine);
        world.total_mines = 1;

        let mut rng = rand_chacha::ChaCha8Rng::from_seed([9u8; 32]);
        use rand::SeedableRng;
        let id = world.add_player("carl", "green".to_string(), &mut rng);
        let player_pos = (spawn.0, (spawn.1 + 1) % 10);
        world.player_mut(id).unwrap().position = player_pos;
        world.player_mut(id).unwrap().flags = 1;

        let outcome = world.try_flag(id, mine_pos).unwrap();
        assert!(outcome.defused_mine);
        assert!(outcome.game_over);
        assert_eq!(world.flagged_mines(), 1);
        assert_eq!(world.player(id).unwrap().score, 3);
    }

    #[test]
    fn flipping_empty_ground_awards_one_point() {
        let (mut world, id) = world_with_player();
        let pos = world.player(id).unwrap().position;
        // Find an adjacent covered, non-mine tile to flip.
        let candidates = [(pos.0 + 1, pos.1), (pos.0 - 1, pos.1), (pos.0, pos.1 + 1), (pos.0, pos.1 - 1)];
        let target = candidates
            .into_iter()
            .find(|&(x, y)| {
                world
                    .tile_at(x, y)
                    .map(|t| !t.is_revealed() && t.ground() != GroundKind::Mine)
                    .unwrap_or(false)
            })
            .expect("at least one non-mine neighbor");
        let before = world.player(id).unwrap().score;
        let outcome = world.try_flip(id, target).unwrap();
        assert!(matches!(outcome, FlipOutcome::Revealed(_)));
        assert_eq!(world.player(id).unwrap().score, before + 1);
    }
}
