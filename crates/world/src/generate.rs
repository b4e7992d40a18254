//! World generation: a deterministic spawn-point grid, rejection-sampled
//! mine and flag-token placement around it, followed by adjacency-count
//! assignment for every remaining cell.
//!
//! Grounded on the neighbor-counting pass in the pack's sweeper reference
//! (`recalculate_adjacent_counts`), generalized to a one-shot generation
//! pass instead of an incremental recompute.

use crate::{GroundKind, Tile, World};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Manhattan-distance safe zone around every spawn point: no mine may be
/// placed within this radius of a spawn. Ref: spec §4.1, §8.
const SPAWN_EXCLUSION_RADIUS: i32 = 2;

/// Margin kept clear around the world edge when laying out the spawn
/// grid. Ref: spec §4.1. Clamped down for worlds much smaller than the
/// real 1000-tile world (e.g. in tests) so the margin never swallows the
/// whole board.
const SPAWN_MARGIN: i32 = 50;

/// Parameters for a deterministic world build.
#[derive(Debug, Clone, Copy)]
pub struct GenConfig {
    pub size: i32,
    pub mine_density: f64,
    pub flag_token_density: f64,
    pub spawn_point_count: usize,
    pub seed: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum GenConfigError {
    #[error("world size must be positive, got {0}")]
    NonPositiveSize(i32),
    #[error("mine_density must be in [0, 1), got {0}")]
    InvalidMineDensity(f64),
    #[error("flag_token_density must be in [0, 1), got {0}")]
    InvalidFlagTokenDensity(f64),
    #[error("spawn_point_count must be at least 1")]
    NoSpawnPoints,
    #[error("world is too small to fit {requested} spawn points with safe zones")]
    WorldTooSmall { requested: usize },
}

impl GenConfig {
    fn validate(&self) -> Result<(), GenConfigError> {
        if self.size <= 0 {
            return Err(GenConfigError::NonPositiveSize(self.size));
        }
        if !(0.0..1.0).contains(&self.mine_density) {
            return Err(GenConfigError::InvalidMineDensity(self.mine_density));
        }
        if !(0.0..1.0).contains(&self.flag_token_density) {
            return Err(GenConfigError::InvalidFlagTokenDensity(
                self.flag_token_density,
            ));
        }
        if self.spawn_point_count == 0 {
            return Err(GenConfigError::NoSpawnPoints);
        }
        let cells = (self.size as i64) * (self.size as i64);
        if (self.spawn_point_count as i64) * 4 > cells {
            return Err(GenConfigError::WorldTooSmall {
                requested: self.spawn_point_count,
            });
        }
        Ok(())
    }
}

fn manhattan(a: (i32, i32), b: (i32, i32)) -> i32 {
    (a.0 - b.0).abs() + (a.1 - b.1).abs()
}

impl World {
    /// Build a fresh world deterministically from `config`. Same config,
    /// same world, every time (no ambient randomness).
    pub fn generate(config: GenConfig) -> Result<World, GenConfigError> {
        config.validate()?;
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let size = config.size;

        let spawn_points = place_spawn_points(size, config.spawn_point_count);

        let mut ground = vec![GroundKind::Empty; (size * size) as usize];
        let idx = |x: i32, y: i32| (y * size + x) as usize;

        for y in 0..size {
            for x in 0..size {
                if spawn_points.contains(&(x, y)) {
                    continue;
                }
                let near_spawn = spawn_points
                    .iter()
                    .any(|&s| manhattan(s, (x, y)) <= SPAWN_EXCLUSION_RADIUS);
                if near_spawn {
                    continue;
                }
                if rng.gen_bool(config.mine_density) {
                    ground[idx(x, y)] = GroundKind::Mine;
                }
            }
        }

        for y in 0..size {
            for x in 0..size {
                if ground[idx(x, y)] != GroundKind::Empty {
                    continue;
                }
                if spawn_points.contains(&(x, y)) {
                    continue;
                }
                let near_spawn = spawn_points
                    .iter()
                    .any(|&s| manhattan(s, (x, y)) <= SPAWN_EXCLUSION_RADIUS);
                if near_spawn {
                    continue;
                }
                if rng.gen_bool(config.flag_token_density) {
                    ground[idx(x, y)] = GroundKind::FlagToken;
                }
            }
        }

        let mut total_mines = 0u32;
        let mut tiles = Vec::with_capacity((size * size) as usize);
        for y in 0..size {
            for x in 0..size {
                let g = ground[idx(x, y)];
                if g == GroundKind::Mine {
                    total_mines += 1;
                }
                if spawn_points.contains(&(x, y)) {
                    tiles.push(Tile::revealed(GroundKind::Empty));
                    continue;
                }
                tiles.push(Tile::covered(g));
            }
        }

        let mut world = World {
            size,
            tiles,
            players: std::collections::HashMap::new(),
            spawn_points,
            total_mines,
            flagged_mines: 0,
            next_player_id: 1,
        };

        // Numbered assignment happens after construction so neighbor
        // counting can use World::neighbor_mine_count.
        for y in 0..size {
            for x in 0..size {
                let g = world.tile_at(x, y).unwrap().ground();
                if g == GroundKind::Mine || world.spawn_points.contains(&(x, y)) {
                    continue;
                }
                let n = world.neighbor_mine_count(x, y);
                if n > 0 {
                    let i = idx(x, y);
                    world.tiles[i].ground = GroundKind::Numbered(n);
                }
            }
        }

        Ok(world)
    }
}

/// Lay `count` spawn points out on a deterministic √count×√count grid
/// inset by [`SPAWN_MARGIN`] from every edge. Ref: spec §4.1 step 1 — no
/// randomness is involved, so the same `(size, count)` always yields the
/// same layout.
fn place_spawn_points(size: i32, count: usize) -> Vec<(i32, i32)> {
    let grid_dim = (count as f64).sqrt().ceil() as i32;
    let margin = SPAWN_MARGIN.min((size - 1) / 2).max(0);
    let lo = margin;
    let hi = (size - margin - 1).max(lo);
    let span = hi - lo;

    let mut points = Vec::with_capacity(count);
    for i in 0..count as i32 {
        let row = i / grid_dim;
        let col = i % grid_dim;
        let (x, y) = if grid_dim > 1 {
            (lo + span * col / (grid_dim - 1), lo + span * row / (grid_dim - 1))
        } else {
            (lo + span / 2, lo + span / 2)
        };
        points.push((x.clamp(lo, hi), y.clamp(lo, hi)));
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_config() {
        let bad = GenConfig {
            size: 0,
            mine_density: 0.1,
            flag_token_density: 0.01,
            spawn_point_count: 1,
            seed: 1,
        };
        assert!(matches!(
            World::generate(bad),
            Err(GenConfigError::NonPositiveSize(0))
        ));
    }

    #[test]
    fn deterministic_for_same_seed() {
        let cfg = GenConfig {
            size: 30,
            mine_density: 0.1,
            flag_token_density: 0.02,
            spawn_point_count: 4,
            seed: 99,
        };
        let a = World::generate(cfg).unwrap();
        let b = World::generate(cfg).unwrap();
        assert_eq!(a.spawn_points(), b.spawn_points());
        assert_eq!(a.total_mines(), b.total_mines());
        for y in 0..a.size() {
            for x in 0..a.size() {
                assert_eq!(
                    a.tile_at(x, y).unwrap().ground(),
                    b.tile_at(x, y).unwrap().ground()
                );
            }
        }
    }

    #[test]
    fn no_mines_within_spawn_exclusion_zone() {
        let cfg = GenConfig {
            size: 50,
            mine_density: 0.2,
            flag_token_density: 0.01,
            spawn_point_count: 6,
            seed: 5,
        };
        let world = World::generate(cfg).unwrap();
        for y in 0..world.size() {
            for x in 0..world.size() {
                if world.tile_at(x, y).unwrap().ground() == GroundKind::Mine {
                    for &s in world.spawn_points() {
                        assert!(manhattan(s, (x, y)) > SPAWN_EXCLUSION_RADIUS);
                    }
                }
            }
        }
    }
}
