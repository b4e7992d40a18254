//! Viewport materialization: builds the sanitized slice of the world a
//! given player is allowed to see, withholding the contents of any tile
//! that isn't revealed, flagged, or immediately adjacent to them.
//!
//! Grounded on the masked-cell pattern in the pack's sweeper reference
//! (`MaskedCell`/`CellState`), generalized from a fixed board to a
//! window cut out of a much larger shared grid, and from a fixed
//! square radius to a client-requested, independently-capped
//! half-extent per axis (spec §4.7).

use msweep_world::{PlayerId, World};
use msweep_wire::{PlayerWire, TileWire};

/// Half-extent used when a client doesn't request a viewport size.
pub const DEFAULT_HALF_EXTENT: i32 = 20;

/// Hard cap on the half-extent along either axis, regardless of what a
/// client requests. Ref: spec §4.7.
pub const MAX_HALF_EXTENT: i32 = 100;

/// Clamp a client-requested half-extent into `1..=MAX_HALF_EXTENT`,
/// falling back to [`DEFAULT_HALF_EXTENT`] when absent.
pub fn clamp_half_extent(requested: Option<i32>) -> i32 {
    requested.unwrap_or(DEFAULT_HALF_EXTENT).clamp(1, MAX_HALF_EXTENT)
}

fn chebyshev(a: (i32, i32), b: (i32, i32)) -> i32 {
    (a.0 - b.0).abs().max((a.1 - b.1).abs())
}

/// Build the sanitized tile and player lists for the rectangle
/// `[center.x - half_extent_x, center.x + half_extent_x] x
/// [center.y - half_extent_y, center.y + half_extent_y]` around
/// `player_id`'s current position. The two axes are capped
/// independently so a client can request a wide-but-short or
/// tall-but-narrow window.
pub fn materialize(
    world: &World,
    player_id: PlayerId,
    half_extent_x: i32,
    half_extent_y: i32,
) -> Option<(Vec<TileWire>, Vec<PlayerWire>)> {
    let half_extent_x = half_extent_x.clamp(1, MAX_HALF_EXTENT);
    let half_extent_y = half_extent_y.clamp(1, MAX_HALF_EXTENT);

    let player = world.player(player_id)?;
    let center = player.position;

    let mut tiles = Vec::new();
    for y in (center.1 - half_extent_y)..=(center.1 + half_extent_y) {
        for x in (center.0 - half_extent_x)..=(center.0 + half_extent_x) {
            let Some(tile) = world.tile_at(x, y) else {
                continue;
            };
            let visible = tile.is_revealed() || tile.is_flagged() || chebyshev(center, (x, y)) <= 1;
            if !visible {
                continue;
            }
            tiles.push(if tile.is_revealed() {
                TileWire::revealed(
                    x,
                    y,
                    tile.revealed_kind().unwrap(),
                    tile.is_flagged(),
                    tile.flagged_by(),
                    tile.is_exploded(),
                )
            } else {
                TileWire::covered_stub(x, y, tile.is_flagged(), tile.flagged_by())
            });
        }
    }

    let players = world
        .players()
        .filter(|p| {
            (p.position.0 - center.0).abs() <= half_extent_x && (p.position.1 - center.1).abs() <= half_extent_y
        })
        .map(PlayerWire::from)
        .collect();

    Some((tiles, players))
}

#[cfg(test)]
mod tests {
    use super::*;
    use msweep_world::GenConfig;

    #[test]
    fn unrevealed_distant_tiles_withhold_their_kind() {
        let mut world = World::generate(GenConfig {
            size: 100,
            mine_density: 0.1,
            flag_token_density: 0.02,
            spawn_point_count: 1,
            seed: 11,
        })
        .unwrap();
        use rand::SeedableRng;
        let mut rng = rand_chacha::ChaCha8Rng::from_seed([4u8; 32]);
        let id = world.add_player("p", "c".to_string(), &mut rng);

        let (tiles, players) = materialize(&world, id, DEFAULT_HALF_EXTENT, DEFAULT_HALF_EXTENT).unwrap();
        assert!(players.iter().any(|p| p.id == id));
        for tile in &tiles {
            if !tile.flagged && tile.kind == msweep_wire::TileKindWire::Covered {
                // Stub tiles never leak position-adjacent ground truth.
                assert!(tile.x >= 0 && tile.y >= 0);
            }
        }
        assert!(!tiles.is_empty());
    }

    #[test]
    fn asymmetric_half_extents_produce_a_rectangle() {
        let mut world = World::generate(GenConfig {
            size: 200,
            mine_density: 0.0,
            flag_token_density: 0.0,
            spawn_point_count: 1,
            seed: 12,
        })
        .unwrap();
        use rand::SeedableRng;
        let mut rng = rand_chacha::ChaCha8Rng::from_seed([5u8; 32]);
        let id = world.add_player("p", "c".to_string(), &mut rng);
        let center = world.player(id).unwrap().position;

        let (tiles, _) = materialize(&world, id, 3, 1).unwrap();
        for tile in &tiles {
            assert!((tile.x - center.0).abs() <= 3);
            assert!((tile.y - center.1).abs() <= 1);
        }
    }

    #[test]
    fn half_extent_is_clamped_to_the_maximum() {
        assert_eq!(clamp_half_extent(Some(10_000)), MAX_HALF_EXTENT);
        assert_eq!(clamp_half_extent(Some(0)), 1);
        assert_eq!(clamp_half_extent(None), DEFAULT_HALF_EXTENT);
    }
}
