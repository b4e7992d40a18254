//! Minesweeper-MMO Wire Protocol Types
//!
//! Shared JSON message types exchanged between the game client and the
//! server edge over a topic-framed bus (each frame carries a `type` tag
//! naming the topic). Both client and server binaries depend on this
//! crate so the message shapes never drift apart.
//!
//! The upstream Flowstate teacher encodes these as Protobuf; this
//! protocol is specified as named JSON fields, so this crate trades
//! `prost` for `serde`/`serde_json` (see DESIGN.md).

#![deny(unsafe_code)]

use msweep_world::{GroundKind, Player, PlayerId, RevealedKind, TileChange};
use serde::{Deserialize, Serialize};

/// Client-to-server frames. Ref: spec §6 inbound topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// First frame on a new connection: claim a username and color.
    Hello {
        username: String,
        #[serde(default)]
        color: Option<String>,
    },
    /// Reconnect using a previously issued session token.
    Resume { session_token: String },
    /// Step one cardinal tile (no diagonals). `dx`/`dy` in `-1..=1` with
    /// `|dx|+|dy|=1`.
    Move {
        dx: i32,
        dy: i32,
        #[serde(default)]
        viewport_width: Option<i32>,
        #[serde(default)]
        viewport_height: Option<i32>,
    },
    Flip {
        x: i32,
        y: i32,
        #[serde(default)]
        viewport_width: Option<i32>,
        #[serde(default)]
        viewport_height: Option<i32>,
    },
    Flag {
        x: i32,
        y: i32,
        #[serde(default)]
        viewport_width: Option<i32>,
        #[serde(default)]
        viewport_height: Option<i32>,
    },
    /// Always rejected server-side; parsed so legacy clients don't get a
    /// protocol-level drop (see DESIGN.md open-question decision).
    Unflag {
        x: i32,
        y: i32,
        #[serde(default)]
        viewport_width: Option<i32>,
        #[serde(default)]
        viewport_height: Option<i32>,
    },
    Ping { client_timestamp: u64 },
    SecurityDashboard { admin_key: String },
}

impl ClientMessage {
    /// The client-requested viewport half-extents carried by a gameplay
    /// action, if any. Ref: spec §6 `player-action` payload, §4.7.
    pub fn requested_viewport(&self) -> (Option<i32>, Option<i32>) {
        match *self {
            ClientMessage::Move { viewport_width, viewport_height, .. }
            | ClientMessage::Flip { viewport_width, viewport_height, .. }
            | ClientMessage::Flag { viewport_width, viewport_height, .. }
            | ClientMessage::Unflag { viewport_width, viewport_height, .. } => {
                (viewport_width, viewport_height)
            }
            _ => (None, None),
        }
    }
}

/// Server-to-client frames. Ref: spec §6 outbound topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Echoes the session issued (or re-validated) for this connection,
    /// separately from `Welcome`/`Viewport` so a reconnecting client can
    /// tell the two cases apart. Ref: spec §6 `session-assigned`.
    SessionAssigned {
        session_id: String,
        session_token: String,
        is_reconnection: bool,
    },
    Welcome {
        player_id: PlayerId,
        username: String,
        color: String,
        position: PositionWire,
        world_size: i32,
        session_token: String,
    },
    /// Full sanitized view of the world around the player, sent after
    /// welcome and after any move (spec §4.7 viewport materializer).
    Viewport {
        tiles: Vec<TileWire>,
        players: Vec<PlayerWire>,
    },
    /// Incremental tile changes to broadcast to everyone who can see them.
    TileUpdate { tiles: Vec<TileWire> },
    PlayerUpdate { player: PlayerWire },
    PlayerLeft { player_id: PlayerId },
    /// Sorted-descending, `score>0`-filtered scoreboard. Ref: spec §6
    /// `leaderboard-update`.
    LeaderboardUpdate { players: Vec<LeaderboardEntryWire> },
    Explosion {
        origin: PositionWire,
        tiles: Vec<TileWire>,
        killed_player_ids: Vec<PlayerId>,
    },
    /// One per player killed by an explosion, carrying the UI delay hint
    /// clients use to stagger death animations. Ref: spec §4.6, §6.
    PlayerDeath {
        player_id: PlayerId,
        reason: String,
        delay_ms: u32,
    },
    GameOver { progress_percent: u32 },
    Rejected { category: String, reason: String },
    Pong {
        server_timestamp: u64,
        echo: u64,
    },
    SecuritySnapshot(SecuritySnapshotWire),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntryWire {
    pub id: PlayerId,
    pub username: String,
    pub score: u32,
    pub flags: u32,
    pub alive: bool,
    pub color: String,
}

impl From<&Player> for LeaderboardEntryWire {
    fn from(p: &Player) -> Self {
        Self {
            id: p.id,
            username: p.username.clone(),
            score: p.score,
            flags: p.flags,
            alive: p.alive,
            color: p.color.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionWire {
    pub x: i32,
    pub y: i32,
}

impl From<(i32, i32)> for PositionWire {
    fn from((x, y): (i32, i32)) -> Self {
        Self { x, y }
    }
}

/// Sanitized tile kind as seen by a client. `Covered` is emitted both for
/// genuinely covered-and-unseen tiles and for flagged/near tiles whose
/// underlying ground is being withheld (spec §4.7 anti-cheat rule).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TileKindWire {
    Covered,
    Empty,
    Numbered { count: u8 },
    Mine,
    FlagToken,
    Explosion,
}

impl From<RevealedKind> for TileKindWire {
    fn from(k: RevealedKind) -> Self {
        match k {
            RevealedKind::Empty => TileKindWire::Empty,
            RevealedKind::Numbered(n) => TileKindWire::Numbered { count: n },
            RevealedKind::Mine => TileKindWire::Mine,
            RevealedKind::FlagToken => TileKindWire::FlagToken,
            RevealedKind::Explosion => TileKindWire::Explosion,
        }
    }
}

impl From<GroundKind> for TileKindWire {
    fn from(k: GroundKind) -> Self {
        match k {
            GroundKind::Empty => TileKindWire::Empty,
            GroundKind::Numbered(n) => TileKindWire::Numbered { count: n },
            GroundKind::Mine => TileKindWire::Mine,
            GroundKind::FlagToken => TileKindWire::FlagToken,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileWire {
    pub x: i32,
    pub y: i32,
    pub kind: TileKindWire,
    pub flagged: bool,
    pub flagged_by: Option<PlayerId>,
    pub exploded: bool,
}

impl TileWire {
    /// A tile the viewer is not entitled to see the contents of: its
    /// ground and any reveal state are withheld (spec §4.7).
    pub fn covered_stub(x: i32, y: i32, flagged: bool, flagged_by: Option<PlayerId>) -> Self {
        Self {
            x,
            y,
            kind: TileKindWire::Covered,
            flagged,
            flagged_by,
            exploded: false,
        }
    }

    /// The tile's full, revealed contents.
    pub fn revealed(
        x: i32,
        y: i32,
        kind: RevealedKind,
        flagged: bool,
        flagged_by: Option<PlayerId>,
        exploded: bool,
    ) -> Self {
        Self {
            x,
            y,
            kind: kind.into(),
            flagged,
            flagged_by,
            exploded,
        }
    }
}

impl From<&TileChange> for TileWire {
    fn from(change: &TileChange) -> Self {
        match change.revealed_kind {
            Some(kind) => TileWire::revealed(
                change.x,
                change.y,
                kind,
                change.flagged,
                change.flagged_by,
                change.exploded,
            ),
            None => TileWire::covered_stub(change.x, change.y, change.flagged, change.flagged_by),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerWire {
    pub id: PlayerId,
    pub username: String,
    pub color: String,
    pub position: PositionWire,
    pub score: u32,
    pub flags: u32,
    pub alive: bool,
}

impl From<&Player> for PlayerWire {
    fn from(p: &Player) -> Self {
        Self {
            id: p.id,
            username: p.username.clone(),
            color: p.color.clone(),
            position: p.position.into(),
            score: p.score,
            flags: p.flags,
            alive: p.alive,
        }
    }
}

/// Operator-facing abuse report. Populated by `msweep-security`; this
/// crate only defines the wire shape so `msweep-server` can serialize it
/// without `msweep-wire` depending on `msweep-security`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySnapshotWire {
    pub generated_for: String,
    pub players: Vec<PlayerRiskWire>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRiskWire {
    pub player_id: PlayerId,
    pub risk_score: u32,
    pub recent_strikes: u32,
    pub rate_limited: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_tags_by_type_field() {
        let msg = ClientMessage::Flip {
            x: 3,
            y: 4,
            viewport_width: None,
            viewport_height: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"flip\""));
        let back: ClientMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn unflag_parses_even_though_always_rejected() {
        let json = r#"{"type":"unflag","x":1,"y":2}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Unflag {
                x: 1,
                y: 2,
                viewport_width: None,
                viewport_height: None,
            }
        );
    }

    #[test]
    fn action_carries_optional_viewport_request() {
        let json = r#"{"type":"move","dx":1,"dy":0,"viewportWidth":30,"viewportHeight":15}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.requested_viewport(), (Some(30), Some(15)));
    }

    #[test]
    fn covered_tile_omits_kind_details() {
        let tile = TileWire::covered_stub(1, 1, true, Some(7));
        let json = serde_json::to_string(&tile).unwrap();
        assert!(json.contains("\"kind\":\"covered\""));
        assert!(!json.contains("mine"));
    }

    #[test]
    fn tile_change_without_reveal_becomes_covered_stub() {
        let change = TileChange {
            x: 0,
            y: 0,
            revealed_kind: None,
            flagged: true,
            flagged_by: Some(1),
            exploded: false,
        };
        let wire = TileWire::from(&change);
        assert_eq!(wire.kind, TileKindWire::Covered);
        assert!(wire.flagged);
    }
}
