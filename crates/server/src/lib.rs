//! Minesweeper-MMO Server Edge
//!
//! The Server Edge mediates every interaction between a game client and
//! the world core. It owns:
//! - Session management (HMAC-signed tokens, idle eviction)
//! - The security guard (rate limiting, replay detection)
//! - The action pipeline (applies admitted actions to the world)
//! - The viewport materializer (what a client is allowed to see)
//!
//! # Concurrency
//!
//! [`Server`] is designed to live behind a single `Arc<Mutex<Server>>`
//! (or equivalent). Every public mutating method here assumes it is
//! called under that lock, so the world, the session table, and the
//! security guard always move together. Chain-reaction explosions and
//! idle-session sweeping are driven by the caller (typically spawned
//! `tokio` tasks) re-acquiring the lock after a delay — this crate never
//! spawns tasks or sleeps itself, keeping it transport-agnostic.

#![deny(unsafe_code)]

pub mod connection;
pub mod pipeline;
pub mod session;
pub mod viewport;

use msweep_security::{RateLimitConfig, SecurityGuard};
use msweep_wire::{
    ClientMessage, PlayerWire, PositionWire, ServerMessage, TileWire,
};
use msweep_world::{Coord, ExplosionOutcome, GenConfig, PlayerId, World};
use pipeline::{PipelineOutcome, RejectReason};
use session::{SessionError, SessionId, SessionManager};
use std::time::{Duration, Instant};

/// Environment variable names read by [`ServerConfig::from_env`].
pub mod env_vars {
    pub const SESSION_SECRET: &str = "SESSION_SECRET";
    pub const ADMIN_KEY: &str = "ADMIN_KEY";
    pub const LISTEN_HOST: &str = "LISTEN_HOST";
    pub const LISTEN_PORT: &str = "LISTEN_PORT";
}

/// Configuration for a server instance. Ref: spec §6 external
/// interfaces, ambient environment-loading addition.
#[derive(Clone)]
pub struct ServerConfig {
    pub session_secret: [u8; 32],
    pub admin_key: Option<String>,
    pub listen_host: String,
    pub listen_port: u16,
    /// Paces the idle-session sweeper and chained-explosion scheduler;
    /// there is no fixed-timestep simulation to drive.
    pub tick_rate_hz: u32,
    pub idle_session_timeout: Duration,
    pub world: GenConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            session_secret: [0u8; 32],
            admin_key: None,
            listen_host: "0.0.0.0".to_string(),
            listen_port: 8080,
            tick_rate_hz: 60,
            idle_session_timeout: Duration::from_secs(30),
            world: GenConfig {
                size: 1000,
                mine_density: 0.075,
                flag_token_density: 0.02,
                spawn_point_count: 10,
                seed: 0,
            },
        }
    }
}

impl ServerConfig {
    /// Load configuration from the environment, falling back to
    /// defaults where a variable is absent. A missing `SESSION_SECRET`
    /// generates 32 random bytes and the caller should log a warning
    /// that sessions won't survive a restart (persistence is out of
    /// scope, spec §9).
    pub fn from_env() -> anyhow::Result<Self> {
        use rand::RngCore;

        let mut config = ServerConfig::default();

        config.session_secret = match std::env::var(env_vars::SESSION_SECRET) {
            Ok(hex_secret) => {
                let bytes = hex::decode(hex_secret.trim())
                    .map_err(|e| anyhow::anyhow!("SESSION_SECRET is not valid hex: {e}"))?;
                bytes
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("SESSION_SECRET must decode to 32 bytes"))?
            }
            Err(_) => {
                let mut secret = [0u8; 32];
                rand::thread_rng().fill_bytes(&mut secret);
                secret
            }
        };

        config.admin_key = std::env::var(env_vars::ADMIN_KEY).ok();

        if let Ok(host) = std::env::var(env_vars::LISTEN_HOST) {
            config.listen_host = host;
        }
        if let Ok(port) = std::env::var(env_vars::LISTEN_PORT) {
            config.listen_port = port
                .parse()
                .map_err(|e| anyhow::anyhow!("LISTEN_PORT is not a valid port number: {e}"))?;
        }

        Ok(config)
    }

    /// Whether `SESSION_SECRET` was actually read from the environment
    /// rather than generated; used only for the startup warning.
    pub fn secret_was_generated() -> bool {
        std::env::var(env_vars::SESSION_SECRET).is_err()
    }
}

/// Outcome of handling one inbound frame: a reply addressed only to the
/// sender, and an optional broadcast addressed to everyone else who can
/// see the affected area. The connection fan-out decides how to route
/// both (spec §4.8).
pub struct Dispatched {
    pub to_sender: Vec<ServerMessage>,
    pub broadcast: Vec<ServerMessage>,
    /// Mines newly uncovered by this dispatch that still need their own
    /// chained explosion after the chain-reaction delay (spec §4.6, §5).
    /// Empty for every dispatch that isn't itself an explosion.
    pub chain_origins: Vec<Coord>,
}

/// The authoritative server: world, sessions, and the security guard,
/// mutated only through these methods under a single exclusive lock.
pub struct Server {
    config: ServerConfig,
    world: World,
    sessions: SessionManager,
    security: SecurityGuard,
}

impl Server {
    pub fn new(config: ServerConfig) -> anyhow::Result<Self> {
        let world = World::generate(config.world)
            .map_err(|e| anyhow::anyhow!("failed to generate world: {e}"))?;
        let sessions = SessionManager::new(config.session_secret, config.idle_session_timeout);
        let security = SecurityGuard::new(RateLimitConfig::default());

        Ok(Self {
            config,
            world,
            sessions,
            security,
        })
    }

    /// Handle a `Hello`: spawn a new player at a random spawn point and
    /// issue a session token. Ref: spec §4.8.
    pub fn connect(&mut self, username: &str, color: Option<String>, created_at_unix_ms: u64, now: Instant) -> ServerMessage {
        let mut rng = rand::thread_rng();
        let color = color.unwrap_or_else(|| "#ffffff".to_string());
        let player_id = self.world.add_player(username, color.clone(), &mut rng);
        let (_session_id, token) = self
            .sessions
            .create_session(player_id, username, created_at_unix_ms, now);

        let player = self.world.player(player_id).unwrap();
        ServerMessage::Welcome {
            player_id,
            username: player.username.clone(),
            color: player.color.clone(),
            position: player.position.into(),
            world_size: self.world.size(),
            session_token: token,
        }
    }

    /// Resume a session from a previously issued token.
    pub fn resume(&mut self, token: &str, now: Instant) -> Result<PlayerId, SessionError> {
        self.sessions.resume(token, now).map(|s| s.player_id)
    }

    /// Look up the live session id for a connected player, for callers
    /// that need it to later call [`Server::disconnect`].
    pub fn session_id_for(&self, player_id: PlayerId) -> Option<SessionId> {
        self.sessions.session_for_player(player_id).map(|s| s.id.clone())
    }

    pub fn disconnect(&mut self, session_id: SessionId, now: Instant) {
        self.sessions.disconnect(&session_id, now);
    }

    /// Sweep idle sessions, evicting their players from the world and
    /// forgetting their security bookkeeping. Intended to be called
    /// periodically by a caller-owned task. Ref: spec §4.2, §5.
    pub fn sweep_idle_sessions(&mut self, now: Instant) -> Vec<PlayerId> {
        let evicted = self.sessions.sweep_idle(now);
        for &player_id in &evicted {
            self.world.remove_player(player_id);
            self.security.forget_player(player_id);
        }
        evicted
    }

    /// Produce the sanitized viewport for `player_id` using the default
    /// half-extent, if they exist.
    pub fn viewport_for(&self, player_id: PlayerId) -> Option<ServerMessage> {
        self.viewport_for_extent(player_id, viewport::DEFAULT_HALF_EXTENT, viewport::DEFAULT_HALF_EXTENT)
    }

    /// Produce the sanitized viewport for `player_id` at a
    /// client-requested half-extent (each axis capped independently at
    /// [`viewport::MAX_HALF_EXTENT`]). Ref: spec §4.7.
    pub fn viewport_for_extent(&self, player_id: PlayerId, half_extent_x: i32, half_extent_y: i32) -> Option<ServerMessage> {
        let (tiles, players) = viewport::materialize(&self.world, player_id, half_extent_x, half_extent_y)?;
        Some(ServerMessage::Viewport { tiles, players })
    }

    /// Build the sorted, score-filtered leaderboard broadcast. Ref: spec
    /// §6 `leaderboard-update`.
    pub fn leaderboard(&self) -> ServerMessage {
        let mut players: Vec<msweep_wire::LeaderboardEntryWire> = self
            .world
            .players()
            .filter(|p| p.score > 0)
            .map(msweep_wire::LeaderboardEntryWire::from)
            .collect();
        players.sort_by(|a, b| b.score.cmp(&a.score));
        ServerMessage::LeaderboardUpdate { players }
    }

    /// Handle one gameplay action already bound to `player_id` by the
    /// caller's session lookup. `second_timestamp` is the caller's
    /// second-granularity wall-clock time, used by the security guard's
    /// replay/duplicate/sequence-sanity detection (spec §3, §4.4).
    pub fn handle_action(
        &mut self,
        player_id: PlayerId,
        msg: &ClientMessage,
        second_timestamp: u64,
        now: Instant,
    ) -> Result<Dispatched, RejectReason> {
        let (requested_x, requested_y) = msg.requested_viewport();
        let half_extent_x = requested_x.unwrap_or(viewport::DEFAULT_HALF_EXTENT);
        let half_extent_y = requested_y.unwrap_or(viewport::DEFAULT_HALF_EXTENT);

        let score_before = self.world.player(player_id).map(|p| p.score);

        let mut dispatched = match pipeline::apply_action(&mut self.world, &mut self.security, player_id, msg, second_timestamp, now)? {
            PipelineOutcome::Moved(_outcome) => {
                let player_wire = PlayerWire::from(self.world.player(player_id).unwrap());
                Dispatched {
                    to_sender: vec![self.viewport_for_extent(player_id, half_extent_x, half_extent_y).unwrap()],
                    broadcast: vec![ServerMessage::PlayerUpdate { player: player_wire }],
                    chain_origins: Vec::new(),
                }
            }
            PipelineOutcome::Flipped(outcome) => dispatch_flip(outcome),
            PipelineOutcome::Flagged(outcome) => {
                let tile = TileWire::from(&outcome.tile);
                let mut to_sender = vec![ServerMessage::TileUpdate { tiles: vec![tile] }];
                if outcome.game_over {
                    to_sender.push(ServerMessage::GameOver {
                        progress_percent: self.world.progress_percent(),
                    });
                }
                Dispatched {
                    to_sender,
                    broadcast: vec![ServerMessage::TileUpdate {
                        tiles: vec![TileWire::from(&outcome.tile)],
                    }],
                    chain_origins: Vec::new(),
                }
            }
        };

        let score_after = self.world.player(player_id).map(|p| p.score);
        if score_before.is_some() && score_before != score_after {
            dispatched.broadcast.push(self.leaderboard());
        }

        Ok(dispatched)
    }

    /// Detonate a mine uncovered by a previous explosion. Called by a
    /// caller-owned task after the chain-reaction delay elapses.
    pub fn trigger_chained_explosion(&mut self, origin: Coord) -> Dispatched {
        explosion_dispatch(self.world.trigger_chained_explosion(origin))
    }

    /// Build the operator dashboard if `admin_key` matches the
    /// configured key. Ref: spec §7 security dashboard.
    pub fn security_dashboard(&self, admin_key: &str, generated_for: String) -> Option<ServerMessage> {
        let expected = self.config.admin_key.as_deref()?;
        if expected != admin_key {
            return None;
        }
        let known_players: Vec<PlayerId> = self.world.players().map(|p| p.id).collect();
        Some(ServerMessage::SecuritySnapshot(
            self.security.snapshot(generated_for, &known_players),
        ))
    }

    /// Drain all sessions, leaving the server in a state where no
    /// further `resume` will succeed. Ref: spec ambient supplement,
    /// graceful shutdown.
    pub fn shutdown(&mut self, now: Instant) -> Vec<PlayerId> {
        let all_players: Vec<PlayerId> = self.world.players().map(|p| p.id).collect();
        let _ = self.sessions.sweep_idle(now + self.config.idle_session_timeout + Duration::from_secs(1));
        all_players
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn session_count(&self) -> usize {
        self.sessions.session_count()
    }
}

fn dispatch_flip(outcome: msweep_world::FlipOutcome) -> Dispatched {
    match outcome {
        msweep_world::FlipOutcome::Revealed(change) | msweep_world::FlipOutcome::CollectedFlagToken(change) => {
            let msg = ServerMessage::TileUpdate {
                tiles: vec![TileWire::from(&change)],
            };
            Dispatched {
                to_sender: vec![msg.clone()],
                broadcast: vec![msg],
                chain_origins: Vec::new(),
            }
        }
        msweep_world::FlipOutcome::Exploded(explosion) => explosion_dispatch(explosion),
    }
}

fn explosion_dispatch(explosion: ExplosionOutcome) -> Dispatched {
    let tiles: Vec<TileWire> = explosion.affected.iter().map(TileWire::from).collect();
    let origin: PositionWire = explosion.origin.into();
    let chain_origins = explosion.chain_origins.clone();
    let player_deaths: Vec<ServerMessage> = explosion.killed_players.iter().map(|&player_id| ServerMessage::PlayerDeath {
        player_id,
        reason: "explosion".to_string(),
        delay_ms: 1500,
    }).collect();
    let msg = ServerMessage::Explosion {
        origin,
        tiles,
        killed_player_ids: explosion.killed_players,
    };
    // Explosions (and any resulting deaths) broadcast to everyone
    // including whoever triggered them, so the sender's copy is the
    // same message set as the broadcast.
    let mut broadcast = vec![msg];
    broadcast.extend(player_deaths);
    Dispatched {
        to_sender: broadcast.clone(),
        broadcast,
        chain_origins,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ServerConfig {
        ServerConfig {
            world: GenConfig {
                size: 40,
                mine_density: 0.1,
                flag_token_density: 0.02,
                spawn_point_count: 4,
                seed: 21,
            },
            admin_key: Some("letmein".to_string()),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn connect_issues_a_welcome_with_a_resumable_token() {
        let mut server = Server::new(test_config()).unwrap();
        let now = Instant::now();
        let welcome = server.connect("alice", None, 0, now);
        let ServerMessage::Welcome { session_token, player_id, .. } = welcome else {
            panic!("expected Welcome");
        };
        let resumed = server.resume(&session_token, now).unwrap();
        assert_eq!(resumed, player_id);
    }

    #[test]
    fn unknown_admin_key_yields_no_dashboard() {
        let server = Server::new(test_config()).unwrap();
        assert!(server.security_dashboard("wrong", "now".to_string()).is_none());
        assert!(server.security_dashboard("letmein", "now".to_string()).is_some());
    }

    #[test]
    fn idle_sweep_removes_player_from_world() {
        let mut server = Server::new(ServerConfig {
            idle_session_timeout: Duration::from_millis(1),
            ..test_config()
        })
        .unwrap();
        let now = Instant::now();
        let welcome = server.connect("bob", None, 0, now);
        let ServerMessage::Welcome { player_id, .. } = welcome else {
            panic!("expected Welcome");
        };
        assert!(server.world().player(player_id).is_some());
        let evicted = server.sweep_idle_sessions(now + Duration::from_secs(1));
        assert_eq!(evicted, vec![player_id]);
        assert!(server.world().player(player_id).is_none());
    }
}
