//! Minesweeper-MMO server binary: accepts TCP connections, frames each
//! as newline-delimited JSON, and drives them through [`msweep_server::Server`].
//!
//! Grounded on the pack's reference game-server accept loop (the Slime
//! Online server's `main`/`spawn_background_tasks` split): bind, spawn a
//! background maintenance task, then loop accepting connections and
//! spawning one handler task per socket.

use msweep_server::connection::ConnectionRegistry;
use msweep_server::pipeline::RejectReason;
use msweep_server::session::SessionId;
use msweep_server::{Server, ServerConfig};
use msweep_wire::{ClientMessage, ServerMessage};
use msweep_world::{Coord, PlayerId};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Delay between a mine being uncovered by a blast and its own
/// detonation. Ref: spec §4.6 chain reactions, §5.
const CHAIN_REACTION_DELAY: Duration = Duration::from_millis(100);

struct AppState {
    server: Mutex<Server>,
    registry: ConnectionRegistry,
}

fn unix_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn unix_secs_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env()?;
    if ServerConfig::secret_was_generated() {
        warn!("SESSION_SECRET not set; generated an ephemeral one. Sessions will not survive a restart.");
    }

    let addr = format!("{}:{}", config.listen_host, config.listen_port);
    let listen_host = config.listen_host.clone();
    let listen_port = config.listen_port;
    let tick_rate_hz = config.tick_rate_hz.max(1);

    let server = Server::new(config).map_err(|e| {
        error!("failed to build server: {e}");
        e
    })?;

    let state = Arc::new(AppState {
        server: Mutex::new(server),
        registry: ConnectionRegistry::new(),
    });

    let listener = TcpListener::bind(&addr).await?;
    info!("listening on {listen_host}:{listen_port}");

    spawn_idle_sweeper(state.clone(), tick_rate_hz);

    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(socket, state).await {
                        warn!("connection from {peer} ended with an error: {e}");
                    }
                });
            }
            Err(e) => error!("failed to accept connection: {e}"),
        }
    }
}

/// Periodically evict idle sessions and tell everyone still connected
/// that those players left. Ref: SPEC_FULL §5 idle-session sweep.
fn spawn_idle_sweeper(state: Arc<AppState>, tick_rate_hz: u32) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(1000 / tick_rate_hz as u64));
        loop {
            interval.tick().await;
            let evicted = {
                let mut server = state.server.lock().await;
                server.sweep_idle_sessions(Instant::now())
            };
            for player_id in evicted {
                state.registry.unregister(player_id);
                state
                    .registry
                    .broadcast(&ServerMessage::PlayerLeft { player_id });
            }
        }
    });
}

/// Detonate every mine in `origins` after the chain-reaction delay,
/// broadcast the result, and recursively schedule whatever further
/// mines that detonation itself uncovers. Ref: spec §4.6, §5.
fn schedule_chain_reactions(state: Arc<AppState>, origins: Vec<Coord>) {
    for origin in origins {
        let state = state.clone();
        tokio::spawn(async move {
            tokio::time::sleep(CHAIN_REACTION_DELAY).await;
            let dispatched = {
                let mut server = state.server.lock().await;
                server.trigger_chained_explosion(origin)
            };
            for msg in &dispatched.broadcast {
                state.registry.broadcast(msg);
            }
            if !dispatched.chain_origins.is_empty() {
                schedule_chain_reactions(state, dispatched.chain_origins);
            }
        });
    }
}

async fn handle_connection(socket: TcpStream, state: Arc<AppState>) -> anyhow::Result<()> {
    let (read_half, mut write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if write_half.write_all(b"\n").await.is_err() {
                break;
            }
        }
    });

    let mut identity: Option<(PlayerId, SessionId)> = None;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let msg: ClientMessage = match serde_json::from_str(&line) {
            Ok(m) => m,
            Err(e) => {
                let _ = tx.send(
                    serde_json::to_string(&ServerMessage::Rejected {
                        category: "protocol".to_string(),
                        reason: format!("malformed frame: {e}"),
                    })
                    .unwrap(),
                );
                continue;
            }
        };

        match msg {
            ClientMessage::Hello { username, color } => {
                let mut server = state.server.lock().await;
                let welcome = server.connect(&username, color, unix_ms_now(), Instant::now());
                let ServerMessage::Welcome { player_id, session_token, .. } = &welcome else {
                    unreachable!("connect always returns Welcome");
                };
                let player_id = *player_id;
                let session_id = server.session_id_for(player_id).unwrap();
                identity = Some((player_id, session_id.clone()));
                state.registry.register(player_id, tx.clone());
                send(
                    &tx,
                    &ServerMessage::SessionAssigned {
                        session_id,
                        session_token: session_token.clone(),
                        is_reconnection: false,
                    },
                );
                send(&tx, &welcome);
                if let Some(viewport) = server.viewport_for(player_id) {
                    send(&tx, &viewport);
                }
            }
            ClientMessage::Resume { session_token } => {
                let mut server = state.server.lock().await;
                match server.resume(&session_token, Instant::now()) {
                    Ok(player_id) => {
                        let session_id = server.session_id_for(player_id).unwrap();
                        identity = Some((player_id, session_id.clone()));
                        state.registry.register(player_id, tx.clone());
                        send(
                            &tx,
                            &ServerMessage::SessionAssigned {
                                session_id,
                                session_token: session_token.clone(),
                                is_reconnection: true,
                            },
                        );
                        if let Some(viewport) = server.viewport_for(player_id) {
                            send(&tx, &viewport);
                        }
                    }
                    Err(e) => send(
                        &tx,
                        &ServerMessage::Rejected {
                            category: "session".to_string(),
                            reason: e.to_string(),
                        },
                    ),
                }
            }
            ClientMessage::Ping { client_timestamp } => send(
                &tx,
                &ServerMessage::Pong {
                    server_timestamp: unix_ms_now(),
                    echo: client_timestamp,
                },
            ),
            ClientMessage::SecurityDashboard { admin_key } => {
                let server = state.server.lock().await;
                match server.security_dashboard(&admin_key, format!("{}", unix_ms_now())) {
                    Some(snapshot) => send(&tx, &snapshot),
                    None => send(
                        &tx,
                        &ServerMessage::Rejected {
                            category: "authz".to_string(),
                            reason: "invalid admin key".to_string(),
                        },
                    ),
                }
            }
            action @ (ClientMessage::Move { .. }
            | ClientMessage::Flip { .. }
            | ClientMessage::Flag { .. }
            | ClientMessage::Unflag { .. }) => {
                let Some((player_id, _)) = identity else {
                    send(
                        &tx,
                        &ServerMessage::Rejected {
                            category: "protocol".to_string(),
                            reason: "must send hello or resume first".to_string(),
                        },
                    );
                    continue;
                };
                let mut server = state.server.lock().await;
                match server.handle_action(player_id, &action, unix_secs_now(), Instant::now()) {
                    Ok(dispatched) => {
                        for msg in &dispatched.to_sender {
                            send(&tx, msg);
                        }
                        for msg in &dispatched.broadcast {
                            state.registry.broadcast(msg);
                        }
                        drop(server);
                        if !dispatched.chain_origins.is_empty() {
                            schedule_chain_reactions(state.clone(), dispatched.chain_origins);
                        }
                    }
                    Err(e) => send(&tx, &rejection_message(&e)),
                }
            }
        }
    }

    if let Some((player_id, session_id)) = identity {
        let mut server = state.server.lock().await;
        server.disconnect(session_id, Instant::now());
        drop(server);
        state.registry.unregister(player_id);
        state
            .registry
            .broadcast(&ServerMessage::PlayerLeft { player_id });
    }

    Ok(())
}

fn rejection_message(e: &RejectReason) -> ServerMessage {
    ServerMessage::Rejected {
        category: e.category().to_string(),
        reason: e.to_string(),
    }
}

fn send(tx: &mpsc::UnboundedSender<String>, msg: &ServerMessage) {
    if let Ok(line) = serde_json::to_string(msg) {
        let _ = tx.send(line);
    }
}
