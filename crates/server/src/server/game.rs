//! Game state shared by the tick loop and the connection tasks.

use super::client::Client;
use crate::config::Config;
use crate::controller::Controller;
use crate::engine::{Engine, EngineEvent};
use crate::error::Error;
use crate::visibility::{DeltaOutcome, ScratchPool, Transport, Viewer};
use futures_util::FutureExt;
use protocol::packets::client::{ClientPacket, Handshake};
use protocol::packets::server::{
    build_clear, build_init, build_leaderboard, build_minimap, build_player_info, build_pong,
    build_stats, MinimapEntry,
};
use protocol::ProtocolError;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Entries in the leaderboard packet.
const LEADERBOARD_SIZE: usize = 10;

/// Scratch pages preallocated per connection.
const SCRATCH_PAGES: usize = 1;

pub struct GameState {
    pub engine: Engine,
    pub clients: HashMap<u8, Client>,
    pool: ScratchPool,
    /// Exponential moving average of the tick time in milliseconds.
    pub update_time_avg: f64,
    /// Deltas dropped because a client's socket was backed up.
    pub skipped_deltas: u64,
}

impl GameState {
    pub fn new(engine: Engine) -> Self {
        let pool = ScratchPool::new(engine.config().server.max_connections, SCRATCH_PAGES);
        Self {
            engine,
            clients: HashMap::new(),
            pool,
            update_time_avg: 0.0,
            skipped_deltas: 0,
        }
    }

    pub fn config(&self) -> &Config {
        self.engine.config()
    }

    /// Scratch buffers left for new connections.
    pub fn free_slots(&self) -> usize {
        self.pool.available()
    }

    /// Admit a handshaken connection and send it the world extents.
    pub fn join(
        &mut self,
        addr: SocketAddr,
        handshake: Handshake,
        transport: Arc<dyn Transport>,
    ) -> Result<u8, Error> {
        // One lease per connection; the pool is sized to `max_connections`.
        let lease = self.pool.checkout()?;
        let id = self.engine.add_controller().ok_or(Error::ServerFull)?;

        let max_len = self.config().player.name_max_length;
        if let Some(c) = self.engine.controller_mut(id) {
            if let Some(name) = &handshake.name {
                c.set_name(name, max_len);
            }
            if let Some(skin) = &handshake.skin {
                c.set_skin(skin);
            }
        }

        let world = &self.config().world;
        let (hw, hh) = (extent(world.map_hw), extent(world.map_hh));
        transport.send(build_init(id as u16, hw, hh).finish());
        for c in self.engine.controllers().iter().filter(|c| c.id != id && c.alive()) {
            transport.send(build_player_info(c.id as u16, c.name(), c.skin()).finish());
        }

        let viewer = Viewer::new(lease, self.engine.arena().capacity());
        self.clients.insert(id, Client { id, addr, transport, viewer });
        info!("P#{} joined from {} ({} online)", id, addr, self.clients.len());
        Ok(id)
    }

    /// Drop a client and its cells. The scratch buffer goes back to the pool.
    pub fn leave(&mut self, id: u8) {
        if let Some(client) = self.clients.remove(&id) {
            self.engine.remove_controller(id);
            info!("P#{} ({}) left, {} online", id, client.addr, self.clients.len());
        }
    }

    /// Apply one client packet to its controller's intents.
    pub fn handle_packet(&mut self, id: u8, data: &[u8]) -> Result<(), ProtocolError> {
        let packet = ClientPacket::parse(data)?;
        let max_len = self.config().player.name_max_length;
        let Some(c) = self.engine.controller_mut(id) else {
            return Ok(());
        };

        match packet {
            ClientPacket::Spawn { name, skin } => {
                c.set_name(&name, max_len);
                c.set_skin(&skin);
                c.spawn_requested = true;
            }
            ClientPacket::Spectate => {
                if !c.alive() {
                    c.spectate = true;
                }
            }
            ClientPacket::Input { mouse, keys } => {
                c.set_mouse(mouse);
                if let Some(keys) = keys {
                    c.spectate = keys.spectate;
                    c.split_attempts += keys.splits as u32;
                    c.eject_attempts += keys.ejects as u32;
                    c.eject_macro = keys.macro_eject;
                    c.lock_requested |= keys.line_lock;
                }
            }
            ClientPacket::Respawn => c.auto_respawn = true,
            ClientPacket::Chat { message } => {
                debug!("Ignoring chat from P#{} ({} chars)", id, message.chars().count());
            }
            ClientPacket::Ping => {
                if let Some(client) = self.clients.get(&id) {
                    client.send(build_pong().finish());
                }
            }
        }
        Ok(())
    }

    /// Run one engine tick and send every client what it produced.
    pub fn tick(&mut self) -> Vec<EngineEvent> {
        let events = self.engine.tick();
        for &event in &events {
            self.dispatch(event);
        }

        let watermark = self.config().server.socket_watermark;
        for client in self.clients.values_mut() {
            let Some(view) = self.engine.controller(client.id).map(Controller::view) else {
                continue;
            };
            let outcome = client
                .viewer
                .update(&self.engine, view.as_ref(), client.transport.as_ref(), watermark);
            if outcome == DeltaOutcome::Skipped {
                self.skipped_deltas += 1;
            }
        }

        let world = &self.config().world;
        let (tps, tick) = (world.tps, self.engine.tick_count());
        if every(tick, tps, world.leaderboard_tps) {
            self.broadcast_leaderboard();
        }
        if every(tick, tps, world.minimap_tps) {
            self.broadcast_minimap();
        }
        events
    }

    fn dispatch(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Spawned(pid) => {
                let Some(c) = self.engine.controller(pid) else {
                    return;
                };
                let info = build_player_info(pid as u16, c.name(), c.skin()).finish();
                for client in self.clients.values() {
                    client.send(info.clone());
                }
                if let Some(client) = self.clients.get_mut(&pid) {
                    client.send(build_clear().finish());
                    client.viewer.reset();
                }
            }
            EngineEvent::Died(pid) => {
                let (Some(c), Some(client)) = (self.engine.controller(pid), self.clients.get(&pid)) else {
                    return;
                };
                client.send(build_stats(c.kills, c.max_score, c.survive_ms / 1000.0).finish());
            }
            EngineEvent::Restarted => {
                let clear = build_clear().finish();
                for client in self.clients.values_mut() {
                    client.send(clear.clone());
                    client.viewer.reset();
                }
            }
        }
    }

    fn broadcast_leaderboard(&self) {
        let board = self.engine.leaderboard();
        let top = &board[..board.len().min(LEADERBOARD_SIZE)];
        for client in self.clients.values() {
            let rank = board.iter().position(|&pid| pid == client.id);
            client.send(build_leaderboard(rank, top).finish());
        }
    }

    fn broadcast_minimap(&self) {
        let entries: Vec<_> = self
            .engine
            .leaderboard()
            .iter()
            .filter_map(|&pid| self.engine.controller(pid))
            .map(|c| MinimapEntry {
                pid: c.id,
                position: c.viewport.center(),
                score: c.score,
            })
            .collect();
        let packet = build_minimap(&entries).finish();
        for client in self.clients.values() {
            client.send(packet.clone());
        }
    }
}

/// Whether a broadcast running `rate` times per second is due on `tick`.
fn every(tick: u64, tps: u32, rate: u32) -> bool {
    if rate == 0 {
        return false;
    }
    let interval = (tps / rate).max(1) as u64;
    tick % interval == 0
}

fn extent(half: f32) -> u16 {
    half.max(0.0).min(u16::MAX as f32) as u16
}

/// Run the main game loop.
pub async fn run_game_loop(state: Arc<RwLock<GameState>>, tick_interval_ms: u64) {
    let tick = Duration::from_millis(tick_interval_ms);
    let mut ticker = interval_at(Instant::now() + tick, tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let scheduled = ticker.tick().await;

        // Nobody to simulate for.
        if state.read().await.clients.is_empty() {
            sleep(Duration::from_millis((tick_interval_ms * 4).max(100))).await;
            continue;
        }

        // Drain any backlog so the tick runs on current inputs.
        let mut skipped = 0u32;
        while ticker.tick().now_or_never().is_some() {
            skipped += 1;
        }
        if skipped > 0 {
            debug!(
                "Skipped {} ticks to stay current (lag: {:?})",
                skipped,
                Instant::now().saturating_duration_since(scheduled)
            );
        }

        let mut game = state.write().await;
        let tick_start = std::time::Instant::now();
        game.tick();
        let tick_ms = tick_start.elapsed().as_secs_f64() * 1000.0;
        game.update_time_avg = game.update_time_avg * 0.5 + tick_ms * 0.5;

        let tick_budget = tick_interval_ms as f64 * 0.9;
        if tick_ms > tick_budget {
            warn!(
                "Slow tick #{}: {:.3}ms (budget: {:.1}ms) - {} players, {} cells total",
                game.engine.tick_count(),
                tick_ms,
                tick_budget,
                game.clients.len(),
                game.engine.arena().live_count()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visibility::tests::Recorder;

    fn state(max_connections: usize) -> GameState {
        let mut config = Config::default();
        config.server.max_connections = max_connections;
        config.world.map_hw = 1000.0;
        config.world.map_hh = 1000.0;
        config.world.cell_limit = 1024;
        config.pellet.count = 0;
        config.virus.count = 0;
        GameState::new(Engine::with_seed(config, 11))
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    fn handshake() -> Handshake {
        Handshake { name: Some("somebody with a long name".to_string()), skin: None }
    }

    #[test]
    fn test_broadcast_rates() {
        assert!(every(10, 25, 2));
        assert!(!every(11, 25, 2));
        assert!(every(7, 25, 30));
        assert!(!every(5, 25, 0));
    }

    #[test]
    fn test_join_sends_init_and_truncates_name() {
        let mut game = state(4);
        let t = Arc::new(Recorder::default());
        let id = game.join(addr(), handshake(), t.clone()).unwrap();
        assert_eq!(id, 1);
        assert_eq!(game.engine.controller(id).unwrap().name(), "somebody with a ");

        let sent = t.sent.lock().unwrap();
        assert_eq!(&sent[0][..], &[1, 1, 0, 0xE8, 0x03, 0xE8, 0x03]);
    }

    #[test]
    fn test_pool_bounds_admission() {
        let mut game = state(2);
        let a = game.join(addr(), handshake(), Arc::new(Recorder::default())).unwrap();
        game.join(addr(), handshake(), Arc::new(Recorder::default())).unwrap();
        assert_eq!(game.free_slots(), 0);
        assert!(matches!(
            game.join(addr(), handshake(), Arc::new(Recorder::default())),
            Err(Error::PoolExhausted)
        ));
        assert_eq!(game.clients.len(), 2);
        assert_eq!(game.engine.controllers().iter().count(), 2);

        game.leave(a);
        assert_eq!(game.free_slots(), 1);
        assert_eq!(game.join(addr(), handshake(), Arc::new(Recorder::default())).unwrap(), a);
    }

    #[test]
    fn test_packets_drive_intents() {
        let mut game = state(4);
        let t = Arc::new(Recorder::default());
        let id = game.join(addr(), handshake(), t.clone()).unwrap();

        // Input with keys: mouse (100, -50), splits 2, ejects 1, line lock.
        let mut input = vec![3];
        input.extend_from_slice(&100f32.to_le_bytes());
        input.extend_from_slice(&(-50f32).to_le_bytes());
        input.extend_from_slice(&[0, 2, 1, 0, 1]);
        game.handle_packet(id, &input).unwrap();
        game.handle_packet(id, &[7]).unwrap();
        game.handle_packet(id, &[69]).unwrap();

        let c = game.engine.controller(id).unwrap();
        assert_eq!(c.mouse(), glam::Vec2::new(100.0, -50.0));
        assert_eq!((c.split_attempts, c.eject_attempts), (2, 1));
        assert!(c.lock_requested && c.auto_respawn);
        assert_eq!(&t.sent.lock().unwrap().last().unwrap()[..], &[69]);

        assert!(matches!(game.handle_packet(id, &[42]), Err(ProtocolError::InvalidOpcode(42))));
    }
}
