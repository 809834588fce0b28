//! Whole ticks through `GameState` with recording transports.

use bytes::Bytes;
use glam::Vec2;
use protocol::packets::client::Handshake;
use protocol::BinaryReader;
use server::arena::{Boost, CellKind};
use server::visibility::Transport;
use server::{Config, Engine, EngineEvent, GameState};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Recorder {
    sent: Mutex<Vec<Bytes>>,
    buffered: AtomicUsize,
}

impl Recorder {
    fn packets(&self, op: u8) -> Vec<Bytes> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.first() == Some(&op))
            .cloned()
            .collect()
    }

    fn ops(&self) -> Vec<u8> {
        self.sent.lock().unwrap().iter().map(|p| p[0]).collect()
    }
}

impl Transport for Recorder {
    fn send(&self, data: Bytes) {
        self.sent.lock().unwrap().push(data);
    }

    fn close(&self, _code: u16, _reason: &str) {}

    fn buffered_bytes(&self) -> usize {
        self.buffered.load(Ordering::Relaxed)
    }
}

/// Added `(id, type)` and eaten `(id, eaten_by)` records of a delta packet.
fn added_and_eaten(packet: &[u8]) -> (Vec<(u16, u16)>, Vec<(u16, u16)>) {
    let mut r = BinaryReader::new(packet);
    assert_eq!(r.get_u8().unwrap(), 4);
    r.get_f32().unwrap();
    r.get_f32().unwrap();

    let mut added = Vec::new();
    loop {
        let id = r.get_u16().unwrap();
        if id == 0 {
            break;
        }
        let ty = r.get_u16().unwrap();
        for _ in 0..3 {
            r.get_u16().unwrap();
        }
        added.push((id, ty));
    }
    while r.get_u16().unwrap() != 0 {
        for _ in 0..3 {
            r.get_u16().unwrap();
        }
    }
    let mut eaten = Vec::new();
    loop {
        let id = r.get_u16().unwrap();
        if id == 0 {
            break;
        }
        eaten.push((id, r.get_u16().unwrap()));
    }
    (added, eaten)
}

fn utf16z(s: &str) -> Vec<u8> {
    let mut out: Vec<u8> = s.encode_utf16().flat_map(u16::to_le_bytes).collect();
    out.extend_from_slice(&[0, 0]);
    out
}

fn config() -> Config {
    let mut config = Config::default();
    config.world.map_hw = 2000.0;
    config.world.map_hh = 2000.0;
    config.world.cell_limit = 2048;
    config.pellet.count = 0;
    config.virus.count = 0;
    config.server.max_connections = 8;
    config
}

fn addr() -> SocketAddr {
    "127.0.0.1:5000".parse().unwrap()
}

fn join(game: &mut GameState) -> (u8, Arc<Recorder>) {
    let t = Arc::new(Recorder::default());
    let id = game.join(addr(), Handshake::default(), t.clone()).unwrap();
    (id, t)
}

#[test]
fn spawn_request_places_a_cell_and_announces_it() {
    let mut game = GameState::new(Engine::with_seed(config(), 1));
    let (id, t) = join(&mut game);
    let (_, other) = join(&mut game);

    let mut spawn = vec![1];
    spawn.extend(utf16z("tester"));
    spawn.extend(utf16z("skin"));
    game.handle_packet(id, &spawn).unwrap();

    let mut events = Vec::new();
    for _ in 0..3 {
        events.extend(game.tick());
    }
    assert!(events.contains(&EngineEvent::Spawned(id)));

    let c = game.engine.controller(id).unwrap();
    assert_eq!(c.name(), "tester");
    assert_eq!(c.cells.len(), 1);
    let cell = c.cells[0];

    let ops = t.ops();
    let info = ops.iter().position(|&op| op == 3).unwrap();
    assert_eq!(ops[info + 1], 2, "clear follows the player info");
    assert_eq!(other.packets(3).len(), 1);

    let seen = t
        .packets(4)
        .iter()
        .any(|p| added_and_eaten(p).0.contains(&(cell, id as u16)));
    assert!(seen);
}

#[test]
fn eaten_player_is_reported_and_gets_stats() {
    let mut game = GameState::new(Engine::with_seed(config(), 2));
    let (a, ta) = join(&mut game);
    let (b, tb) = join(&mut game);
    let big = game
        .engine
        .insert_cell(Vec2::ZERO, 200.0, CellKind::Player(a), Boost::NONE)
        .unwrap();
    let small = game
        .engine
        .insert_cell(Vec2::new(600.0, 0.0), 40.0, CellKind::Player(b), Boost::NONE)
        .unwrap();

    let mut died = false;
    for _ in 0..200 {
        if game.tick().contains(&EngineEvent::Died(b)) {
            died = true;
            break;
        }
    }
    assert!(died);
    assert_eq!(game.engine.controller(a).unwrap().kills, 1);

    let last = ta.packets(4).pop().unwrap();
    assert_eq!(added_and_eaten(&last).1, vec![(small, big)]);

    let stats = tb.packets(7);
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].len(), 13);
    assert_eq!(&stats[0][1..5], &0u32.to_le_bytes());
}

#[test]
fn oversize_world_restarts_and_clears_everyone() {
    let mut config = config();
    config.world.restart_mult = 0.01;
    let mut game = GameState::new(Engine::with_seed(config, 3));
    let (a, ta) = join(&mut game);
    let (_, tb) = join(&mut game);
    game.engine
        .insert_cell(Vec2::ZERO, 500.0, CellKind::Player(a), Boost::NONE)
        .unwrap();

    assert!(game.tick().is_empty());
    assert_eq!(game.tick(), vec![EngineEvent::Restarted]);
    assert!(!game.engine.controller(a).unwrap().alive());
    assert_eq!(ta.packets(2).len(), 1);
    assert_eq!(tb.packets(2).len(), 1);
}

#[test]
fn backed_up_socket_skips_deltas() {
    let mut game = GameState::new(Engine::with_seed(config(), 4));
    let (a, t) = join(&mut game);
    game.handle_packet(a, &[2]).unwrap();
    game.engine
        .insert_cell(Vec2::ZERO, 100.0, CellKind::Virus, Boost::NONE)
        .unwrap();
    t.buffered.store(usize::MAX, Ordering::Relaxed);

    for _ in 0..5 {
        game.tick();
    }
    assert!(t.packets(4).is_empty());
    assert_eq!(game.skipped_deltas, 5);

    t.buffered.store(0, Ordering::Relaxed);
    game.tick();
    let deltas = t.packets(4);
    assert_eq!(deltas.len(), 1);
    assert_eq!(added_and_eaten(&deltas[0]).0.len(), 1);
    assert!(game.engine.controller(a).is_some());
}

#[test]
fn dead_player_is_streamed_nothing_until_spectating() {
    let mut game = GameState::new(Engine::with_seed(config(), 7));
    let (a, t) = join(&mut game);
    game.engine
        .insert_cell(Vec2::new(100.0, 0.0), 10.0, CellKind::Pellet, Boost::NONE)
        .unwrap();

    game.tick();
    game.tick();
    let deltas = t.packets(4);
    assert_eq!(deltas.len(), 2);
    assert!(deltas.iter().all(|d| added_and_eaten(d).0.is_empty()));

    game.handle_packet(a, &[2]).unwrap();
    game.tick();
    let last = t.packets(4).pop().unwrap();
    assert_eq!(added_and_eaten(&last).0.len(), 1);
}

#[test]
fn leaderboard_goes_out_at_its_own_rate() {
    let mut game = GameState::new(Engine::with_seed(config(), 5));
    let (a, t) = join(&mut game);
    game.engine
        .insert_cell(Vec2::ZERO, 100.0, CellKind::Player(a), Boost::NONE)
        .unwrap();

    // 25 tps at 2 boards per second: one every 12 ticks.
    for _ in 0..11 {
        game.tick();
    }
    assert!(t.packets(5).is_empty());
    game.tick();
    let boards = t.packets(5);
    assert_eq!(boards.len(), 1);
    assert_eq!(&boards[0][..], &[5, 0, 0, 1, a]);
    assert!(!t.packets(6).is_empty());
}

#[test]
fn leaving_frees_cells_and_scratch() {
    let mut game = GameState::new(Engine::with_seed(config(), 6));
    let (a, _t) = join(&mut game);
    game.engine
        .insert_cell(Vec2::ZERO, 100.0, CellKind::Player(a), Boost::NONE)
        .unwrap();
    game.tick();
    assert_eq!(game.free_slots(), 7);

    game.leave(a);
    game.tick();
    assert_eq!(game.free_slots(), 8);
    assert_eq!(game.engine.arena().live_count(), 0);
    assert!(game.clients.is_empty());
}
