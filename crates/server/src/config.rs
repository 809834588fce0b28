//! Server configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{error, info};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub world: WorldConfig,
    #[serde(default)]
    pub pellet: PelletConfig,
    #[serde(default)]
    pub virus: VirusConfig,
    #[serde(default)]
    pub mother: MotherConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub eject: EjectConfig,
}

impl Config {
    /// Load configuration from `config.toml` or use defaults.
    ///
    /// The game mode preset named in `[server]` is applied on top.
    pub fn load() -> anyhow::Result<Self> {
        let path = Path::new("config.toml");
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<Self>(&contents)?
        } else {
            info!("No config.toml found, creating default config");
            let default_config = Self::default();
            std::fs::write(path, toml::to_string_pretty(&default_config)?)?;
            default_config
        };
        let mode = config.server.gamemode.clone();
        config.apply_gamemode(&mode);
        Ok(config)
    }

    /// Override fields with a named game mode preset.
    ///
    /// Unknown names are logged and leave the configuration untouched.
    pub fn apply_gamemode(&mut self, mode: &str) {
        let (w, pl, v, p, e) = (
            &mut self.world,
            &mut self.pellet,
            &mut self.virus,
            &mut self.player,
            &mut self.eject,
        );
        match mode {
            "default" => {}
            "ffa" => {
                w.time_scale = 1.2;
                w.map_hw = 12000.0;
                w.map_hh = 12000.0;
                p.max_cells = 16;
                p.merge_new_ver = false;
                p.merge_time = 20.0;
                p.merge_increase = 2.0;
                p.view_scale = 1.3;
                p.spawn_size = 200.0;
                p.spawn_delay = 1500.0;
                p.decay_min_size = 1000.0;
                v.feed_times = 8;
                v.split_boost = 780.0;
                v.count = 50;
                v.size = 100.0;
                v.monotone_pop = false;
                v.push = false;
                e.size = 39.0;
                e.loss = 43.0;
                e.delay = 150.0;
                e.max_age = 30_000.0;
                pl.count = 5000;
                pl.size = 20.0;
            }
            "mega" => {
                w.time_scale = 1.2;
                w.map_hw = 30000.0;
                w.map_hh = 30000.0;
                p.max_cells = 128;
                p.merge_new_ver = true;
                p.autosplit_size = 0.0;
                p.merge_time = 4.0;
                p.spawn_size = 1500.0;
                v.count = 250;
                v.monotone_pop = true;
                e.size = 38.0;
                e.loss = 38.4;
                e.delay = 50.0;
                pl.count = 5000;
            }
            "omega" => {
                w.time_scale = 1.2;
                w.map_hw = 26000.0;
                w.map_hh = 26000.0;
                p.max_cells = 369;
                p.merge_new_ver = true;
                p.autosplit_size = 0.0;
                p.merge_time = 5.0;
                p.view_scale = 1.1;
                p.spawn_size = 500.0;
                p.spawn_delay = 1500.0;
                p.min_split_size = 150.0;
                p.no_colli_delay = 550.0;
                p.no_eject_delay = 250.0;
                p.static_decay = 1.0;
                p.dynamic_decay = 1.0;
                p.decay_min_size = 800.0;
                p.safe_spawn_radius = 1.2;
                p.normalize_thresh_mass = 100000.0;
                v.count = 20;
                v.size = 200.0;
                v.push = true;
                v.monotone_pop = true;
                e.size = 38.0;
                e.loss = 38.4;
                e.delay = 100.0;
                pl.count = 5000;
            }
            "crazy" => {
                w.map_hw = (i16::MAX >> 2) as f32;
                w.map_hh = (i16::MAX >> 2) as f32;
                p.max_cells = 200;
                p.merge_new_ver = true;
                p.merge_time = 5.0;
                p.spawn_size = 1500.0;
                v.count = 100;
                v.monotone_pop = true;
                e.size = 38.0;
                e.loss = 41.0;
                e.delay = 80.0;
                pl.count = 1000;
            }
            "selfeed" => {
                w.time_scale = 1.2;
                w.map_hw = 20000.0;
                w.map_hh = 20000.0;
                p.max_cells = 64;
                p.merge_new_ver = true;
                p.autosplit_size = 0.0;
                p.merge_time = 0.0;
                p.no_merge_delay = 900.0;
                p.speed = 2.0;
                p.view_scale = 1.2;
                p.spawn_size = 1500.0;
                p.spawn_delay = 1500.0;
                p.min_split_size = 150.0;
                p.min_eject_size = 100.0;
                p.safe_spawn_radius = 1.2;
                p.normalize_thresh_mass = 100000.0;
                v.count = 0;
                v.size = 200.0;
                v.push = true;
                v.monotone_pop = true;
                e.size = 85.0;
                e.loss = 80.0;
                e.delay = 100.0;
                pl.count = 5000;
            }
            "solotrick-ffa" => {
                w.map_hw = 10000.0;
                w.map_hh = 10000.0;
                p.min_split_size = 150.0;
                p.max_cells = 16;
                p.merge_new_ver = true;
                p.autosplit_delay = 5.0;
                p.dynamic_decay = 0.25;
                p.merge_time = 4.0;
                p.spawn_size = 1000.0;
                v.count = 0;
                v.monotone_pop = true;
                e.size = 40.0;
                e.loss = 40.4;
                e.delay = 10.0;
                pl.count = 5000;
            }
            other => {
                error!("Unknown gamemode \"{}\", using default", other);
                self.server.gamemode = "default".to_string();
            }
        }
    }

    /// Simulated milliseconds per tick.
    #[inline]
    pub fn dt(&self) -> f32 {
        1000.0 / self.world.tps.max(1) as f32 * self.world.time_scale
    }

    /// Real time between ticks.
    #[inline]
    pub fn tick_interval_ms(&self) -> u64 {
        (1000 / self.world.tps.max(1)) as u64
    }

    /// Radius at which a fed virus pops.
    pub fn virus_max_size(&self) -> f32 {
        (self.virus.size * self.virus.size
            + self.eject.size * self.eject.size * self.virus.feed_times as f32)
            .sqrt()
    }
}

/// Server networking and general settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bind address.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Path prefix the websocket is served under (empty = any).
    #[serde(default)]
    pub endpoint: String,
    /// Maximum connections, also the number of pooled scratch buffers.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Game mode preset name.
    #[serde(default = "default_gamemode")]
    pub gamemode: String,
    /// Server name shown in logs.
    #[serde(default = "default_name")]
    pub name: String,
    /// Outbound bytes above which a client's tick packet is skipped.
    #[serde(default = "default_socket_watermark")]
    pub socket_watermark: usize,
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            endpoint: String::new(),
            max_connections: default_max_connections(),
            gamemode: default_gamemode(),
            name: default_name(),
            socket_watermark: default_socket_watermark(),
            handshake_timeout_ms: default_handshake_timeout(),
        }
    }
}

fn default_port() -> u16 {
    3000
}
fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_max_connections() -> usize {
    250
}
fn default_gamemode() -> String {
    "default".to_string()
}
fn default_name() -> String {
    "OgarX".to_string()
}
fn default_socket_watermark() -> usize {
    1024 * 1024
}
fn default_handshake_timeout() -> u64 {
    3000
}

/// Simulation and world geometry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorldConfig {
    /// Ticks per second.
    #[serde(default = "default_tps")]
    pub tps: u32,
    /// Simulated time multiplier applied to every tick.
    #[serde(default = "default_one")]
    pub time_scale: f32,
    /// Arena capacity, at most 65536.
    #[serde(default = "default_cell_limit")]
    pub cell_limit: usize,
    #[serde(default = "default_map_half")]
    pub map_hw: f32,
    #[serde(default = "default_map_half")]
    pub map_hh: f32,
    /// Pellets and viruses spawned per tick at most.
    #[serde(default = "default_max_cell_per_tick")]
    pub max_cell_per_tick: usize,
    #[serde(default = "default_quadtree_max_items")]
    pub quadtree_max_items: usize,
    #[serde(default = "default_quadtree_max_level")]
    pub quadtree_max_level: u32,
    #[serde(default = "default_safe_spawn_tries")]
    pub safe_spawn_tries: u32,
    /// World resets once a score exceeds map area / 100 times this.
    #[serde(default = "default_restart_mult")]
    pub restart_mult: f32,
    /// Kill the oversize player instead of restarting the world.
    #[serde(default)]
    pub kill_oversize: bool,
    #[serde(default = "default_leaderboard_tps")]
    pub leaderboard_tps: u32,
    #[serde(default = "default_minimap_tps")]
    pub minimap_tps: u32,
    /// Overlap depth past circle contact needed to eat.
    #[serde(default = "default_eat_overlap")]
    pub eat_overlap: f32,
    /// Minimum radius ratio between eater and prey.
    #[serde(default = "default_eat_mult")]
    pub eat_mult: f32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            tps: default_tps(),
            time_scale: default_one(),
            cell_limit: default_cell_limit(),
            map_hw: default_map_half(),
            map_hh: default_map_half(),
            max_cell_per_tick: default_max_cell_per_tick(),
            quadtree_max_items: default_quadtree_max_items(),
            quadtree_max_level: default_quadtree_max_level(),
            safe_spawn_tries: default_safe_spawn_tries(),
            restart_mult: default_restart_mult(),
            kill_oversize: false,
            leaderboard_tps: default_leaderboard_tps(),
            minimap_tps: default_minimap_tps(),
            eat_overlap: default_eat_overlap(),
            eat_mult: default_eat_mult(),
        }
    }
}

fn default_tps() -> u32 {
    25
}
fn default_one() -> f32 {
    1.0
}
fn default_cell_limit() -> usize {
    65536
}
fn default_map_half() -> f32 {
    20000.0
}
fn default_max_cell_per_tick() -> usize {
    50
}
fn default_quadtree_max_items() -> usize {
    24
}
fn default_quadtree_max_level() -> u32 {
    16
}
fn default_safe_spawn_tries() -> u32 {
    128
}
fn default_restart_mult() -> f32 {
    0.75
}
fn default_leaderboard_tps() -> u32 {
    2
}
fn default_minimap_tps() -> u32 {
    5
}
fn default_eat_overlap() -> f32 {
    3.0
}
fn default_eat_mult() -> f32 {
    1.140175425099138
}

/// Pellet (food) settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PelletConfig {
    #[serde(default = "default_pellet_count")]
    pub count: usize,
    #[serde(default = "default_pellet_size")]
    pub size: f32,
}

impl Default for PelletConfig {
    fn default() -> Self {
        Self {
            count: default_pellet_count(),
            size: default_pellet_size(),
        }
    }
}

fn default_pellet_count() -> usize {
    1000
}
fn default_pellet_size() -> f32 {
    10.0
}

/// Virus settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VirusConfig {
    #[serde(default = "default_virus_count")]
    pub count: usize,
    #[serde(default = "default_virus_size")]
    pub size: f32,
    /// Ejected blobs a virus absorbs before popping.
    #[serde(default = "default_virus_feed_times")]
    pub feed_times: u32,
    /// Feeding pushes the virus instead of only growing it.
    #[serde(default)]
    pub push: bool,
    #[serde(default = "default_virus_push_boost")]
    pub push_boost: f32,
    #[serde(default = "default_virus_split_boost")]
    pub split_boost: f32,
    #[serde(default = "default_virus_max_boost")]
    pub max_boost: f32,
    /// Players popped by a virus split into equal pieces.
    #[serde(default)]
    pub monotone_pop: bool,
    /// Spawn clearance as a multiple of the virus radius.
    #[serde(default = "default_virus_safe_radius")]
    pub safe_spawn_radius: f32,
}

impl Default for VirusConfig {
    fn default() -> Self {
        Self {
            count: default_virus_count(),
            size: default_virus_size(),
            feed_times: default_virus_feed_times(),
            push: false,
            push_boost: default_virus_push_boost(),
            split_boost: default_virus_split_boost(),
            max_boost: default_virus_max_boost(),
            monotone_pop: false,
            safe_spawn_radius: default_virus_safe_radius(),
        }
    }
}

fn default_virus_count() -> usize {
    30
}
fn default_virus_size() -> f32 {
    100.0
}
fn default_virus_feed_times() -> u32 {
    20
}
fn default_virus_push_boost() -> f32 {
    780.0
}
fn default_virus_split_boost() -> f32 {
    120.0
}
fn default_virus_max_boost() -> f32 {
    1000.0
}
fn default_virus_safe_radius() -> f32 {
    3.0
}

/// Mother cell settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MotherConfig {
    #[serde(default)]
    pub count: usize,
    #[serde(default = "default_mother_size")]
    pub size: f32,
    #[serde(default = "default_mother_interval")]
    pub pellet_interval_ms: f32,
    #[serde(default = "default_mother_burst")]
    pub pellets_per_burst: usize,
    /// Emitted pellets land up to this far past the mother's edge.
    #[serde(default = "default_mother_spread")]
    pub pellet_spread: f32,
    /// Mothers stay quiet while at least this many pellets exist.
    #[serde(default = "default_mother_max_pellets")]
    pub max_pellets: usize,
}

impl Default for MotherConfig {
    fn default() -> Self {
        Self {
            count: 0,
            size: default_mother_size(),
            pellet_interval_ms: default_mother_interval(),
            pellets_per_burst: default_mother_burst(),
            pellet_spread: default_mother_spread(),
            max_pellets: default_mother_max_pellets(),
        }
    }
}

fn default_mother_size() -> f32 {
    149.0
}
fn default_mother_interval() -> f32 {
    1000.0
}
fn default_mother_burst() -> usize {
    4
}
fn default_mother_spread() -> f32 {
    400.0
}
fn default_mother_max_pellets() -> usize {
    2000
}

/// Player settings. Delays are in milliseconds of simulated time.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlayerConfig {
    #[serde(default = "default_player_speed")]
    pub speed: f32,
    #[serde(default = "default_spawn_size")]
    pub spawn_size: f32,
    #[serde(default = "default_spawn_delay")]
    pub spawn_delay: f32,
    #[serde(default = "default_max_cells")]
    pub max_cells: usize,
    /// Split presses processed per tick.
    #[serde(default = "default_split_cap")]
    pub split_cap: u32,
    #[serde(default = "default_split_boost")]
    pub split_boost: f32,
    #[serde(default = "default_split_dist")]
    pub split_dist: f32,
    #[serde(default = "default_min_split_size")]
    pub min_split_size: f32,
    #[serde(default = "default_min_eject_size")]
    pub min_eject_size: f32,
    /// 0 disables autosplit.
    #[serde(default = "default_autosplit_size")]
    pub autosplit_size: f32,
    #[serde(default = "default_autosplit_delay")]
    pub autosplit_delay: f32,
    #[serde(default = "default_no_merge_delay")]
    pub no_merge_delay: f32,
    #[serde(default = "default_no_colli_delay")]
    pub no_colli_delay: f32,
    #[serde(default = "default_no_eject_delay")]
    pub no_eject_delay: f32,
    #[serde(default = "default_no_eject_pop_delay")]
    pub no_eject_pop_delay: f32,
    /// Seconds before split cells may merge again.
    #[serde(default = "default_one")]
    pub merge_time: f32,
    #[serde(default = "default_one")]
    pub merge_increase: f32,
    /// Use the radius-dependent merge delay.
    #[serde(default = "default_true")]
    pub merge_new_ver: bool,
    #[serde(default = "default_one")]
    pub view_scale: f32,
    #[serde(default = "default_view_min")]
    pub view_min: f32,
    /// Lifetime of respawn husks.
    #[serde(default = "default_dead_delay")]
    pub dead_delay: f32,
    #[serde(default = "default_name_max_length")]
    pub name_max_length: usize,
    #[serde(default = "default_player_safe_radius")]
    pub safe_spawn_radius: f32,
    #[serde(default = "default_decay_min_size")]
    pub decay_min_size: f32,
    #[serde(default = "default_one")]
    pub static_decay: f32,
    #[serde(default = "default_one")]
    pub dynamic_decay: f32,
    /// Score above which split, eject and merge scale with size. 0 disables.
    #[serde(default)]
    pub normalize_thresh_mass: f32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            speed: default_player_speed(),
            spawn_size: default_spawn_size(),
            spawn_delay: default_spawn_delay(),
            max_cells: default_max_cells(),
            split_cap: default_split_cap(),
            split_boost: default_split_boost(),
            split_dist: default_split_dist(),
            min_split_size: default_min_split_size(),
            min_eject_size: default_min_eject_size(),
            autosplit_size: default_autosplit_size(),
            autosplit_delay: default_autosplit_delay(),
            no_merge_delay: default_no_merge_delay(),
            no_colli_delay: default_no_colli_delay(),
            no_eject_delay: default_no_eject_delay(),
            no_eject_pop_delay: default_no_eject_pop_delay(),
            merge_time: default_one(),
            merge_increase: default_one(),
            merge_new_ver: default_true(),
            view_scale: default_one(),
            view_min: default_view_min(),
            dead_delay: default_dead_delay(),
            name_max_length: default_name_max_length(),
            safe_spawn_radius: default_player_safe_radius(),
            decay_min_size: default_decay_min_size(),
            static_decay: default_one(),
            dynamic_decay: default_one(),
            normalize_thresh_mass: 0.0,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_player_speed() -> f32 {
    1.5
}
fn default_spawn_size() -> f32 {
    32.0
}
fn default_spawn_delay() -> f32 {
    3000.0
}
fn default_max_cells() -> usize {
    16
}
fn default_split_cap() -> u32 {
    4
}
fn default_split_boost() -> f32 {
    800.0
}
fn default_split_dist() -> f32 {
    40.0
}
fn default_min_split_size() -> f32 {
    60.0
}
fn default_min_eject_size() -> f32 {
    60.0
}
fn default_autosplit_size() -> f32 {
    1500.0
}
fn default_autosplit_delay() -> f32 {
    100.0
}
fn default_no_merge_delay() -> f32 {
    650.0
}
fn default_no_colli_delay() -> f32 {
    650.0
}
fn default_no_eject_delay() -> f32 {
    200.0
}
fn default_no_eject_pop_delay() -> f32 {
    500.0
}
fn default_view_min() -> f32 {
    4000.0
}
fn default_dead_delay() -> f32 {
    5000.0
}
fn default_name_max_length() -> usize {
    16
}
fn default_player_safe_radius() -> f32 {
    1.5
}
fn default_decay_min_size() -> f32 {
    1000.0
}

/// Mass ejection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EjectConfig {
    #[serde(default = "default_eject_size")]
    pub size: f32,
    /// Radius removed from the ejecting cell, by quadrature.
    #[serde(default = "default_eject_loss")]
    pub loss: f32,
    #[serde(default = "default_eject_boost")]
    pub boost: f32,
    /// Cooldown between ejections.
    #[serde(default = "default_eject_delay")]
    pub delay: f32,
    /// Random angle spread in radians.
    #[serde(default = "default_eject_dispersion")]
    pub dispersion: f32,
    /// Ejected blobs older than this are removed.
    #[serde(default = "default_eject_max_age")]
    pub max_age: f32,
}

impl Default for EjectConfig {
    fn default() -> Self {
        Self {
            size: default_eject_size(),
            loss: default_eject_loss(),
            boost: default_eject_boost(),
            delay: default_eject_delay(),
            dispersion: default_eject_dispersion(),
            max_age: default_eject_max_age(),
        }
    }
}

fn default_eject_size() -> f32 {
    38.0
}
fn default_eject_loss() -> f32 {
    43.0
}
fn default_eject_boost() -> f32 {
    780.0
}
fn default_eject_delay() -> f32 {
    100.0
}
fn default_eject_dispersion() -> f32 {
    0.3
}
fn default_eject_max_age() -> f32 {
    10_000.0
}
