//! Win-condition policies.
//!
//! Every mode embeds [`FfaBehavior`] by value and delegates to it
//! explicitly for the hooks it does not replace.

pub mod bridge;
pub mod ctf;
pub mod ffa;
pub mod koth;
pub mod tdm;

use crate::domain::items::ItemManager;
use crate::domain::map::MapData;
use crate::domain::players::PlayerManager;
use crate::state::events::{Outbox, ParticleEmitter};
use crate::state::player::NOT_SPECTATING;
use crate::state::server_info::ServerInfo;
use crate::state::vector::Vector3;
use crate::utils::config::Config;

pub use bridge::Bridge;
pub use ctf::SoloCaptureTheFlag;
pub use ffa::{FfaBehavior, FreeForAll};
pub use koth::KingOfTheHill;
pub use tdm::TeamDeathmatch;

pub const SKY_DEFAULT: &str = "#000000";
pub const SKY_WIN: &str = "#FFFFFF";
/// Gravity applied to a winner floating during the announcement
pub const WINNER_GRAVITY: f32 = 2.5;

#[derive(Debug, thiserror::Error)]
pub enum GamemodeError {
    #[error("map has no {0}")]
    MissingMapData(&'static str),
}

/// Everything a gamemode may read or change during one hook call
pub struct GameContext<'a> {
    pub players: &'a mut PlayerManager,
    pub items: &'a mut ItemManager,
    pub outbox: &'a mut Outbox,
    pub server_info: &'a mut ServerInfo,
    pub config: &'a Config,
    pub map: &'a MapData,
    pub now: f64,
    /// Set when player state changed out of band and should be emitted
    pub players_dirty: bool,
}

impl GameContext<'_> {
    pub fn mark_players_dirty(&mut self) {
        self.players_dirty = true;
    }

    /// Set a timed message line; `timeout` seconds from now, or untimed
    pub fn set_message(&mut self, player_id: u64, slot: usize, message: impl Into<String>, timeout: Option<f64>) {
        let deadline = timeout.map(|t| self.now + t);
        if let Some(player) = self.players.get_mut(player_id) {
            player.set_game_message(slot, message, deadline);
            self.players_dirty = true;
        }
    }

    pub fn emit_particles(&mut self, emitter: ParticleEmitter) {
        self.outbox.emit_particles(emitter);
    }
}

pub trait Gamemode: Send {
    fn name(&self) -> &'static str;

    fn init(&mut self, ctx: &mut GameContext) -> Result<(), GamemodeError>;

    /// Every simulation tick
    fn tick(&mut self, ctx: &mut GameContext);

    /// Every cleanup tick
    fn on_periodic_cleanup(&mut self, ctx: &mut GameContext);

    fn on_player_connect(&mut self, _ctx: &mut GameContext, _player_id: u64) {}

    /// Called while the player is still in the store
    fn on_player_disconnect(&mut self, _ctx: &mut GameContext, _player_id: u64) {}

    /// Returns true when the mode took over death handling;
    /// otherwise the engine respawns the player.
    fn on_player_death(&mut self, ctx: &mut GameContext, player_id: u64) -> bool;

    fn on_item_pickup(&mut self, _ctx: &mut GameContext, _player_id: u64, _item_type: u32) {}

    /// Whether the item manager may spawn items on its timer
    fn allows_timed_item_spawns(&self) -> bool {
        true
    }
}

/// Build the mode named in the config; unknown names fall back to free-for-all
pub fn create_gamemode(name: &str) -> Box<dyn Gamemode> {
    match name {
        "ffa" => Box::new(FreeForAll::new()),
        "ctf" => Box::new(SoloCaptureTheFlag::new()),
        "koth" => Box::new(KingOfTheHill::new()),
        "tdm" => Box::new(TeamDeathmatch::new()),
        "bridge" => Box::new(Bridge::new()),
        other => {
            log::warn!("Unknown game mode {:?}, falling back to ffa", other);
            Box::new(FreeForAll::new())
        }
    }
}

/// Bring every player back for a fresh round: respawned with the base
/// inventory, scores cleared. World items are cleared and the sky reset.
pub fn reset_round(ctx: &mut GameContext) {
    for id in ctx.players.ids() {
        ctx.players.respawn(id, ctx.now);
        if let Some((player, extras)) = ctx.players.entry_mut(id) {
            player.player_spectating = NOT_SPECTATING;
            player.do_physics = true;
            player.direction_indicator_vector = None;
            player.set_game_message(0, "", None);
            player.set_game_message(1, "", None);

            extras.points = 0;
            extras.last_point_increment_time = 0.0;
            extras.kills = 0;
            extras.deaths = 0;
            extras.kill_streak = 0;
        }
    }
    ctx.items.clear();
    ctx.server_info.sky_color = SKY_DEFAULT.to_string();
    ctx.mark_players_dirty();
}

/// Announcement phase after someone reaches the point goal
#[derive(Debug, Default)]
pub struct WinState {
    winner: Option<u64>,
    reset_at: Option<f64>,
}

impl WinState {
    pub fn is_active(&self) -> bool {
        self.winner.is_some()
    }

    pub fn winner(&self) -> Option<u64> {
        self.winner
    }

    pub fn announce(&mut self, ctx: &mut GameContext, winner_id: u64) {
        self.winner = Some(winner_id);
        self.reset_at = Some(ctx.now + ctx.config.respawn_delay_secs);
        ctx.server_info.sky_color = SKY_WIN.to_string();

        if let Some(winner) = ctx.players.get_mut(winner_id) {
            winner.do_physics = false;
            winner.gravity = WINNER_GRAVITY;
            winner.forced = true;
            log::info!("{}({}) won the round", winner.name, winner_id);
        }
        ctx.mark_players_dirty();
    }

    /// Drive the announcement. Returns true on the tick the round was reset.
    pub fn update(&mut self, ctx: &mut GameContext) -> bool {
        let Some(winner_id) = self.winner else {
            return false;
        };

        if self.reset_at.is_some_and(|at| ctx.now >= at) {
            self.winner = None;
            self.reset_at = None;
            reset_round(ctx);
            log::info!("Round reset after win");
            return true;
        }

        let delay = Some(ctx.config.respawn_delay_secs);
        let winner_name = ctx
            .players
            .get(winner_id)
            .map(|p| p.name.clone())
            .unwrap_or_default();

        for id in ctx.players.ids() {
            if id == winner_id {
                ctx.set_message(id, 0, "&ayou have won!", delay);
            } else {
                if let Some(player) = ctx.players.get_mut(id) {
                    player.player_spectating = winner_id as i64;
                    player.inventory.clear();
                }
                ctx.set_message(id, 0, format!("&c{} has transcended.", winner_name), delay);
            }
            ctx.set_message(id, 1, "", delay);
        }
        false
    }
}

/// Player standing with the most points, if anyone has extras
pub(crate) fn points_leader(players: &PlayerManager) -> Option<(u64, u32)> {
    players
        .ids()
        .into_iter()
        .filter_map(|id| players.extras(id).map(|e| (id, e.points)))
        .fold(None, |best: Option<(u64, u32)>, (id, points)| match best {
            Some((_, top)) if top >= points => best,
            _ => Some((id, points)),
        })
}

/// Sidebar lines 1 and 2: own countdown and the leader's
pub(crate) fn update_point_sidebar(ctx: &mut GameContext) {
    let leader = points_leader(ctx.players);
    let leader_name = leader
        .and_then(|(id, _)| ctx.players.get(id))
        .map(|p| p.name.clone())
        .unwrap_or_default();
    let points_to_win = ctx.config.points_to_win;

    for id in ctx.players.ids() {
        let Some((player, extras)) = ctx.players.entry_mut(id) else {
            continue;
        };
        let personal = points_to_win.saturating_sub(extras.points);
        let mut color = "&a";
        match leader {
            Some((leader_id, _)) if leader_id == id => {
                player.set_sidebar_line(2, format!("{}you are leading", color));
            }
            Some((_, leader_points)) => {
                color = "&c";
                player.set_sidebar_line(
                    2,
                    format!("{}&c{} seconds for {}", color, points_to_win.saturating_sub(leader_points), leader_name),
                );
            }
            None => player.set_sidebar_line(2, ""),
        }
        player.set_sidebar_line(1, format!("{}{} seconds to win", color, personal));
    }
    ctx.mark_players_dirty();
}

/// Single-particle puff helper
pub(crate) fn puff(position: Vector3, velocity: Vector3, spread: f32, lifetime: f32, size: f32, color: u32) -> ParticleEmitter {
    ParticleEmitter {
        position,
        count: 1,
        velocity,
        spread,
        lifetime,
        size,
        color,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use super::*;
    use crate::state::player::Player;
    use crate::utils::itemdb::ItemDb;

    pub const VERSION: &str = "1";

    /// Owns everything a `GameContext` borrows
    pub struct World {
        pub players: PlayerManager,
        pub items: ItemManager,
        pub outbox: Outbox,
        pub server_info: ServerInfo,
        pub config: Arc<Config>,
        pub map: Arc<MapData>,
    }

    impl World {
        pub fn new(config: Config, map: MapData) -> Self {
            let config = Arc::new(config);
            let map = Arc::new(map);
            Self {
                players: PlayerManager::new(config.clone(), map.clone(), Arc::new(ItemDb::load()), VERSION),
                items: ItemManager::new(config.clone(), map.clone(), 0.0),
                outbox: Outbox::new(),
                server_info: ServerInfo::from_config(&config, VERSION),
                config,
                map,
            }
        }

        pub fn join(&mut self, id: u64, position: Vector3) {
            let raw = serde_json::to_value(Player::new(id, format!("p{}", id), VERSION)).unwrap();
            self.players.upsert(&raw, 0.0).unwrap();
            let player = self.players.get_mut(id).unwrap();
            player.position = position;
            player.forced = false;
        }

        pub fn ctx(&mut self, now: f64) -> GameContext<'_> {
            GameContext {
                players: &mut self.players,
                items: &mut self.items,
                outbox: &mut self.outbox,
                server_info: &mut self.server_info,
                config: &self.config,
                map: &self.map,
                now,
                players_dirty: false,
            }
        }
    }
}
