use rand::Rng;

use super::{puff, update_point_sidebar, FfaBehavior, GameContext, Gamemode, GamemodeError, WinState};
use crate::state::vector::Vector3;
use crate::state::world_item::WorldItem;
use crate::utils::itemdb::FLAG_ITEM_ID;

const PARTICLE_INTERVAL_SECS: f64 = 0.15;
const FLAG_PARTICLE_COLOR: u32 = 0x00aa00;

/// Solo capture the flag: holding the flag scores a point per second
#[derive(Debug, Default)]
pub struct SoloCaptureTheFlag {
    ffa: FfaBehavior,
    win: WinState,
    last_particle_time: f64,
}

impl SoloCaptureTheFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_announcing_win(&self) -> bool {
        self.win.is_active()
    }

    fn flag_holder(ctx: &GameContext) -> Option<u64> {
        ctx.players.players().find(|p| p.has_item(FLAG_ITEM_ID)).map(|p| p.id)
    }

    fn flag_in_world(ctx: &GameContext) -> Option<Vector3> {
        ctx.items.find_by_type(FLAG_ITEM_ID).map(|item| item.vector)
    }

    fn flag_exists(ctx: &GameContext) -> bool {
        Self::flag_in_world(ctx).is_some() || Self::flag_holder(ctx).is_some()
    }

    fn spawn_flag(ctx: &mut GameContext) {
        let Some(point) = ctx.map.random_item_respawn_point() else {
            log::error!("No item spawn points available for the flag");
            return;
        };
        let position = point.position;
        ctx.items.push_item(WorldItem::new(position, FLAG_ITEM_ID, ctx.now));
        log::info!("Flag spawned at ({}, {}, {})", position.x, position.y, position.z);
    }

    fn score_holder(&mut self, ctx: &mut GameContext, holder_id: u64) {
        let now = ctx.now;
        let Some(extras) = ctx.players.extras_mut(holder_id) else {
            return;
        };
        let elapsed = now - extras.last_point_increment_time;
        if elapsed < 1.0 {
            return;
        }
        extras.points += 1;
        extras.last_point_increment_time = if elapsed < 2.0 {
            extras.last_point_increment_time + 1.0
        } else {
            now
        };
        if extras.points >= ctx.config.points_to_win {
            self.win.announce(ctx, holder_id);
        }
    }
}

impl Gamemode for SoloCaptureTheFlag {
    fn name(&self) -> &'static str {
        "ctf"
    }

    fn init(&mut self, ctx: &mut GameContext) -> Result<(), GamemodeError> {
        if ctx.map.item_respawn_points.is_empty() {
            return Err(GamemodeError::MissingMapData("item respawn points"));
        }
        log::info!("Solo CTF gamemode initialized");
        Ok(())
    }

    fn tick(&mut self, ctx: &mut GameContext) {
        self.ffa.tick(ctx);

        if self.win.is_active() {
            if self.win.update(ctx) {
                self.ffa.reset_after_win(ctx);
                Self::spawn_flag(ctx);
            }
            return;
        }

        if !Self::flag_exists(ctx) {
            log::info!("No flag found, spawning a new one");
            Self::spawn_flag(ctx);
        }

        let holder = Self::flag_holder(ctx);
        if let Some(holder_id) = holder {
            self.score_holder(ctx, holder_id);
        }

        let target = match holder {
            Some(id) => ctx.players.get(id).map(|p| p.position),
            None => Self::flag_in_world(ctx),
        };
        for player in ctx.players.players_mut() {
            player.direction_indicator_vector = if player.is_spectating() || Some(player.id) == holder {
                None
            } else {
                target
            };
        }

        if ctx.now - self.last_particle_time > PARTICLE_INTERVAL_SECS {
            self.last_particle_time = ctx.now;
            let mut rng = rand::thread_rng();
            let base = target.unwrap_or(Vector3::ZERO);
            let position = Vector3::new(
                base.x + rng.gen_range(-0.5..0.5),
                base.y + rng.gen_range(-0.5..0.5),
                base.z + rng.gen_range(-0.5..0.5),
            );
            ctx.emit_particles(puff(position, Vector3::new(0.0, 0.5, 0.0), 0.3, 15.0, 0.04, FLAG_PARTICLE_COLOR));
        }

        ctx.mark_players_dirty();
    }

    fn on_periodic_cleanup(&mut self, ctx: &mut GameContext) {
        self.ffa.on_periodic_cleanup(ctx);
        if self.win.is_active() {
            return;
        }

        for player in ctx.players.players_mut() {
            player.do_physics = true;
        }

        let points_to_win = ctx.config.points_to_win;
        let holder = Self::flag_holder(ctx).and_then(|id| {
            let name = ctx.players.get(id)?.name.clone();
            let points = ctx.players.extras(id).map_or(0, |e| e.points);
            Some((id, name, points_to_win.saturating_sub(points)))
        });

        for id in ctx.players.ids() {
            let Some(player) = ctx.players.get(id) else {
                continue;
            };
            if player.is_spectating() {
                continue;
            }
            let personal = points_to_win.saturating_sub(ctx.players.extras(id).map_or(0, |e| e.points));
            let (first, second) = match &holder {
                Some((holder_id, _, _)) if *holder_id == id => (
                    "&ayou have the flag".to_string(),
                    format!("&a{} seconds. &4DON'T DIE.", personal),
                ),
                Some((_, name, remaining)) => (
                    format!("&c{} has the flag ", name),
                    format!("&c{} seconds remain", remaining),
                ),
                None => ("&6the flag has been dropped".to_string(), String::new()),
            };
            ctx.set_message(id, 0, first, None);
            ctx.set_message(id, 1, second, None);
        }

        update_point_sidebar(ctx);
    }

    fn on_player_disconnect(&mut self, ctx: &mut GameContext, player_id: u64) {
        self.ffa.on_player_disconnect(ctx, player_id);
    }

    fn on_player_death(&mut self, ctx: &mut GameContext, player_id: u64) -> bool {
        self.ffa.on_player_death(ctx, player_id)
    }

    /// Picking the flag up restarts the holder's count
    fn on_item_pickup(&mut self, ctx: &mut GameContext, player_id: u64, item_type: u32) {
        if item_type != FLAG_ITEM_ID {
            return;
        }
        let now = ctx.now;
        if let Some(extras) = ctx.players.extras_mut(player_id) {
            extras.points = 0;
            extras.last_point_increment_time = now;
        }
    }

    fn allows_timed_item_spawns(&self) -> bool {
        false
    }
}
