use std::collections::HashMap;

use super::{reset_round, GameContext, Gamemode, GamemodeError};
use crate::state::player::NOT_SPECTATING;

/// Damage older than this no longer credits a kill
pub const KILL_CREDIT_WINDOW_SECS: f64 = 5.0;

/// Kill/death bookkeeping and spectate-then-respawn cycle shared by every mode
#[derive(Debug, Default)]
pub struct FfaBehavior {
    /// Dead player id -> time of death
    spectate_timeouts: HashMap<u64, f64>,
}

impl FfaBehavior {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_waiting_to_respawn(&self, player_id: u64) -> bool {
        self.spectate_timeouts.contains_key(&player_id)
    }

    pub fn tick(&mut self, ctx: &mut GameContext) {
        let delay = ctx.config.respawn_delay_secs;
        let max_health = ctx.config.player_max_health;
        let now = ctx.now;

        let mut respawned = Vec::new();
        for (&id, &died_at) in &self.spectate_timeouts {
            if now - died_at > delay {
                ctx.players.respawn(id, now);
                if let Some(player) = ctx.players.get_mut(id) {
                    player.player_spectating = NOT_SPECTATING;
                }
                ctx.set_message(id, 0, "", None);
                ctx.set_message(id, 1, "", None);
                respawned.push(id);
            } else {
                let remaining = (delay + died_at - now).floor();
                ctx.set_message(id, 1, format!("&crespawn in {} seconds", remaining), Some(0.5));
            }
            if let Some(player) = ctx.players.get_mut(id) {
                player.health = max_health;
            }
        }
        for id in respawned {
            self.spectate_timeouts.remove(&id);
        }
    }

    /// Kill and death totals on the first sidebar line
    pub fn on_periodic_cleanup(&mut self, ctx: &mut GameContext) {
        for id in ctx.players.ids() {
            if let Some((player, extras)) = ctx.players.entry_mut(id) {
                player.game_msgs2 = vec![format!("&7{} kills, {} deaths", extras.kills, extras.deaths)];
            }
        }
    }

    pub fn on_player_disconnect(&mut self, _ctx: &mut GameContext, player_id: u64) {
        self.spectate_timeouts.remove(&player_id);
    }

    /// Who gets credit for this death, if anyone hit the player recently
    pub fn find_valid_killer(&self, ctx: &GameContext, victim_id: u64) -> Option<u64> {
        let victim = ctx.players.get(victim_id)?;
        let last_damage = victim.last_damage_time?;
        let killer_id = victim.id_last_damaged_by?;
        if killer_id == victim_id || ctx.now - last_damage >= KILL_CREDIT_WINDOW_SECS {
            return None;
        }
        ctx.players.contains(killer_id).then_some(killer_id)
    }

    /// With a valid killer the victim spectates them until the respawn delay
    /// passes and returns true. Without one, returns false so the engine
    /// respawns the player right away.
    pub fn on_player_death(&mut self, ctx: &mut GameContext, victim_id: u64) -> bool {
        if let Some(extras) = ctx.players.extras_mut(victim_id) {
            extras.deaths += 1;
            extras.kill_streak = 0;
        }

        let Some(killer_id) = self.find_valid_killer(ctx, victim_id) else {
            return false;
        };

        let delay = ctx.config.respawn_delay_secs;
        let killer_name = ctx.players.get(killer_id).map(|p| p.name.clone()).unwrap_or_default();
        let victim_name = ctx.players.get(victim_id).map(|p| p.name.clone()).unwrap_or_default();

        let watchers: Vec<u64> = ctx
            .players
            .players()
            .filter(|p| p.player_spectating == victim_id as i64)
            .map(|p| p.id)
            .collect();
        for id in watchers {
            if let Some(player) = ctx.players.get_mut(id) {
                player.player_spectating = killer_id as i64;
            }
            ctx.set_message(id, 0, format!("&cspectating {}", killer_name), Some(delay));
        }

        if let Some(victim) = ctx.players.get_mut(victim_id) {
            victim.player_spectating = killer_id as i64;
            victim.health = ctx.config.player_max_health;
        }
        let dropped = ctx.players.drop_all_items(victim_id, ctx.now);
        ctx.items.push_items(dropped);

        ctx.set_message(victim_id, 0, format!("&cspectating {}", killer_name), Some(delay));
        ctx.set_message(victim_id, 1, format!("&crespawn in {} seconds", delay), Some(2.0));
        ctx.set_message(killer_id, 0, format!("&akilled {}", victim_name), Some(5.0));

        self.spectate_timeouts.insert(victim_id, ctx.now);
        ctx.mark_players_dirty();

        self.on_player_kill(ctx, killer_id);
        true
    }

    pub fn on_player_kill(&mut self, ctx: &mut GameContext, killer_id: u64) {
        let Some(extras) = ctx.players.extras_mut(killer_id) else {
            return;
        };
        extras.kills += 1;
        extras.kill_streak += 1;
        let streak = extras.kill_streak;

        let color = match streak {
            15.. => "&g",
            10.. => "&6",
            5.. => "&b",
            _ => "&a",
        };
        if streak >= 3 {
            ctx.set_message(killer_id, 1, format!("{}{} kill streak", color, streak), Some(5.0));
        }
        if streak >= 5 {
            let name = ctx.players.get(killer_id).map(|p| p.name.clone()).unwrap_or_default();
            ctx.outbox.broadcast_chat(format!("{}{} is on a {} kill streak", color, name, streak));
        }
    }

    /// Round reset shared by modes with a win phase
    pub fn reset_after_win(&mut self, ctx: &mut GameContext) {
        self.spectate_timeouts.clear();
        reset_round(ctx);
    }
}

/// Plain free-for-all
#[derive(Debug, Default)]
pub struct FreeForAll {
    ffa: FfaBehavior,
}

impl FreeForAll {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Gamemode for FreeForAll {
    fn name(&self) -> &'static str {
        "ffa"
    }

    fn init(&mut self, _ctx: &mut GameContext) -> Result<(), GamemodeError> {
        log::info!("FFA gamemode initialized");
        Ok(())
    }

    fn tick(&mut self, ctx: &mut GameContext) {
        self.ffa.tick(ctx);
    }

    fn on_periodic_cleanup(&mut self, ctx: &mut GameContext) {
        self.ffa.on_periodic_cleanup(ctx);
    }

    fn on_player_disconnect(&mut self, ctx: &mut GameContext, player_id: u64) {
        self.ffa.on_player_disconnect(ctx, player_id);
    }

    fn on_player_death(&mut self, ctx: &mut GameContext, player_id: u64) -> bool {
        self.ffa.on_player_death(ctx, player_id)
    }
}
