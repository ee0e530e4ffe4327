use super::{FfaBehavior, GameContext, Gamemode, GamemodeError};
use crate::state::events::ParticleEmitter;
use crate::state::vector::Vector3;

const TEAM_COLORS: [&str; 2] = ["&c", "&9"];
const TEAM_NAMES: [&str; 2] = ["red", "blue"];
const TEAM_BASE_COLORS: [[u8; 3]; 2] = [[220, 40, 40], [40, 90, 220]];
const TEAM_PARTICLE_COLORS: [u32; 2] = [0xff0000, 0x0000ff];
const HEALTH_INDICATOR_WHITE_RATIO: f32 = 0.35;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
    Waiting,
    InProgress,
    PostRound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoundEnd {
    Completed,
    Insufficient,
}

/// Blend an RGB colour toward white
pub fn mix_with_white(color: [u8; 3], white_ratio: f32) -> [u8; 3] {
    let ratio = white_ratio.clamp(0.0, 1.0);
    color.map(|c| (c as f32 * (1.0 - ratio) + 255.0 * ratio).round() as u8)
}

/// Two teams, timed rounds. A round lasts `points_to_win` seconds or ends
/// early once one team leads by `team_score_lead_to_win` kills.
#[derive(Debug)]
pub struct TeamDeathmatch {
    ffa: FfaBehavior,
    team_scores: [u32; 2],
    state: RoundState,
    round_end: Option<f64>,
    post_round_reset: Option<f64>,
    round_result: Option<String>,
}

impl Default for TeamDeathmatch {
    fn default() -> Self {
        Self {
            ffa: FfaBehavior::new(),
            team_scores: [0, 0],
            state: RoundState::Waiting,
            round_end: None,
            post_round_reset: None,
            round_result: None,
        }
    }
}

impl TeamDeathmatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RoundState {
        self.state
    }

    pub fn team_scores(&self) -> [u32; 2] {
        self.team_scores
    }

    fn team_of(ctx: &GameContext, player_id: u64) -> Option<usize> {
        match ctx.players.extras(player_id)?.team {
            0 => Some(0),
            1 => Some(1),
            _ => None,
        }
    }

    fn team_counts(ctx: &GameContext) -> [usize; 2] {
        let mut counts = [0, 0];
        for id in ctx.players.ids() {
            if let Some(team) = Self::team_of(ctx, id) {
                counts[team] += 1;
            }
        }
        counts
    }

    fn has_enough_players(ctx: &GameContext) -> bool {
        let [red, blue] = Self::team_counts(ctx);
        red + blue >= ctx.config.min_players_to_start && red > 0 && blue > 0
    }

    fn leading_team(&self) -> Option<usize> {
        let [red, blue] = self.team_scores;
        match red.cmp(&blue) {
            std::cmp::Ordering::Equal => None,
            std::cmp::Ordering::Greater => Some(0),
            std::cmp::Ordering::Less => Some(1),
        }
    }

    /// Put a player on the smaller team, red on a tie
    fn assign_team(ctx: &mut GameContext, player_id: u64) {
        let [red, blue] = Self::team_counts(ctx);
        let team = if red <= blue { 0 } else { 1 };
        let Some(extras) = ctx.players.extras_mut(player_id) else {
            return;
        };
        extras.team = team as i8;
        if Self::apply_team_look(ctx, player_id, team) {
            ctx.mark_players_dirty();
        }
    }

    /// Team colour prefix on the name and tinted health indicator.
    /// Returns whether anything changed.
    fn apply_team_look(ctx: &mut GameContext, player_id: u64, team: usize) -> bool {
        let Some(player) = ctx.players.get_mut(player_id) else {
            return false;
        };
        let mut changed = false;

        let prefix = TEAM_COLORS[team];
        if !player.name.starts_with(prefix) {
            if let Some(other) = TEAM_COLORS.iter().find(|c| **c != prefix && player.name.starts_with(**c)) {
                player.name = player.name[other.len()..].to_string();
            }
            player.name = format!("{}{}", prefix, player.name);
            player.forced = true;
            changed = true;
        }

        let tint = mix_with_white(TEAM_BASE_COLORS[team], HEALTH_INDICATOR_WHITE_RATIO);
        if player.health_indicator_color != tint {
            player.health_indicator_color = tint;
            changed = true;
        }
        changed
    }

    fn ensure_teams_assigned(ctx: &mut GameContext) {
        let mut updated = false;
        for id in ctx.players.ids() {
            match Self::team_of(ctx, id) {
                Some(team) => updated |= Self::apply_team_look(ctx, id, team),
                None => {
                    Self::assign_team(ctx, id);
                    updated = true;
                }
            }
        }
        if updated {
            ctx.mark_players_dirty();
        }
    }

    fn update_roster_state(&mut self, ctx: &mut GameContext) {
        match self.state {
            RoundState::InProgress if !Self::has_enough_players(ctx) => self.end_round(ctx, RoundEnd::Insufficient),
            RoundState::Waiting if Self::has_enough_players(ctx) => self.start_round(ctx),
            _ => {}
        }
    }

    fn start_round(&mut self, ctx: &mut GameContext) {
        self.team_scores = [0, 0];
        self.state = RoundState::InProgress;
        self.round_result = None;
        self.post_round_reset = None;
        self.round_end = Some(ctx.now + ctx.config.points_to_win as f64);
        ctx.outbox.broadcast_chat("&bteam Deathmatch starting!");
        log::info!("Team deathmatch round started");
        self.update_game_messages(ctx);
    }

    fn end_round(&mut self, ctx: &mut GameContext, reason: RoundEnd) {
        if self.state != RoundState::InProgress {
            return;
        }
        self.round_end = None;

        if reason == RoundEnd::Insufficient {
            self.state = RoundState::Waiting;
            self.post_round_reset = None;
            self.team_scores = [0, 0];
            self.round_result = None;
            log::info!("Team deathmatch round aborted, not enough players");
            self.update_game_messages(ctx);
            return;
        }

        self.state = RoundState::PostRound;
        self.post_round_reset = Some(ctx.now + ctx.config.respawn_delay_secs);

        match self.leading_team() {
            None => {
                self.round_result = Some("&eround ended in a draw".to_string());
                ctx.outbox.broadcast_chat("&eteam deathmatch round ended in a draw");
            }
            Some(team) => {
                self.round_result = Some(format!("{} wins the round", TEAM_NAMES[team]));
                ctx.outbox
                    .broadcast_chat(format!("{}{} &7team wins the round!", TEAM_COLORS[team], TEAM_NAMES[team]));
            }
        }
        log::info!("Team deathmatch round ended {:?}", self.team_scores);
        self.update_game_messages(ctx);
    }

    fn check_round_timers(&mut self, ctx: &mut GameContext) {
        let now = ctx.now;
        if self.state == RoundState::InProgress && self.round_end.is_some_and(|end| now >= end) {
            self.end_round(ctx, RoundEnd::Completed);
        }
        if self.state == RoundState::PostRound && self.post_round_reset.is_some_and(|at| now >= at) {
            self.reset_for_next_round(ctx);
        }
    }

    fn reset_for_next_round(&mut self, ctx: &mut GameContext) {
        self.team_scores = [0, 0];
        self.state = RoundState::Waiting;
        self.round_end = None;
        self.post_round_reset = None;
        self.round_result = None;
        self.ffa.reset_after_win(ctx);
        self.update_game_messages(ctx);
        self.update_roster_state(ctx);
    }

    fn update_game_messages(&self, ctx: &mut GameContext) {
        if ctx.players.is_empty() {
            return;
        }

        let countdown = self.round_end.map_or(0.0, |end| (end - ctx.now).ceil().max(0.0));
        let [red, blue] = self.team_scores;
        let scoreboard = format!(
            "{}{} &f{} &7vs {}{} &f{}",
            TEAM_COLORS[0], TEAM_NAMES[0], red, TEAM_COLORS[1], TEAM_NAMES[1], blue
        );
        let leading = self.leading_team();
        let enough = Self::has_enough_players(ctx);
        let [red_count, blue_count] = Self::team_counts(ctx);
        let min_players = ctx.config.min_players_to_start;

        for id in ctx.players.ids() {
            if ctx.players.get(id).is_some_and(|p| p.is_spectating()) {
                continue;
            }
            let team = Self::team_of(ctx, id);
            let (color, present, past) = match (leading, team) {
                (Some(lead), Some(team)) if lead == team => ("&a", "winning", "won"),
                (Some(_), Some(_)) => ("&c", "losing", "lost"),
                _ => ("&7", "tied", "tied"),
            };

            let header = match (self.state, &self.round_result) {
                (RoundState::InProgress, _) => scoreboard.clone(),
                (RoundState::PostRound, Some(result)) => format!("{}{}", color, result),
                _ if !enough => format!(
                    "&6waiting for enough players to start ({}/{})",
                    red_count + blue_count,
                    min_players
                ),
                _ => "&esomething broke.".to_string(),
            };
            let second = match self.state {
                RoundState::InProgress => format!("{}{}s remain. (you're {})", color, countdown, present),
                RoundState::PostRound => format!("{}your team {}.", color, past),
                RoundState::Waiting => String::new(),
            };

            ctx.set_message(id, 0, header, None);
            ctx.set_message(id, 1, second, None);
        }
    }

    fn emit_death_particles(ctx: &mut GameContext, player_id: u64, team: Option<usize>) {
        let Some(player) = ctx.players.get(player_id) else {
            return;
        };
        let position = player.position;
        ctx.emit_particles(ParticleEmitter {
            position,
            count: 24,
            velocity: Vector3::new(0.0, 1.0, 0.0),
            spread: 1.0,
            lifetime: 2.0,
            size: 0.1,
            color: TEAM_PARTICLE_COLORS[team.unwrap_or(0)],
        });
    }
}

impl Gamemode for TeamDeathmatch {
    fn name(&self) -> &'static str {
        "tdm"
    }

    fn init(&mut self, _ctx: &mut GameContext) -> Result<(), GamemodeError> {
        log::info!("Team deathmatch gamemode initialized");
        Ok(())
    }

    fn tick(&mut self, ctx: &mut GameContext) {
        self.ffa.tick(ctx);
        self.check_round_timers(ctx);
    }

    fn on_periodic_cleanup(&mut self, ctx: &mut GameContext) {
        self.ffa.on_periodic_cleanup(ctx);
        Self::ensure_teams_assigned(ctx);
        self.update_roster_state(ctx);
        self.update_game_messages(ctx);
    }

    fn on_player_connect(&mut self, ctx: &mut GameContext, player_id: u64) {
        Self::assign_team(ctx, player_id);
        self.update_roster_state(ctx);
        self.update_game_messages(ctx);
    }

    fn on_player_disconnect(&mut self, ctx: &mut GameContext, player_id: u64) {
        self.ffa.on_player_disconnect(ctx, player_id);
        if let Some(extras) = ctx.players.extras_mut(player_id) {
            extras.team = -1;
        }
        self.update_roster_state(ctx);
        self.update_game_messages(ctx);
    }

    fn on_player_death(&mut self, ctx: &mut GameContext, player_id: u64) -> bool {
        let killer = self.ffa.find_valid_killer(ctx, player_id);
        let handled = self.ffa.on_player_death(ctx, player_id);

        let victim_team = Self::team_of(ctx, player_id);
        Self::emit_death_particles(ctx, player_id, victim_team);

        let Some(killer_id) = killer else {
            return handled;
        };
        if self.state != RoundState::InProgress {
            return handled;
        }
        let (Some(killer_team), Some(victim_team)) = (Self::team_of(ctx, killer_id), victim_team) else {
            return handled;
        };
        if killer_team == victim_team {
            return handled;
        }

        self.team_scores[killer_team] += 1;
        ctx.mark_players_dirty();

        let [red, blue] = self.team_scores;
        let lead_to_win = ctx.config.team_score_lead_to_win;
        if lead_to_win > 0 && red.abs_diff(blue) >= lead_to_win {
            self.end_round(ctx, RoundEnd::Completed);
        } else {
            self.update_game_messages(ctx);
        }
        handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::map::MapData;
    use crate::gamemode::test_support::World;
    use crate::utils::config::Config;

    fn world(min_players: usize) -> World {
        let config = Config {
            min_players_to_start: min_players,
            points_to_win: 60,
            team_score_lead_to_win: 2,
            ..Config::default()
        };
        World::new(config, MapData::empty("arena"))
    }

    fn connect(world: &mut World, mode: &mut TeamDeathmatch, id: u64, now: f64) {
        world.join(id, Vector3::new(id as f32, 0.0, 0.0));
        mode.on_player_connect(&mut world.ctx(now), id);
    }

    fn kill(world: &mut World, mode: &mut TeamDeathmatch, victim: u64, killer: u64, now: f64) -> bool {
        let player = world.players.get_mut(victim).unwrap();
        player.health = 0.0;
        player.last_damage_time = Some(now);
        player.id_last_damaged_by = Some(killer);
        mode.on_player_death(&mut world.ctx(now), victim)
    }

    #[test]
    fn test_mix_with_white() {
        assert_eq!(mix_with_white([220, 40, 40], 0.35), [232, 115, 115]);
        assert_eq!(mix_with_white([0, 0, 0], 2.0), [255, 255, 255]);
    }

    #[test]
    fn test_teams_balanced_and_round_starts() {
        let mut world = world(2);
        let mut mode = TeamDeathmatch::new();
        connect(&mut world, &mut mode, 1, 0.0);
        assert_eq!(mode.state(), RoundState::Waiting);
        assert_eq!(world.players.get(1).unwrap().game_msgs[0], "&6waiting for enough players to start (1/2)");

        connect(&mut world, &mut mode, 2, 1.0);
        assert_eq!(world.players.extras(1).unwrap().team, 0);
        assert_eq!(world.players.extras(2).unwrap().team, 1);
        assert_eq!(world.players.get(2).unwrap().name, "&9p2");
        assert!(world.players.get(2).unwrap().forced);
        assert_eq!(mode.state(), RoundState::InProgress);
        assert_eq!(world.players.get(1).unwrap().game_msgs[0], "&cred &f0 &7vs &9blue &f0");
    }

    #[test]
    fn test_insufficient_players_resets_to_waiting() {
        let mut world = world(2);
        let mut mode = TeamDeathmatch::new();
        connect(&mut world, &mut mode, 1, 0.0);
        connect(&mut world, &mut mode, 2, 0.0);
        assert!(kill(&mut world, &mut mode, 2, 1, 1.0));
        assert_eq!(mode.team_scores(), [1, 0]);

        mode.on_player_disconnect(&mut world.ctx(2.0), 2);
        world.players.remove(2);
        assert_eq!(mode.state(), RoundState::Waiting);
        assert_eq!(mode.team_scores(), [0, 0]);
    }

    #[test]
    fn test_teamkill_scores_nothing() {
        let mut world = world(2);
        let mut mode = TeamDeathmatch::new();
        connect(&mut world, &mut mode, 1, 0.0);
        connect(&mut world, &mut mode, 2, 0.0);
        connect(&mut world, &mut mode, 3, 0.0);
        assert_eq!(world.players.extras(3).unwrap().team, 0);

        kill(&mut world, &mut mode, 3, 1, 1.0);
        assert_eq!(mode.team_scores(), [0, 0]);
    }

    #[test]
    fn test_score_lead_ends_round() {
        let mut world = world(2);
        let mut mode = TeamDeathmatch::new();
        connect(&mut world, &mut mode, 1, 0.0);
        connect(&mut world, &mut mode, 2, 0.0);

        kill(&mut world, &mut mode, 2, 1, 1.0);
        world.players.respawn(2, 1.5);
        world.players.get_mut(2).unwrap().player_spectating = -1;
        kill(&mut world, &mut mode, 2, 1, 2.0);

        assert_eq!(mode.state(), RoundState::PostRound);
        assert_eq!(world.players.get(1).unwrap().game_msgs[0], "&ared wins the round");
        assert_eq!(world.players.get(1).unwrap().game_msgs[1], "&ayour team won.");
    }

    #[test]
    fn test_timer_ends_round_then_resets() {
        let mut world = world(2);
        let mut mode = TeamDeathmatch::new();
        connect(&mut world, &mut mode, 1, 0.0);
        connect(&mut world, &mut mode, 2, 0.0);

        mode.tick(&mut world.ctx(61.0));
        assert_eq!(mode.state(), RoundState::PostRound);
        assert_eq!(world.players.get(1).unwrap().game_msgs[0], "&7&eround ended in a draw");

        mode.tick(&mut world.ctx(72.0));
        // enough players remain, so the next round starts straight away
        assert_eq!(mode.state(), RoundState::InProgress);
    }
}
