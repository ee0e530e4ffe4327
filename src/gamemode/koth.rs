use rand::Rng;

use super::{puff, update_point_sidebar, FfaBehavior, GameContext, Gamemode, GamemodeError, WinState};
use crate::state::vector::Vector3;

const PARTICLE_INTERVAL_SECS: f64 = 0.08;
const PARTICLE_ROTATION_SPEED: f64 = 3.0;
/// Vertical tolerance for standing on the hill
const HILL_HEIGHT: f32 = 1.0;

const COLOR_FREE: u32 = 0xaaaaaa;
const COLOR_HELD: u32 = 0x00b300;
const COLOR_CONTESTED: u32 = 0xb54e00;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hill {
    pub center: Vector3,
    pub radius: f32,
}

impl Hill {
    pub fn contains(&self, position: &Vector3) -> bool {
        let horizontal = (position.x - self.center.x).hypot(position.z - self.center.z);
        horizontal < self.radius && (position.y - self.center.y).abs() < HILL_HEIGHT
    }
}

/// A lone player on the hill scores a point per second; the hill moves
/// after `points_to_event` seconds of capture.
#[derive(Debug, Default)]
pub struct KingOfTheHill {
    ffa: FfaBehavior,
    win: WinState,
    hill: Option<Hill>,
    cap_time_since_reset: u32,
    last_particle_time: f64,
}

impl KingOfTheHill {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hill(&self) -> Option<Hill> {
        self.hill
    }

    pub fn is_announcing_win(&self) -> bool {
        self.win.is_active()
    }

    fn randomize_hill(&mut self, ctx: &GameContext) {
        let points = &ctx.map.capture_points;
        if points.is_empty() {
            log::error!("No capture points available for the hill");
            return;
        }
        let index = rand::thread_rng().gen_range(0..points.len());
        let mut point = &points[index];
        if let Some(hill) = self.hill {
            if point.position.distance_to(&hill.center) < 1.0 {
                point = &points[(index + 1) % points.len()];
            }
        }
        self.hill = Some(Hill {
            center: point.position,
            radius: point.scale,
        });
        log::info!(
            "Hill set to ({}, {}, {})",
            point.position.x,
            point.position.y,
            point.position.z
        );
    }

    fn players_on_hill(&self, ctx: &GameContext) -> Vec<u64> {
        let Some(hill) = self.hill else {
            return Vec::new();
        };
        ctx.players
            .players()
            .filter(|p| !p.is_spectating() && hill.contains(&p.position))
            .map(|p| p.id)
            .collect()
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
        // keep a steady one-second cadence while holding, resync after a gap
        extras.last_point_increment_time = if elapsed < 2.0 {
            extras.last_point_increment_time + 1.0
        } else {
            now
        };

        if extras.points >= ctx.config.points_to_win {
            self.win.announce(ctx, holder_id);
        }

        self.cap_time_since_reset += 1;
        if self.cap_time_since_reset >= ctx.config.points_to_event {
            self.cap_time_since_reset = 0;
            self.randomize_hill(ctx);
        }
    }

    fn emit_hill_particles(&mut self, ctx: &mut GameContext, on_hill: usize) {
        let Some(hill) = self.hill else {
            return;
        };
        if ctx.now - self.last_particle_time <= PARTICLE_INTERVAL_SECS {
            return;
        }
        self.last_particle_time = ctx.now;

        let angle = ctx.now * PARTICLE_ROTATION_SPEED;
        let position = Vector3::new(
            hill.center.x + angle.cos() as f32 * hill.radius,
            hill.center.y,
            hill.center.z + angle.sin() as f32 * hill.radius,
        );
        let color = match on_hill {
            0 => COLOR_FREE,
            1 => COLOR_HELD,
            _ => COLOR_CONTESTED,
        };
        ctx.emit_particles(puff(position, Vector3::new(0.0, 0.3, 0.0), 0.0, 3.0, 0.2, color));
    }
}

impl Gamemode for KingOfTheHill {
    fn name(&self) -> &'static str {
        "koth"
    }

    fn init(&mut self, ctx: &mut GameContext) -> Result<(), GamemodeError> {
        if ctx.map.capture_points.is_empty() {
            return Err(GamemodeError::MissingMapData("capture points"));
        }
        self.randomize_hill(ctx);
        log::info!("King of the Hill initialized");
        Ok(())
    }

    fn tick(&mut self, ctx: &mut GameContext) {
        self.ffa.tick(ctx);

        if self.win.is_active() {
            if self.win.update(ctx) {
                self.ffa.reset_after_win(ctx);
                self.cap_time_since_reset = 0;
                self.randomize_hill(ctx);
            }
            return;
        }

        if self.hill.is_none() {
            self.randomize_hill(ctx);
        }

        let on_hill = self.players_on_hill(ctx);
        if let [holder] = on_hill[..] {
            self.score_holder(ctx, holder);
        }

        let hill = self.hill;
        for player in ctx.players.players_mut() {
            player.direction_indicator_vector = match hill {
                Some(_) if player.is_spectating() => None,
                Some(hill) if !hill.contains(&player.position) => Some(hill.center),
                _ => None,
            };
        }

        self.emit_hill_particles(ctx, on_hill.len());
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

        let on_hill = self.players_on_hill(ctx);
        let holder_name = match on_hill[..] {
            [holder] => ctx.players.get(holder).map(|p| p.name.clone()),
            _ => None,
        };
        let time_to_move = ctx.config.points_to_event.saturating_sub(self.cap_time_since_reset);

        for id in ctx.players.ids() {
            let spectating = ctx.players.get(id).is_some_and(|p| p.is_spectating());
            if spectating {
                continue;
            }
            let (first, second) = match (&on_hill[..], &holder_name) {
                ([holder], _) if *holder == id => (
                    "&ayou are capturing".to_string(),
                    format!("&c{} seconds to move", time_to_move),
                ),
                (_, Some(name)) => (
                    format!("&c{} is capturing ", name),
                    format!("&c{} seconds to move", time_to_move),
                ),
                ([_, _, ..], None) => ("&ccapture blocked >:)".to_string(), String::new()),
                _ => (
                    "&6capture point free".to_string(),
                    format!("&6{} seconds to move", time_to_move),
                ),
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::map::{CapturePoint, MapData};
    use crate::gamemode::test_support::World;
    use crate::utils::config::Config;

    fn world(points_to_win: u32) -> World {
        let mut map = MapData::empty("hills");
        map.capture_points.push(CapturePoint {
            position: Vector3::new(10.0, 0.0, 10.0),
            scale: 2.0,
        });
        let config = Config {
            points_to_win,
            points_to_event: 1000,
            ..Config::default()
        };
        let mut world = World::new(config, map);
        world.join(1, Vector3::new(10.5, 0.2, 10.0));
        world.join(2, Vector3::new(-20.0, 0.0, 0.0));
        world
    }

    fn started(world: &mut World) -> KingOfTheHill {
        let mut mode = KingOfTheHill::new();
        mode.init(&mut world.ctx(0.0)).unwrap();
        mode
    }

    #[test]
    fn test_hill_bounds() {
        let hill = Hill {
            center: Vector3::new(0.0, 0.0, 0.0),
            radius: 2.0,
        };
        assert!(hill.contains(&Vector3::new(1.9, 0.9, 0.0)));
        assert!(!hill.contains(&Vector3::new(2.0, 0.0, 0.0)));
        assert!(!hill.contains(&Vector3::new(0.0, 1.0, 0.0)));
    }

    #[test]
    fn test_init_requires_capture_points() {
        let mut world = World::new(Config::default(), MapData::empty("flat"));
        let mut mode = KingOfTheHill::new();
        assert!(mode.init(&mut world.ctx(0.0)).is_err());
    }

    #[test]
    fn test_holder_scores_one_point_per_second() {
        let mut world = world(100);
        let mut mode = started(&mut world);
        world.players.extras_mut(1).unwrap().last_point_increment_time = 0.0;

        // 15 Hz ticks for four seconds
        for step in 1..=60 {
            mode.tick(&mut world.ctx(step as f64 / 15.0));
        }
        assert_eq!(world.players.extras(1).unwrap().points, 4);
        assert_eq!(world.players.extras(2).unwrap().points, 0);
    }

    #[test]
    fn test_win_reached_exactly_once() {
        let mut world = world(3);
        let mut mode = started(&mut world);

        let mut announced = 0;
        for step in 1..=16 {
            let was_active = mode.is_announcing_win();
            mode.tick(&mut world.ctx(step as f64 * 0.25));
            if !was_active && mode.is_announcing_win() {
                announced += 1;
            }
        }
        assert_eq!(announced, 1);
        assert_eq!(world.players.extras(1).unwrap().points, 3);
        assert_eq!(world.players.get(2).unwrap().player_spectating, 1);
    }

    #[test]
    fn test_contested_hill_scores_nothing() {
        let mut world = world(100);
        let mut mode = started(&mut world);
        world.players.get_mut(2).unwrap().position = Vector3::new(9.5, 0.0, 10.0);

        for step in 1..=8 {
            mode.tick(&mut world.ctx(step as f64 * 0.5));
        }
        assert_eq!(world.players.extras(1).unwrap().points, 0);
        mode.on_periodic_cleanup(&mut world.ctx(4.0));
        assert_eq!(world.players.get(1).unwrap().game_msgs[0], "&ccapture blocked >:)");
    }

    #[test]
    fn test_direction_indicators() {
        let mut world = world(100);
        let mut mode = started(&mut world);
        mode.tick(&mut world.ctx(0.5));
        assert_eq!(world.players.get(1).unwrap().direction_indicator_vector, None);
        assert_eq!(
            world.players.get(2).unwrap().direction_indicator_vector,
            Some(Vector3::new(10.0, 0.0, 10.0))
        );
    }
}
