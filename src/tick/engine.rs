use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use crate::domain::chat::{handle_chat_message, ChatAction};
use crate::domain::damage::{apply_damage, DamageOutcome};
use crate::domain::items::ItemManager;
use crate::domain::map::MapData;
use crate::domain::players::{PlayerManager, UpsertError};
use crate::domain::props::{PropDamageOutcome, PropManager};
use crate::domain::validator;
use crate::gamemode::{create_gamemode, GameContext, Gamemode};
use crate::physics::PhysicsBridge;
use crate::state::commands::EngineCommand;
use crate::state::events::{Outbox, Outgoing, ServerEvent};
use crate::state::server_info::{resident_memory_bytes, ServerInfo};
use crate::state::vector::Vector3;
use crate::tick::delta_sync::{snapshot_of, DeltaChannel, Emission};
use crate::tick::profiling::ComputeTimer;
use crate::utils::buffers::SmallIdVec;
use crate::utils::config::Config;
use crate::utils::itemdb::ItemDb;

/// Players below this height have fallen out of the map
pub const WORLD_FLOOR_Y: f32 = -150.0;
/// Longest simulated step handed to physics after a stall
const MAX_STEP_SECS: f64 = 0.25;

/// Remote endpoint and the player it speaks for, once bound
#[derive(Debug, Clone, Copy)]
struct Client {
    player_id: Option<u64>,
    last_seen: f64,
}

/// Authoritative game state plus the simulation and cleanup passes.
///
/// Everything runs on the caller's task: commands are applied between ticks,
/// and every outbound event is queued in the outbox for the loop to flush.
pub struct GameEngine {
    config: Arc<Config>,
    map: Arc<MapData>,
    item_db: Arc<ItemDb>,
    players: PlayerManager,
    items: ItemManager,
    props: PropManager,
    gamemode: Box<dyn Gamemode>,
    outbox: Outbox,
    server_info: ServerInfo,
    clients: HashMap<SocketAddr, Client>,
    player_channel: DeltaChannel,
    prop_channel: DeltaChannel,
    players_dirty: bool,
    announced_sky: String,
    last_tick: f64,
    tick_timer: ComputeTimer,
    cleanup_timer: ComputeTimer,
}

impl GameEngine {
    pub fn new(
        config: Arc<Config>,
        map: Arc<MapData>,
        item_db: Arc<ItemDb>,
        physics: PhysicsBridge,
        version: impl Into<String>,
        now: f64,
    ) -> Self {
        let version = version.into();
        let mut server_info = ServerInfo::from_config(&config, version.clone());
        server_info.map_name = map.name.clone();

        let mut props = PropManager::new(physics);
        for spec in &map.props {
            props.add_map_prop(spec);
        }

        let mut engine = Self {
            players: PlayerManager::new(config.clone(), map.clone(), item_db.clone(), version),
            items: ItemManager::new(config.clone(), map.clone(), now),
            props,
            gamemode: create_gamemode(&config.game_mode),
            outbox: Outbox::new(),
            announced_sky: server_info.sky_color.clone(),
            server_info,
            clients: HashMap::new(),
            player_channel: DeltaChannel::new(config.full_player_emit_interval_secs()),
            prop_channel: DeltaChannel::new(config.full_prop_emit_interval_secs()),
            players_dirty: false,
            last_tick: now,
            tick_timer: ComputeTimer::new(),
            cleanup_timer: ComputeTimer::new(),
            config,
            map,
            item_db,
        };

        let name = engine.gamemode.name();
        match engine.with_gamemode(now, |mode, ctx| mode.init(ctx)) {
            Ok(()) => log::info!("Gamemode {} ready on map {}", name, engine.map.name),
            Err(e) => log::error!("Gamemode {} failed to initialize: {}", name, e),
        }
        engine
    }

    /// Run a gamemode hook with a context over the engine's state
    fn with_gamemode<R>(&mut self, now: f64, hook: impl FnOnce(&mut dyn Gamemode, &mut GameContext) -> R) -> R {
        let mut ctx = GameContext {
            players: &mut self.players,
            items: &mut self.items,
            outbox: &mut self.outbox,
            server_info: &mut self.server_info,
            config: &self.config,
            map: &self.map,
            now,
            players_dirty: false,
        };
        let result = hook(self.gamemode.as_mut(), &mut ctx);
        self.players_dirty |= ctx.players_dirty;
        result
    }

    pub fn handle_command(&mut self, cmd: EngineCommand, now: f64) {
        match cmd {
            EngineCommand::PlayerData { addr, data } => {
                self.touch_client(addr, now);
                self.on_player_data(addr, &data, now);
            }
            EngineCommand::ChatMsg { addr, data } => {
                self.touch_client(addr, now);
                match validator::validate_chat_message(&data) {
                    Ok(msg) => {
                        let sender = self.bound_player(addr);
                        let action = handle_chat_message(msg, addr, sender, &self.players, &mut self.outbox);
                        if let ChatAction::Kill(id) = action {
                            if let Some(player) = self.players.get_mut(id) {
                                player.health = 0.0;
                            }
                            self.periodic_cleanup(now);
                        }
                    }
                    Err(e) => log::warn!("Invalid chat message from {}: {}", addr, e),
                }
            }
            EngineCommand::ApplyDamage { addr, data } => {
                self.touch_client(addr, now);
                let request = match validator::validate_damage_request(&data, self.players.server_version()) {
                    Ok(request) => request,
                    Err(e) => {
                        log::warn!("Invalid damage request from {}: {}", addr, e);
                        return;
                    }
                };
                if self.bound_player(addr) != Some(request.local_player.id) {
                    log::debug!("Damage request from {} for a player it does not own", addr);
                    return;
                }
                match apply_damage(&mut self.players, &self.item_db, &request, now, &mut self.outbox) {
                    DamageOutcome::Ignored => {}
                    DamageOutcome::Applied => self.players_dirty = true,
                    DamageOutcome::Killed { .. } => {
                        self.players_dirty = true;
                        self.periodic_cleanup(now);
                    }
                }
            }
            EngineCommand::ApplyPropDamage { addr, data } => {
                self.touch_client(addr, now);
                let request = match validator::validate_prop_damage_request(&data) {
                    Ok(request) => request,
                    Err(e) => {
                        log::warn!("Invalid prop damage request from {}: {}", addr, e);
                        return;
                    }
                };
                if self.bound_player(addr) != Some(request.player_id) {
                    log::debug!("Prop damage from {} for a player it does not own", addr);
                    return;
                }
                if self.props.apply_prop_damage(&request) == PropDamageOutcome::Destroyed {
                    self.prop_channel.forget(request.prop_id);
                }
            }
            EngineCommand::PropMeshLoaded { prop_id, mesh } => {
                if !self.props.register_mesh(prop_id, &mesh) {
                    log::debug!("Mesh for prop {} arrived but the prop is gone", prop_id);
                }
            }
        }
    }

    fn on_player_data(&mut self, addr: SocketAddr, data: &serde_json::Value, now: f64) {
        let claimed = data.get("id").and_then(|v| v.as_u64());
        if let Some(id) = claimed {
            if !self.may_speak_for(addr, id) {
                log::debug!("{} sent data for player {} bound elsewhere", addr, id);
                return;
            }
        }

        let outcome = match self.players.upsert(data, now) {
            Ok(outcome) => outcome,
            Err(UpsertError::ServerFull) => {
                log::debug!("Rejected {}: server full", addr);
                self.outbox.whisper_chat(addr, "&cServer is full");
                return;
            }
            Err(e) => {
                log::warn!("Invalid player data from {}: {}", addr, e);
                return;
            }
        };
        self.players_dirty = true;

        if let Some(client) = self.clients.get_mut(&addr) {
            client.player_id = Some(outcome.player_id);
        }
        if !outcome.is_new {
            return;
        }

        let id = outcome.player_id;
        self.with_gamemode(now, |mode, ctx| mode.on_player_connect(ctx, id));
        let name = self.players.get(id).map(|p| p.name.clone()).unwrap_or_default();
        log::info!("{}({}) joined from {}", name, id, addr);
        self.outbox.broadcast_chat(format!("{} joined", name));
        self.broadcast_server_info();
    }

    fn touch_client(&mut self, addr: SocketAddr, now: f64) {
        self.clients
            .entry(addr)
            .and_modify(|c| c.last_seen = now)
            .or_insert(Client { player_id: None, last_seen: now });
    }

    fn bound_player(&self, addr: SocketAddr) -> Option<u64> {
        self.clients.get(&addr).and_then(|c| c.player_id)
    }

    /// An id belongs to the first address that claimed it
    fn may_speak_for(&self, addr: SocketAddr, id: u64) -> bool {
        match self.bound_player(addr) {
            Some(bound) => bound == id,
            None => !self.clients.values().any(|c| c.player_id == Some(id)),
        }
    }

    /// One simulation step
    pub fn tick(&mut self, now: f64) {
        let started = Instant::now();
        let dt = (now - self.last_tick).clamp(0.0, MAX_STEP_SECS);
        self.last_tick = now;

        if self.players.regenerate_health(now) {
            self.players_dirty = true;
        }

        let timed_spawns = self.gamemode.allows_timed_item_spawns();
        let pickups = self.items.tick(&mut self.players, now, timed_spawns, &mut self.outbox);
        for pickup in pickups {
            self.players_dirty = true;
            self.with_gamemode(now, |mode, ctx| mode.on_item_pickup(ctx, pickup.player_id, pickup.item_type));
        }

        if self.players.update_item_durabilities(now) {
            self.players_dirty = true;
        }

        let positions: Vec<Vector3> = self
            .players
            .players()
            .filter(|p| !p.is_spectating())
            .map(|p| p.position)
            .collect();
        self.props.repel_from_players(&positions);
        self.props.step(dt as f32);

        self.with_gamemode(now, |mode, ctx| mode.tick(ctx));

        for player in self.players.players_mut() {
            if player.expire_game_messages(now) {
                self.players_dirty = true;
            }
        }

        if self.server_info.sky_color != self.announced_sky {
            self.broadcast_server_info();
        }

        self.emit_players(now);
        self.emit_props(now);
        if self.items.take_updates() {
            self.outbox.broadcast(ServerEvent::WorldItemData(self.items.items().to_vec()));
        }

        self.tick_timer.record(started.elapsed());
    }

    fn emit_players(&mut self, now: f64) {
        if !self.players_dirty && !self.player_channel.is_full_due(now) {
            return;
        }
        let snapshot = match snapshot_of(self.players.players().map(|p| (p.id, p))) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::error!("Failed to serialize players: {}", e);
                return;
            }
        };
        self.players_dirty = false;
        match self.player_channel.emit(snapshot, now) {
            Some(Emission::Full(all)) => self.outbox.broadcast(ServerEvent::RemotePlayerData(all)),
            Some(Emission::Delta(patches)) => self.outbox.broadcast(ServerEvent::RemotePlayerDelta(patches)),
            None => {}
        }
    }

    fn emit_props(&mut self, now: f64) {
        let updated = self.props.take_updates();
        if !updated && !self.prop_channel.is_full_due(now) {
            return;
        }
        let snapshot = match snapshot_of(self.props.props().map(|p| (p.id, p))) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::error!("Failed to serialize props: {}", e);
                return;
            }
        };
        match self.prop_channel.emit(snapshot, now) {
            Some(Emission::Full(all)) => self.outbox.broadcast(ServerEvent::PropData(all)),
            Some(Emission::Delta(patches)) => self.outbox.broadcast(ServerEvent::PropDelta(patches)),
            None => {}
        }
    }

    /// Slow maintenance pass: falls, deaths, evictions, gamemode cleanup
    pub fn periodic_cleanup(&mut self, now: f64) {
        let started = Instant::now();

        for id in self.players.ids() {
            self.check_fall(id);
            self.check_death(id, now);
        }

        let disconnect_after = self.config.player_disconnect_secs;
        let afk_after = self.config.player_afk_kick_secs;
        let mut leaving = SmallIdVec::new();
        for player in self.players.players() {
            let last_update = player.update_timestamp.unwrap_or(0.0);
            if last_update + disconnect_after < now {
                self.outbox.broadcast_chat(format!("{} left", player.name));
                log::info!("{}({}) timed out", player.name, player.id);
                leaving.push(player.id);
                continue;
            }
            let last_moved = self.players.extras(player.id).map_or(now, |e| e.last_moved_time);
            if afk_after > 0.0 && last_moved + afk_after < now {
                self.outbox.broadcast_chat(format!("{} was kicked for being AFK", player.name));
                log::info!("{}({}) kicked for inactivity", player.name, player.id);
                leaving.push(player.id);
            }
        }
        for id in leaving.iter().copied() {
            self.remove_player(id, now);
        }

        self.clients
            .retain(|_, c| c.player_id.is_some() || c.last_seen + disconnect_after >= now);

        let fallen = self.items.remove_fallen();
        if fallen > 0 {
            log::debug!("Removed {} fallen item(s)", fallen);
        }

        self.with_gamemode(now, |mode, ctx| mode.on_periodic_cleanup(ctx));

        self.cleanup_timer.record(started.elapsed());
        self.refresh_server_info();
    }

    fn check_fall(&mut self, id: u64) {
        let Some(player) = self.players.get_mut(id) else {
            return;
        };
        if player.position.y >= WORLD_FLOOR_Y || player.is_dead() {
            return;
        }
        player.health = 0.0;
        player.velocity = Vector3::ZERO;
        let line = format!("{} fell off :'(", player.name);
        self.outbox.broadcast_chat(line);
        self.players_dirty = true;
    }

    fn check_death(&mut self, id: u64, now: f64) {
        if !self.players.get(id).is_some_and(|p| p.is_dead()) {
            return;
        }
        let handled = self.with_gamemode(now, |mode, ctx| mode.on_player_death(ctx, id));
        if !handled {
            // stacks land where the player died
            let dropped = self.players.drop_all_items(id, now);
            self.items.push_items(dropped);
            self.players.respawn(id, now);
        }
        self.players_dirty = true;
    }

    fn remove_player(&mut self, id: u64, now: f64) {
        self.with_gamemode(now, |mode, ctx| mode.on_player_disconnect(ctx, id));
        self.players.remove(id);
        self.player_channel.forget(id);
        self.clients.retain(|_, c| c.player_id != Some(id));
        self.players_dirty = true;
        self.broadcast_server_info();
    }

    fn refresh_server_info(&mut self) {
        self.server_info.current_players = self.players.len();
        self.server_info.tick_compute_time = self.tick_timer.average_ms();
        self.server_info.cleanup_compute_time = self.cleanup_timer.average_ms();
        self.server_info.memory_usage = resident_memory_bytes();
    }

    fn broadcast_server_info(&mut self) {
        self.server_info.current_players = self.players.len();
        self.announced_sky = self.server_info.sky_color.clone();
        self.outbox.broadcast(ServerEvent::ServerInfo(self.server_info.clone()));
    }

    pub fn drain_outbox(&mut self) -> Vec<Outgoing> {
        self.outbox.drain().collect()
    }

    /// Every address that events are broadcast to
    pub fn client_addrs(&self) -> Vec<SocketAddr> {
        self.clients.keys().copied().collect()
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    pub fn players(&self) -> &PlayerManager {
        &self.players
    }

    pub fn players_mut(&mut self) -> &mut PlayerManager {
        &mut self.players
    }

    pub fn items(&self) -> &ItemManager {
        &self.items
    }

    pub fn props(&self) -> &PropManager {
        &self.props
    }

    pub fn gamemode_name(&self) -> &'static str {
        self.gamemode.name()
    }

    /// Props still waiting for a collision mesh, as (prop id, asset url)
    pub fn pending_prop_meshes(&self) -> Vec<(u64, String)> {
        self.props
            .props()
            .filter(|p| p.do_physics && !self.props.physics().contains(p.id))
            .map(|p| (p.id, p.url.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::events::Target;
    use crate::state::player::Player;
    use serde_json::{json, Value};

    const VERSION: &str = "1";

    fn engine(config: Config) -> GameEngine {
        GameEngine::new(
            Arc::new(config),
            Arc::new(MapData::empty("test")),
            Arc::new(ItemDb::load()),
            PhysicsBridge::new(),
            VERSION,
            0.0,
        )
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn player_data(id: u64) -> Value {
        serde_json::to_value(Player::new(id, format!("p{}", id), VERSION)).unwrap()
    }

    fn join(engine: &mut GameEngine, id: u64, port: u16, now: f64) {
        engine.handle_command(EngineCommand::PlayerData { addr: addr(port), data: player_data(id) }, now);
        // acknowledge the spawn correction
        let mut ack = serde_json::to_value(engine.players().get(id).unwrap()).unwrap();
        ack["forcedAcknowledged"] = json!(true);
        engine.handle_command(EngineCommand::PlayerData { addr: addr(port), data: ack }, now);
    }

    fn chat_lines(events: &[Outgoing]) -> Vec<String> {
        events
            .iter()
            .filter_map(|o| match &o.event {
                ServerEvent::ChatMsg(msg) => Some(msg.message.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_join_announces_and_binds() {
        let mut engine = engine(Config::default());
        join(&mut engine, 7, 4000, 1.0);

        let events = engine.drain_outbox();
        assert!(chat_lines(&events).contains(&"p7 joined".to_string()));
        assert!(events.iter().any(|o| matches!(o.event, ServerEvent::ServerInfo(ref info) if info.current_players == 1)));
        assert_eq!(engine.client_addrs(), vec![addr(4000)]);
        assert!(!engine.players().get(7).unwrap().forced);
    }

    #[test]
    fn test_other_address_cannot_speak_for_player() {
        let mut engine = engine(Config::default());
        join(&mut engine, 7, 4000, 1.0);
        let before = engine.players().get(7).unwrap().position;

        let mut spoof = serde_json::to_value(engine.players().get(7).unwrap()).unwrap();
        spoof["position"] = json!({"x": 50.0, "y": 0.0, "z": 0.0});
        engine.handle_command(EngineCommand::PlayerData { addr: addr(4001), data: spoof }, 2.0);
        assert_eq!(engine.players().get(7).unwrap().position, before);
    }

    #[test]
    fn test_first_tick_full_then_delta() {
        let mut engine = engine(Config::default());
        join(&mut engine, 1, 4000, 0.0);
        engine.tick(0.1);
        let events = engine.drain_outbox();
        assert!(events.iter().any(|o| matches!(o.event, ServerEvent::RemotePlayerData(ref all) if all.len() == 1)));

        let mut moved = serde_json::to_value(engine.players().get(1).unwrap()).unwrap();
        moved["position"] = json!({"x": 9.0, "y": 1.0, "z": 0.0});
        engine.handle_command(EngineCommand::PlayerData { addr: addr(4000), data: moved }, 0.2);
        engine.tick(0.2);

        let events = engine.drain_outbox();
        let delta = events
            .iter()
            .find_map(|o| match &o.event {
                ServerEvent::RemotePlayerDelta(patches) => Some(patches.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(delta.len(), 1);
        assert_eq!(delta[0]["id"], 1);
        assert_eq!(delta[0]["position"]["x"], 9.0);
        assert!(delta[0].get("name").is_none());
        assert!(events.iter().all(|o| o.target == Target::All));
    }

    #[test]
    fn test_idle_tick_emits_nothing() {
        let mut engine = engine(Config::default());
        join(&mut engine, 1, 4000, 0.0);
        engine.tick(0.1);
        engine.drain_outbox();

        engine.tick(0.2);
        assert!(engine
            .drain_outbox()
            .iter()
            .all(|o| !matches!(o.event, ServerEvent::RemotePlayerData(_) | ServerEvent::RemotePlayerDelta(_))));
    }

    #[test]
    fn test_fall_off_respawns() {
        let mut engine = engine(Config::default());
        join(&mut engine, 1, 4000, 0.0);
        engine.players_mut().get_mut(1).unwrap().position.y = -200.0;

        engine.periodic_cleanup(1.0);
        let player = engine.players().get(1).unwrap();
        assert!(player.position.y > -150.0);
        assert_eq!(player.health, 100.0);
        assert!(player.forced);
        assert!(chat_lines(&engine.drain_outbox()).contains(&"p1 fell off :'(".to_string()));
    }

    #[test]
    fn test_disconnect_removes_player_and_client() {
        let mut engine = engine(Config::default());
        join(&mut engine, 1, 4000, 0.0);
        engine.periodic_cleanup(20.0);

        assert!(engine.players().is_empty());
        assert!(engine.client_addrs().is_empty());
        assert!(chat_lines(&engine.drain_outbox()).contains(&"p1 left".to_string()));
        assert_eq!(engine.server_info().current_players, 0);
    }

    #[test]
    fn test_kill_command_respawns_sender() {
        let mut engine = engine(Config::default());
        join(&mut engine, 1, 4000, 0.0);
        engine.drain_outbox();

        let chat = json!({"id": 1, "name": "p1", "message": "/kill"});
        engine.handle_command(EngineCommand::ChatMsg { addr: addr(4000), data: chat }, 1.0);

        assert_eq!(engine.players().get(1).unwrap().health, 100.0);
        assert_eq!(engine.players().extras(1).unwrap().deaths, 1);
    }

    #[test]
    fn test_respawn_drops_inventory_where_player_died() {
        use crate::utils::itemdb::CUBE_ITEM_ID;

        let mut engine = engine(Config::default());
        join(&mut engine, 1, 4000, 0.0);
        assert!(engine.players_mut().give_item(1, CUBE_ITEM_ID, 0.0));
        {
            let player = engine.players_mut().get_mut(1).unwrap();
            player.position.x = 3.0;
            player.position.y = 1.0;
            player.position.z = -2.0;
        }
        let died_at = engine.players().get(1).unwrap().position;

        let chat = json!({"id": 1, "name": "p1", "message": "/kill"});
        engine.handle_command(EngineCommand::ChatMsg { addr: addr(4000), data: chat }, 1.0);

        let dropped = engine.items().find_by_type(CUBE_ITEM_ID).unwrap();
        assert_eq!(dropped.vector, died_at);
        assert!(engine
            .players()
            .get(1)
            .unwrap()
            .inventory
            .iter()
            .all(|stack| stack.item_id != CUBE_ITEM_ID));
    }

    #[test]
    fn test_invalid_payloads_are_dropped() {
        let mut engine = engine(Config::default());
        engine.handle_command(EngineCommand::PlayerData { addr: addr(4000), data: json!({"id": 1}) }, 0.0);
        engine.handle_command(EngineCommand::ApplyDamage { addr: addr(4000), data: json!({}) }, 0.0);
        assert!(engine.players().is_empty());
        assert!(engine.drain_outbox().is_empty());
    }

    #[test]
    fn test_server_full() {
        let mut engine = engine(Config { max_players: 1, ..Config::default() });
        join(&mut engine, 1, 4000, 0.0);
        engine.drain_outbox();
        engine.handle_command(EngineCommand::PlayerData { addr: addr(4001), data: player_data(2) }, 0.0);

        assert_eq!(engine.players().len(), 1);
        let events = engine.drain_outbox();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].target, Target::Client(addr(4001)));
    }
}
