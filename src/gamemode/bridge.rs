use super::{FfaBehavior, GameContext, Gamemode, GamemodeError};

const BRIDGE_NOTICE: &str = "&cThis is a &bbridge server&c, intended to facilitate server peer discovery.";
const BRIDGE_HINT: &str = "&cTo play Candiru, press escape and select a server from the list.";

/// Discovery-only server: no scoring, a permanent notice
#[derive(Debug, Default)]
pub struct Bridge {
    ffa: FfaBehavior,
}

impl Bridge {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Gamemode for Bridge {
    fn name(&self) -> &'static str {
        "bridge"
    }

    fn init(&mut self, _ctx: &mut GameContext) -> Result<(), GamemodeError> {
        log::info!("Bridge gamemode initialized");
        Ok(())
    }

    fn tick(&mut self, ctx: &mut GameContext) {
        self.ffa.tick(ctx);
    }

    fn on_periodic_cleanup(&mut self, ctx: &mut GameContext) {
        for id in ctx.players.ids() {
            ctx.set_message(id, 0, BRIDGE_NOTICE, None);
            ctx.set_message(id, 1, BRIDGE_HINT, None);
        }
    }

    fn on_player_death(&mut self, _ctx: &mut GameContext, _player_id: u64) -> bool {
        false
    }
}
