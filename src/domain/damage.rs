use crate::domain::players::PlayerManager;
use crate::domain::validator::DamageRequest;
use crate::state::events::Outbox;
use crate::utils::itemdb::ItemDb;

/// Max distance between client-claimed and server-held positions
pub const DESYNC_THRESHOLD: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DamageOutcome {
    /// Dropped without effect (unknown player, desync, spectator, already dead)
    Ignored,
    Applied,
    /// Target health reached zero; caller should run cleanup right away
    Killed { attacker: u64, victim: u64 },
}

/// Apply a validated player-vs-player damage request against server-held state
pub fn apply_damage(
    players: &mut PlayerManager,
    item_db: &ItemDb,
    request: &DamageRequest,
    now: f64,
    outbox: &mut Outbox,
) -> DamageOutcome {
    let attacker_id = request.local_player.id;
    let victim_id = request.target_player.id;

    let (Some(attacker), Some(victim)) = (players.get(attacker_id), players.get(victim_id)) else {
        log::debug!("Damage request references unknown player ({} -> {})", attacker_id, victim_id);
        return DamageOutcome::Ignored;
    };

    let attacker_drift = request.local_player.position.distance_to(&attacker.position);
    let victim_drift = request.target_player.position.distance_to(&victim.position);
    if attacker_drift > DESYNC_THRESHOLD || victim_drift > DESYNC_THRESHOLD {
        log::debug!(
            "Damage request out of sync ({} -> {}): drift {:.2}/{:.2}",
            attacker_id,
            victim_id,
            attacker_drift,
            victim_drift
        );
        return DamageOutcome::Ignored;
    }

    if attacker.is_spectating() || victim.is_dead() {
        return DamageOutcome::Ignored;
    }

    let attacker_name = attacker.name.clone();
    let held_item = attacker.held_item_id();
    players.record_shot(attacker_id);

    let Some(victim) = players.get_mut(victim_id) else {
        return DamageOutcome::Ignored;
    };
    let protection = if victim.protection > 0.0 { victim.protection } else { 1.0 };
    victim.health = (victim.health - request.damage / protection).max(0.0);
    victim.last_damage_time = Some(now);
    victim.id_last_damaged_by = Some(attacker_id);

    if !victim.is_dead() {
        return DamageOutcome::Applied;
    }

    let kill_text = item_db.kill_text(held_item, request.was_headshot);
    outbox.broadcast_chat(format!("{} {} {}", attacker_name, kill_text, victim.name));
    log::info!("{}({}) killed {}({})", attacker_name, attacker_id, victim.name, victim_id);

    DamageOutcome::Killed {
        attacker: attacker_id,
        victim: victim_id,
    }
}
