//! Strict validation of client payloads.
//!
//! Every inbound payload is first decoded into its struct with unknown fields
//! rejected, then checked field by field. All problems are collected rather
//! than stopping at the first one.

use std::fmt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use crate::state::events::ChatMessage;
use crate::state::player::Player;
use crate::state::vector::Vector3;

pub const MAX_NAME_LEN: usize = 42;
pub const MAX_CHAT_LEN: usize = 300;
pub const MAX_DAMAGE: f32 = 200.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FieldError {
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("{field}: {reason}")]
    OutOfRange { field: &'static str, reason: String },

    #[error("version mismatch: client {client}, server {server}")]
    VersionMismatch { client: String, server: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "{}", joined.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

pub type Validation<T> = Result<T, ValidationErrors>;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DamageRequest {
    pub local_player: Player,
    pub target_player: Player,
    pub damage: f32,
    pub was_headshot: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PropDamageRequest {
    pub player_id: u64,
    pub prop_id: u64,
    pub damage: f32,
    /// Direction of the hit, used for the impulse
    pub direction: Vector3,
}

/// Accumulates field problems for one payload
#[derive(Default)]
struct Checker {
    errors: Vec<FieldError>,
}

impl Checker {
    fn out_of_range(&mut self, field: &'static str, reason: impl Into<String>) {
        self.errors.push(FieldError::OutOfRange { field, reason: reason.into() });
    }

    fn max_len(&mut self, field: &'static str, value: &str, max: usize) {
        let len = value.chars().count();
        if len > max {
            self.out_of_range(field, format!("length {} exceeds {}", len, max));
        }
    }

    fn finite(&mut self, field: &'static str, values: &[f32]) {
        if values.iter().any(|v| !v.is_finite()) {
            self.out_of_range(field, "not a finite number");
        }
    }

    fn finish<T>(self, value: T) -> Validation<T> {
        if self.errors.is_empty() {
            Ok(value)
        } else {
            Err(ValidationErrors(self.errors))
        }
    }
}

fn decode<T: DeserializeOwned>(raw: &Value) -> Validation<T> {
    T::deserialize(raw).map_err(|e| ValidationErrors(vec![FieldError::Malformed(e.to_string())]))
}

fn check_player(checker: &mut Checker, player: &Player, server_version: &str) {
    if player.game_version != server_version {
        checker.errors.push(FieldError::VersionMismatch {
            client: player.game_version.clone(),
            server: server_version.to_string(),
        });
    }
    checker.max_len("name", &player.name, MAX_NAME_LEN);
    checker.max_len("chatMsg", &player.chat_msg, MAX_CHAT_LEN);

    let vec = |v: &Vector3| [v.x, v.y, v.z];
    checker.finite("position", &vec(&player.position));
    checker.finite("velocity", &vec(&player.velocity));
    checker.finite("inputVelocity", &vec(&player.input_velocity));
    checker.finite("lookQuaternion", &player.look_quaternion);
    checker.finite("quaternion", &player.quaternion);
    checker.finite("gravity", &[player.gravity]);
    checker.finite("speed", &[player.speed]);
    checker.finite("acceleration", &[player.acceleration]);
    checker.finite("latency", &[player.latency]);
    checker.finite("health", &[player.health]);
    checker.finite("protection", &[player.protection]);

    for item in &player.inventory {
        if !(0.0..=1.0).contains(&item.durability) {
            checker.out_of_range("inventory.durability", format!("{} not in [0, 1]", item.durability));
        }
    }
}

/// Validate a `playerData` snapshot
pub fn validate_player_data(raw: &Value, server_version: &str) -> Validation<Player> {
    let player: Player = decode(raw)?;
    let mut checker = Checker::default();
    check_player(&mut checker, &player, server_version);
    checker.finish(player)
}

/// Validate an inbound `chatMsg`
pub fn validate_chat_message(raw: &Value) -> Validation<ChatMessage> {
    let msg: ChatMessage = decode(raw)?;
    let mut checker = Checker::default();
    checker.max_len("name", &msg.name, MAX_NAME_LEN);
    checker.max_len("message", &msg.message, MAX_CHAT_LEN);
    checker.finish(msg)
}

fn check_damage(checker: &mut Checker, damage: f32) {
    if !damage.is_finite() || damage <= 0.0 || damage > MAX_DAMAGE {
        checker.out_of_range("damage", format!("{} not in (0, {}]", damage, MAX_DAMAGE));
    }
}

/// Validate an `applyDamage` request
pub fn validate_damage_request(raw: &Value, server_version: &str) -> Validation<DamageRequest> {
    let request: DamageRequest = decode(raw)?;
    let mut checker = Checker::default();
    check_player(&mut checker, &request.local_player, server_version);
    check_player(&mut checker, &request.target_player, server_version);
    check_damage(&mut checker, request.damage);
    checker.finish(request)
}

/// Validate an `applyPropDamage` request
pub fn validate_prop_damage_request(raw: &Value) -> Validation<PropDamageRequest> {
    let request: PropDamageRequest = decode(raw)?;
    let mut checker = Checker::default();
    check_damage(&mut checker, request.damage);
    checker.finite("direction", &[request.direction.x, request.direction.y, request.direction.z]);
    checker.finish(request)
}
