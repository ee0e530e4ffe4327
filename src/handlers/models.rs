use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inbound datagram: `{"event": <name>, "data": <payload>}`
#[derive(Serialize, Deserialize, Debug)]
pub struct ClientEnvelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Body of `POST /api/shareServerList`
pub type SharedServerList = Vec<String>;
