use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ts_rs::TS;

/// Protocol version - increment when making breaking changes.
pub const PROTOCOL_VERSION: u32 = 1;

/// Reserved op codes. Gameplay op codes must stay below these.
pub mod op_codes {
    /// Broadcast to every remaining presence when a match shuts down,
    /// carrying the id of the match they should move to.
    pub const MATCH_MIGRATION: i64 = 999;
}

// === Server -> Client ===

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type")]
pub enum ServerMsg {
    #[serde(rename = "joined")]
    Joined(JoinedMsg),
    #[serde(rename = "rejected")]
    Rejected(RejectedMsg),
    #[serde(rename = "match_data")]
    MatchData(MatchDataMsg),
    #[serde(rename = "error")]
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct JoinedMsg {
    pub protocol_version: u32,
    pub match_id: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct RejectedMsg {
    pub match_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct MatchDataMsg {
    #[ts(type = "number")]
    pub op_code: i64,
    /// Base64-encoded payload
    pub data: String,
}

// === Client -> Server ===

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type")]
pub enum ClientMsg {
    #[serde(rename = "match_data")]
    MatchData {
        #[serde(rename = "opCode")]
        #[ts(type = "number")]
        op_code: i64,
        data: String,
        #[serde(default = "default_reliable")]
        reliable: bool,
    },
    #[serde(rename = "leave")]
    Leave,
}

fn default_reliable() -> bool {
    true
}

// === Migration payload ===

/// Shape of the payload sent with [`op_codes::MATCH_MIGRATION`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub enum MigrationFormat {
    /// `{ "<matchId>": "<matchId>" }`, what deployed clients parse today.
    #[default]
    Legacy,
    /// `{ "matchId": "<matchId>" }`
    Named,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct MigrationMsg {
    pub match_id: String,
}

/// Encode the migration payload for `target` in the requested shape.
pub fn encode_migration(target: &str, format: MigrationFormat) -> serde_json::Result<Vec<u8>> {
    match format {
        MigrationFormat::Legacy => {
            let mut data = BTreeMap::new();
            data.insert(target, target);
            serde_json::to_vec(&data)
        }
        MigrationFormat::Named => serde_json::to_vec(&MigrationMsg {
            match_id: target.to_string(),
        }),
    }
}

/// Extract the target match id from a migration payload in either shape.
pub fn parse_migration_target(payload: &[u8]) -> Option<String> {
    let map: BTreeMap<String, String> = serde_json::from_slice(payload).ok()?;
    if let Some(id) = map.get("matchId") {
        return Some(id.clone());
    }
    match map.into_iter().next() {
        Some((key, value)) if key == value => Some(key),
        _ => None,
    }
}
