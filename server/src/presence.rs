/// A connected participant in a match.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub user_id: String,
    /// Connection id, unique per socket. Used as the key in match state.
    pub session_id: String,
    pub username: String,
    /// Server node hosting the connection
    #[serde(default)]
    pub node: String,
}

impl Presence {
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            username: user_id.clone(),
            user_id,
            session_id: session_id.into(),
            node: String::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

/// Opaque gameplay message received from a presence between ticks.
#[derive(Debug, Clone)]
pub struct MatchData {
    pub presence: Presence,
    pub op_code: i64,
    pub data: Vec<u8>,
    pub reliable: bool,
}
