use match_shared::MigrationFormat;

/// What happens to the empty-tick counter when a presence shows up again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EmptyTickPolicy {
    /// Counter restarts from zero on any occupied tick.
    #[default]
    Reset,
    /// Counter only ever grows; short gaps add up across the match lifetime.
    Accumulate,
}

/// Discovery filter used when looking for a match to migrate into.
#[derive(Debug, Clone)]
pub struct MigrationFilter {
    pub label: String,
    pub min_size: usize,
    pub max_size: usize,
    pub authoritative: bool,
    pub query: String,
    /// Module created when no open match is found
    pub fallback_module: String,
}

impl Default for MigrationFilter {
    fn default() -> Self {
        Self {
            label: String::new(),
            min_size: 2,
            max_size: 4,
            authoritative: true,
            query: "*".to_string(),
            fallback_module: "match".to_string(),
        }
    }
}

/// Per-match coordinator configuration
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// Ticks per second
    pub tick_rate: u32,
    /// Match ends once more than this many consecutive empty ticks were seen
    pub empty_tick_limit: u32,
    pub empty_tick_policy: EmptyTickPolicy,
    pub migration: MigrationFilter,
    pub migration_format: MigrationFormat,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            tick_rate: 20,
            empty_tick_limit: 100,
            empty_tick_policy: EmptyTickPolicy::Reset,
            migration: MigrationFilter::default(),
            migration_format: MigrationFormat::Legacy,
        }
    }
}

impl MatchConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.tick_rate == 0 || self.tick_rate > 60 {
            return Err("tick_rate must be between 1 and 60".to_string());
        }
        if self.migration.min_size > self.migration.max_size {
            return Err("migration min_size must be <= max_size".to_string());
        }
        if self.migration.fallback_module.is_empty() {
            return Err("migration fallback_module must not be empty".to_string());
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Node name, appended to every match id created here
    pub node: String,
    /// Module name the default match handler is registered under
    pub module: String,
    pub match_config: MatchConfig,
    /// Grace period handed to every match when the server drains
    pub shutdown_grace_secs: u32,
    pub command_buffer: usize,
    pub broadcast_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:7350".to_string(),
            node: "node1".to_string(),
            module: "match".to_string(),
            match_config: MatchConfig::default(),
            shutdown_grace_secs: 5,
            command_buffer: 256,
            broadcast_buffer: 64,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `MATCH_LISTEN_ADDR`, `MATCH_TICK_RATE` and
    /// `MATCH_SHUTDOWN_GRACE_SECS`.
    pub fn from_env() -> Result<Self, String> {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("MATCH_LISTEN_ADDR") {
            config.listen_addr = addr;
        }
        if let Ok(rate) = std::env::var("MATCH_TICK_RATE") {
            config.match_config.tick_rate = rate
                .parse()
                .map_err(|_| format!("MATCH_TICK_RATE is not a number: {}", rate))?;
        }
        if let Ok(grace) = std::env::var("MATCH_SHUTDOWN_GRACE_SECS") {
            config.shutdown_grace_secs = grace
                .parse()
                .map_err(|_| format!("MATCH_SHUTDOWN_GRACE_SECS is not a number: {}", grace))?;
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.node.is_empty() || self.node.contains('.') {
            return Err("node must be non-empty and contain no '.'".to_string());
        }
        if self.module.is_empty() {
            return Err("module must not be empty".to_string());
        }
        if self.command_buffer == 0 || self.broadcast_buffer == 0 {
            return Err("channel buffers must be > 0".to_string());
        }
        self.match_config.validate()
    }
}
