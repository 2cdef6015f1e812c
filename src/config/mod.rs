//! Configuration module - environment variable parsing plus the room
//! options document

use std::env;
use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;

use crate::protocol::settings::GameSettings;

/// Application configuration loaded from environment variables.
#[derive(Clone, Debug)]
pub struct Config {
    /// UDP binding address for the game transport
    pub server_addr: SocketAddr,
    /// HTTP binding address for health and admin routes
    pub admin_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Account/auth service base URL
    pub auth_base_url: String,
    /// Bearer token for the auth service (server only!)
    pub auth_api_token: String,
    /// Metrics sink base URL
    pub metrics_base_url: String,
    /// Bearer token for the metrics sink
    pub metrics_api_token: String,

    /// Room behavior options
    pub rooms: RoomsConfig,
}

impl Config {
    /// Load configuration from environment variables. `SKELD_CONFIG`
    /// may point at a JSON document with room options.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:22023".to_string())
        };

        let admin_addr =
            env::var("ADMIN_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());

        let rooms = match env::var("SKELD_CONFIG") {
            Ok(path) => RoomsConfig::from_file(Path::new(&path))?,
            Err(_) => RoomsConfig::default(),
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            admin_addr: admin_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            auth_base_url: env::var("AUTH_BASE_URL")
                .map_err(|_| ConfigError::Missing("AUTH_BASE_URL"))?,
            auth_api_token: env::var("AUTH_API_TOKEN")
                .map_err(|_| ConfigError::Missing("AUTH_API_TOKEN"))?,
            metrics_base_url: env::var("METRICS_BASE_URL")
                .map_err(|_| ConfigError::Missing("METRICS_BASE_URL"))?,
            metrics_api_token: env::var("METRICS_API_TOKEN")
                .map_err(|_| ConfigError::Missing("METRICS_API_TOKEN"))?,

            rooms,
        })
    }
}

/// Room behavior options, usually loaded from the JSON document.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RoomsConfig {
    /// Server-as-a-host mode for new rooms
    pub server_as_host: bool,
    /// Seconds before an empty room is destroyed
    pub create_timeout: u64,
    /// Chat command handling
    pub chat_commands: ChatCommandsConfig,
    /// Settings forced onto every room regardless of what hosts propose
    pub enforce_settings: Option<GameSettings>,
    pub advanced: AdvancedConfig,
    pub optimizations: OptimizationsConfig,
    /// Cosmetic identity used when the server speaks in chat
    pub server_player: ServerPlayerConfig,
    pub logging: LoggingConfig,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            server_as_host: false,
            create_timeout: 10,
            chat_commands: ChatCommandsConfig::default(),
            enforce_settings: None,
            advanced: AdvancedConfig::default(),
            optimizations: OptimizationsConfig::default(),
            server_player: ServerPlayerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl RoomsConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::File { path: path.display().to_string(), source })?;
        serde_json::from_str(&text)
            .map_err(|source| ConfigError::Json { path: path.display().to_string(), source })
    }
}

/// `false` disables commands, `true` enables with the default prefix,
/// an object picks the prefix.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum ChatCommandsConfig {
    Enabled(bool),
    Custom { prefix: String },
}

impl Default for ChatCommandsConfig {
    fn default() -> Self {
        Self::Enabled(true)
    }
}

impl ChatCommandsConfig {
    pub fn prefix(&self) -> Option<&str> {
        match self {
            Self::Enabled(true) => Some("/"),
            Self::Enabled(false) => None,
            Self::Custom { prefix } => Some(prefix),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AdvancedConfig {
    pub unknown_objects: UnknownObjectsPolicy,
}

/// What to do with spawn types no prefab covers.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum UnknownObjectsPolicy {
    /// `false` rejects, `true` materializes opaque components.
    Blanket(bool),
    /// `"all"` behaves like `true`.
    All(String),
    /// Allow only the listed spawn-type ids or names.
    Listed(Vec<serde_json::Value>),
}

impl Default for UnknownObjectsPolicy {
    fn default() -> Self {
        Self::Blanket(false)
    }
}

impl UnknownObjectsPolicy {
    pub fn allows(&self, spawn_type: u32) -> bool {
        match self {
            Self::Blanket(allow) => *allow,
            Self::All(word) => word.eq_ignore_ascii_case("all"),
            Self::Listed(entries) => entries.iter().any(|entry| match entry {
                serde_json::Value::Number(n) => n.as_u64() == Some(u64::from(spawn_type)),
                serde_json::Value::String(s) => s.parse::<u32>().ok() == Some(spawn_type),
                _ => false,
            }),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OptimizationsConfig {
    pub movement: MovementConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MovementConfig {
    /// Forward every Nth qualifying movement packet per sender
    pub update_rate: u32,
    /// Skip recipients more than seven units away
    pub vision_checks: bool,
    /// Skip forwarding ghost movement to the living
    pub dead_checks: bool,
    /// Serialize once per tick and reuse the buffer across recipients
    pub reuse_buffer: bool,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            update_rate: 1,
            vision_checks: false,
            dead_checks: true,
            reuse_buffer: true,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerPlayerConfig {
    pub name: String,
    pub color: u8,
    pub hat: u32,
    pub skin: u32,
}

impl Default for ServerPlayerConfig {
    fn default() -> Self {
        Self { name: "<color=yellow>[Server]</color>".to_string(), color: 5, hat: 0, skin: 0 }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub rooms: LogFormatConfig,
    pub players: LogFormatConfig,
}

/// Which fields a diagnostic one-liner includes.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LogFormatConfig {
    pub format: Vec<String>,
}

impl Default for LogFormatConfig {
    fn default() -> Self {
        Self { format: vec!["code".into(), "players".into(), "state".into()] }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Failed to read config file {path}: {source}")]
    File { path: String, source: std::io::Error },

    #[error("Failed to parse config file {path}: {source}")]
    Json { path: String, source: serde_json::Error },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let rooms = RoomsConfig::default();
        assert!(!rooms.server_as_host);
        assert_eq!(rooms.create_timeout, 10);
        assert_eq!(rooms.chat_commands.prefix(), Some("/"));
        assert_eq!(rooms.optimizations.movement.update_rate, 1);
        assert!(!rooms.advanced.unknown_objects.allows(100));
    }

    #[test]
    fn rooms_config_parses_documented_surface() {
        let doc = r#"{
            "serverAsHost": true,
            "createTimeout": 30,
            "chatCommands": { "prefix": "!" },
            "advanced": { "unknownObjects": [44, "45"] },
            "optimizations": {
                "movement": { "updateRate": 3, "visionChecks": true }
            },
            "serverPlayer": { "name": "Announcer", "color": 2, "hat": 0, "skin": 0 }
        }"#;
        let rooms: RoomsConfig = serde_json::from_str(doc).unwrap();
        assert!(rooms.server_as_host);
        assert_eq!(rooms.create_timeout, 30);
        assert_eq!(rooms.chat_commands.prefix(), Some("!"));
        assert!(rooms.advanced.unknown_objects.allows(44));
        assert!(rooms.advanced.unknown_objects.allows(45));
        assert!(!rooms.advanced.unknown_objects.allows(46));
        assert_eq!(rooms.optimizations.movement.update_rate, 3);
        assert!(rooms.optimizations.movement.vision_checks);
        assert_eq!(rooms.server_player.name, "Announcer");
    }

    #[test]
    fn chat_commands_can_be_disabled() {
        let rooms: RoomsConfig = serde_json::from_str(r#"{ "chatCommands": false }"#).unwrap();
        assert_eq!(rooms.chat_commands.prefix(), None);
    }

    #[test]
    fn unknown_objects_all_keyword() {
        let rooms: RoomsConfig =
            serde_json::from_str(r#"{ "advanced": { "unknownObjects": "all" } }"#).unwrap();
        assert!(rooms.advanced.unknown_objects.allows(12345));
    }
}
