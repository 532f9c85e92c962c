use crate::persistence::MaintenanceWindow;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub server: ServerSettings,
    pub security: SecuritySettings,
    #[serde(default)]
    pub limits: LimitsSettings,
    #[serde(default)]
    pub tick: TickSettings,
    #[serde(default)]
    pub moderation: ModerationSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSettings {
    /// Component name used in log lines (MUIS, MAS, MLS, ...)
    #[serde(default = "default_name")]
    pub name: String,
    pub listen_addr: String,
    pub listen_port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SecuritySettings {
    /// Component session key (hex-encoded), handed to clients during the handshake
    pub session_key: String,
    /// Deployment auth key (hex-encoded)
    pub auth_key: String,
    /// Reject handshake messages that arrive out of order
    #[serde(default)]
    pub strict_state: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsSettings {
    /// Maximum concurrent connections
    #[serde(default = "default_max_conns")]
    pub max_conns: usize,
    /// Maximum frame payload in bytes
    #[serde(default = "default_max_frame")]
    pub max_frame_bytes: usize,
    /// Idle read timeout in seconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    /// Write timeout in seconds
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TickSettings {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Quiet period after which a bound client is sent an echo
    #[serde(default = "default_server_echo_interval")]
    pub server_echo_interval_secs: u64,
    /// Minimum spacing between two server echoes on one connection
    #[serde(default = "default_echo_resend_interval")]
    pub echo_resend_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModerationSettings {
    #[serde(default = "default_ban_severity")]
    pub ban_system_message_severity: u8,
    #[serde(default)]
    pub banned_ips: Vec<IpAddr>,
    #[serde(default)]
    pub maintenance: Option<MaintenanceWindow>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Output logs as JSON
    #[serde(default)]
    pub json_logs: bool,
}

fn default_name() -> String {
    "MUIS".to_string()
}

fn default_max_conns() -> usize {
    256
}

fn default_max_frame() -> usize {
    scert_proto::MAX_FRAME_LEN
}

fn default_read_timeout() -> u64 {
    60
}

fn default_write_timeout() -> u64 {
    10
}

fn default_tick_interval() -> u64 {
    10
}

fn default_server_echo_interval() -> u64 {
    5
}

fn default_echo_resend_interval() -> u64 {
    2
}

fn default_ban_severity() -> u8 {
    20
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LimitsSettings {
    fn default() -> Self {
        Self {
            max_conns: default_max_conns(),
            max_frame_bytes: default_max_frame(),
            read_timeout_secs: default_read_timeout(),
            write_timeout_secs: default_write_timeout(),
        }
    }
}

impl Default for TickSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
            server_echo_interval_secs: default_server_echo_interval(),
            echo_resend_interval_secs: default_echo_resend_interval(),
        }
    }
}

impl Default for ModerationSettings {
    fn default() -> Self {
        Self {
            ban_system_message_severity: default_ban_severity(),
            banned_ips: Vec::new(),
            maintenance: None,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

impl TickSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

impl ServerConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self {
            server: ServerSettings {
                name: default_name(),
                listen_addr: "0.0.0.0".to_string(),
                listen_port: 10071,
            },
            security: SecuritySettings {
                session_key: "6368616e67652d6d652d696e2d70726f64756374696f6e".to_string(),
                auth_key: "6368616e67652d6d652d746f6f".to_string(),
                strict_state: false,
            },
            limits: LimitsSettings::default(),
            tick: TickSettings::default(),
            moderation: ModerationSettings::default(),
            logging: LoggingSettings::default(),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.listen_addr, self.server.listen_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_file_fills_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            [server]
            listen_addr = "127.0.0.1"
            listen_port = 10075

            [security]
            session_key = "00112233"
            auth_key = "44556677"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.name, "MUIS");
        assert!(!config.security.strict_state);
        assert_eq!(config.limits.max_frame_bytes, scert_proto::MAX_FRAME_LEN);
        assert_eq!(config.tick.echo_resend_interval_secs, 2);
        assert!(config.moderation.banned_ips.is_empty());
        assert_eq!(config.moderation.ban_system_message_severity, 20);
        assert!(config.moderation.maintenance.is_none());
        assert_eq!(config.listen_addr(), "127.0.0.1:10075");
    }

    #[test]
    fn test_moderation_section() {
        let config: ServerConfig = toml::from_str(
            r#"
            [server]
            name = "MAS"
            listen_addr = "0.0.0.0"
            listen_port = 10075

            [security]
            session_key = "00"
            auth_key = "00"
            strict_state = true

            [moderation]
            ban_system_message_severity = 140
            banned_ips = ["10.0.0.7", "::1"]

            [moderation.maintenance]
            active = true
            from = "2024-01-01T00:00:00Z"
            "#,
        )
        .unwrap();

        assert!(config.security.strict_state);
        assert_eq!(config.moderation.ban_system_message_severity, 140);
        assert_eq!(config.moderation.banned_ips.len(), 2);
        let window = config.moderation.maintenance.unwrap();
        assert!(window.active);
        assert!(window.to.is_none());
    }

    #[test]
    fn test_default_keys_are_hex() {
        let config = ServerConfig::default_config();
        assert!(hex::decode(&config.security.session_key).is_ok());
        assert!(hex::decode(&config.security.auth_key).is_ok());
    }
}
