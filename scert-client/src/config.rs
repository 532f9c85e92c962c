use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    pub client: ClientSettings,
    #[serde(default)]
    pub security: SecuritySettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientSettings {
    pub server_addr: String,
    pub server_port: u16,
    /// Application (title) id sent in the TCP connect request
    #[serde(default)]
    pub app_id: i32,
    #[serde(default = "default_world_id")]
    pub target_world_id: u32,
    /// Echoes sent after the handshake
    #[serde(default = "default_echo_count")]
    pub echo_count: u32,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SecuritySettings {
    /// Deployment auth key (hex-encoded) used for the public key exchange
    #[serde(default)]
    pub auth_key: Option<String>,
    /// Encrypt traffic with the session key once the server has sent it
    #[serde(default)]
    pub encrypt_session: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
}

fn default_world_id() -> u32 {
    1
}

fn default_echo_count() -> u32 {
    3
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_read_timeout() -> u64 {
    30
}

fn default_write_timeout() -> u64 {
    30
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            write_timeout_secs: default_write_timeout(),
        }
    }
}

impl ClientConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self {
            client: ClientSettings {
                server_addr: "127.0.0.1".to_string(),
                server_port: 10071,
                app_id: 0,
                target_world_id: default_world_id(),
                echo_count: default_echo_count(),
            },
            security: SecuritySettings::default(),
            timeouts: TimeoutSettings::default(),
        }
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.client.server_addr, self.client.server_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_section_only() {
        let config: ClientConfig = toml::from_str(
            r#"
            [client]
            server_addr = "10.0.0.2"
            server_port = 10075
            app_id = 10684
            "#,
        )
        .unwrap();

        assert_eq!(config.server_addr(), "10.0.0.2:10075");
        assert_eq!(config.client.echo_count, 3);
        assert!(config.security.auth_key.is_none());
        assert_eq!(config.timeouts.read_timeout_secs, 30);
    }
}
