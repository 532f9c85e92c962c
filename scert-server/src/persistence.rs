use crate::config::ModerationSettings;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::IpAddr;

/// Scheduled maintenance as stored in the server flags
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MaintenanceWindow {
    pub active: bool,
    pub from: DateTime<Utc>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
}

impl MaintenanceWindow {
    /// Whether the window blocks clients at `now`; an open-ended window never expires
    pub fn is_in_effect(&self, now: DateTime<Utc>) -> bool {
        self.active && now > self.from && self.to.map_or(true, |to| to > now)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerFlags {
    pub maintenance: Option<MaintenanceWindow>,
}

/// Account/moderation store queried when a connection becomes active.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn is_ip_banned(&self, ip: IpAddr) -> anyhow::Result<bool>;

    async fn server_flags(&self) -> anyhow::Result<ServerFlags>;
}

/// Persistence backed by the `[moderation]` config section
#[derive(Debug, Clone, Default)]
pub struct StaticPersistence {
    banned: HashSet<IpAddr>,
    flags: ServerFlags,
}

impl StaticPersistence {
    pub fn new(banned: impl IntoIterator<Item = IpAddr>, flags: ServerFlags) -> Self {
        Self {
            banned: banned.into_iter().collect(),
            flags,
        }
    }

    pub fn from_config(moderation: &ModerationSettings) -> Self {
        Self::new(
            moderation.banned_ips.iter().copied(),
            ServerFlags {
                maintenance: moderation.maintenance.clone(),
            },
        )
    }
}

#[async_trait]
impl Persistence for StaticPersistence {
    async fn is_ip_banned(&self, ip: IpAddr) -> anyhow::Result<bool> {
        Ok(self.banned.contains(&ip))
    }

    async fn server_flags(&self) -> anyhow::Result<ServerFlags> {
        Ok(self.flags.clone())
    }
}
