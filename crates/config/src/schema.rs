//! Config schema types (server, auth, database, terminal, monitor).

use std::path::PathBuf;

use {
    secrecy::Secret,
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostdeckConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub database: DatabaseConfig,
    pub terminal: TerminalConfig,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

/// Identity verification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret for identity tokens. Never written back to disk; usually
    /// supplied through `HOSTDECK_JWT_SECRET` or a `${VAR}` placeholder.
    #[serde(skip_serializing)]
    pub secret: Option<Secret<String>>,

    /// Cookie carrying the identity token.
    pub cookie_name: String,

    /// Reject WebSocket upgrades that carry no valid identity.
    pub require_identity: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: None,
            cookie_name: "jwt".into(),
            require_identity: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file. Defaults to `~/.hostdeck/hostdeck.db`.
    pub path: Option<PathBuf>,
}

/// Shell spawned for each terminal connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    pub shell: String,
    pub args: Vec<String>,
    pub cols: u16,
    pub rows: u16,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            shell: "/bin/bash".into(),
            args: Vec::new(),
            cols: 80,
            rows: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_secs: u64,
    pub top_processes: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 2,
            top_processes: 10,
        }
    }
}

impl HostdeckConfig {
    /// Resolved SQLite path: configured value or the data-dir default.
    pub fn database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| crate::loader::data_dir().join("hostdeck.db"))
    }
}
