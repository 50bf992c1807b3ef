//! systemd units the dashboard may inspect and control. Only names on the
//! tracked list ever reach `systemctl`.

use std::{fmt, str::FromStr};

use {serde::Serialize, tokio::process::Command, tracing::debug};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedService {
    pub name: &'static str,
    pub display_name: &'static str,
}

pub const TRACKED_SERVICES: &[TrackedService] = &[
    TrackedService {
        name: "nginx",
        display_name: "Nginx Web Server",
    },
    TrackedService {
        name: "docker",
        display_name: "Docker Engine",
    },
    TrackedService {
        name: "mysql",
        display_name: "MySQL Database",
    },
    TrackedService {
        name: "postgresql",
        display_name: "PostgreSQL",
    },
    TrackedService {
        name: "ssh",
        display_name: "SSH Daemon",
    },
    TrackedService {
        name: "apache2",
        display_name: "Apache Web Server",
    },
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub name: String,
    pub display_name: String,
    /// `systemctl is-active` output, e.g. `active`, `inactive`, `failed`.
    pub status: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Invalid action")]
    InvalidAction(String),

    #[error("Service not managed")]
    NotManaged(String),

    #[error("Failed to {action} {name}: {reason}")]
    Failed {
        action: ServiceAction,
        name: String,
        reason: String,
    },
}

impl ServiceError {
    /// Rejected before anything was executed.
    pub fn is_invalid_request(&self) -> bool {
        matches!(self, Self::InvalidAction(_) | Self::NotManaged(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
    Enable,
    Disable,
}

impl ServiceAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Enable => "enable",
            Self::Disable => "disable",
        }
    }

    pub fn past_tense(self) -> &'static str {
        match self {
            Self::Start => "started",
            Self::Stop => "stopped",
            Self::Restart => "restarted",
            Self::Enable => "enabled",
            Self::Disable => "disabled",
        }
    }
}

impl fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceAction {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "restart" => Ok(Self::Restart),
            "enable" => Ok(Self::Enable),
            "disable" => Ok(Self::Disable),
            other => Err(ServiceError::InvalidAction(other.to_string())),
        }
    }
}

pub fn tracked_service(name: &str) -> Result<&'static TrackedService, ServiceError> {
    TRACKED_SERVICES
        .iter()
        .find(|s| s.name == name)
        .ok_or_else(|| ServiceError::NotManaged(name.to_string()))
}

/// Current state of every tracked unit. Anything `systemctl` can't answer
/// (unit missing, no systemd) reads as `inactive`.
pub async fn service_statuses() -> Vec<ServiceStatus> {
    let mut statuses = Vec::with_capacity(TRACKED_SERVICES.len());
    for service in TRACKED_SERVICES {
        // `is-active` exits non-zero for inactive units; stdout still holds the state.
        let status = match Command::new("systemctl")
            .args(["is-active", service.name])
            .output()
            .await
        {
            Ok(out) => String::from_utf8_lossy(&out.stdout).trim().to_string(),
            Err(e) => {
                debug!(service = service.name, error = %e, "systemctl unavailable");
                String::new()
            },
        };
        statuses.push(ServiceStatus {
            name: service.name.to_string(),
            display_name: service.display_name.to_string(),
            status: if status.is_empty() {
                "inactive".to_string()
            } else {
                status
            },
        });
    }
    statuses
}

/// Run `systemctl <action> <unit>` for a tracked unit.
pub async fn manage_service(
    action: ServiceAction,
    service: &TrackedService,
) -> Result<(), ServiceError> {
    let failed = |reason: String| ServiceError::Failed {
        action,
        name: service.name.to_string(),
        reason,
    };
    let output = Command::new("systemctl")
        .args([action.as_str(), service.name])
        .output()
        .await
        .map_err(|e| failed(e.to_string()))?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    Err(failed(if stderr.is_empty() {
        output.status.to_string()
    } else {
        stderr
    }))
}
