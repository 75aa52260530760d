use serde::Serialize;

use crate::config::ServiceConfig;

/// Lifecycle state of a supervised service.
///
/// ```text
/// NotRunning ──start──► Starting ──spawned──► Running ──stop──► Stopping ──exit──► NotRunning
///      ▲                   │                     │
///      └── spawn failed ───┘                     └── exited on its own ──► NotRunning
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceState {
    NotRunning,
    Starting,
    Running,
    Stopping,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::NotRunning => "not-running",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Stopping => "stopping",
        }
    }
}

/// Status snapshot of one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceDescriptor {
    pub id: String,
    pub program: String,
    pub default_args: Vec<String>,
    /// Arguments of the current (or last) launch.
    pub current_args: Vec<String>,
    pub allow_args_override: bool,
    pub default_start: bool,
    pub state: ServiceState,
    /// OS process id while running.
    pub pid: Option<u32>,
    /// How the last launch ended (exit status or spawn error).
    pub last_exit: Option<String>,
}

impl ServiceDescriptor {
    pub(crate) fn from_config(id: &str, cfg: &ServiceConfig) -> Self {
        Self {
            id: id.to_string(),
            program: cfg.program.clone(),
            default_args: cfg.default_args.clone(),
            current_args: cfg.default_args.clone(),
            allow_args_override: cfg.allow_args_override,
            default_start: cfg.default_start,
            state: ServiceState::NotRunning,
            pid: None,
            last_exit: None,
        }
    }
}
