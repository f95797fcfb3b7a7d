use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use respawn_core::{HttpConfig, Mode, Restarter, SpawnRestarter, UpdaterConfig};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSettings {
    /// Overrides the project name baked in at build time.
    #[serde(default)]
    pub project_name: Option<String>,

    #[serde(default)]
    pub channel: Option<String>,

    #[serde(default)]
    pub host: Option<String>,

    /// `PROD` turns the auto-updater on.
    #[serde(default)]
    pub mode: Option<String>,

    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,

    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,

    #[serde(default = "default_restart_delay")]
    pub restart_delay_secs: u64,

    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    #[serde(default)]
    pub restart_strategy: RestartStrategy,

    #[serde(default)]
    pub debug_logging: bool,

    #[serde(default = "default_max_log_size_bytes")]
    pub max_log_size_bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartStrategy {
    #[cfg_attr(unix, default)]
    Exec,
    #[cfg_attr(not(unix), default)]
    Spawn,
}

fn default_check_interval() -> u64 {
    60 * 60
}

fn default_initial_delay() -> u64 {
    5 * 60
}

fn default_drain_timeout() -> u64 {
    60 * 60
}

fn default_restart_delay() -> u64 {
    1
}

fn default_http_timeout() -> u64 {
    30
}

fn default_max_log_size_bytes() -> u64 {
    5 * 1024 * 1024
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            project_name: None,
            channel: None,
            host: None,
            mode: None,
            check_interval_secs: default_check_interval(),
            initial_delay_secs: default_initial_delay(),
            drain_timeout_secs: default_drain_timeout(),
            restart_delay_secs: default_restart_delay(),
            http_timeout_secs: default_http_timeout(),
            restart_strategy: RestartStrategy::default(),
            debug_logging: false,
            max_log_size_bytes: default_max_log_size_bytes(),
        }
    }
}

impl DaemonSettings {
    /// Read settings from `path`. A missing file yields the defaults; a file
    /// that exists but does not parse is an error, so that a typo does not
    /// silently point the daemon at the wrong channel.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                serde_json::from_str(&content).map_err(|source| AppError::SettingsParse {
                    path: path.to_path_buf(),
                    source,
                })
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(error) => Err(AppError::io("failed to read settings", error)),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|error| AppError::io("failed to create config directory", error))?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|error| AppError::io("failed to encode settings", error.into()))?;
        std::fs::write(path, content)
            .map_err(|error| AppError::io("failed to write settings", error))
    }

    pub fn mode(&self) -> Option<Mode> {
        self.mode.as_deref().and_then(|mode| mode.parse().ok())
    }

    pub fn updater_config(&self) -> UpdaterConfig {
        UpdaterConfig {
            initial_delay: Duration::from_secs(self.initial_delay_secs),
            check_interval: Duration::from_secs(self.check_interval_secs.max(1)),
            drain_timeout: Duration::from_secs(self.drain_timeout_secs),
            restart_delay: Duration::from_secs(self.restart_delay_secs),
            http: HttpConfig {
                index_timeout: Duration::from_secs(self.http_timeout_secs),
                ..HttpConfig::default()
            },
            ..UpdaterConfig::default()
        }
    }

    pub fn restarter(&self) -> Arc<dyn Restarter> {
        match self.restart_strategy {
            #[cfg(unix)]
            RestartStrategy::Exec => Arc::new(respawn_core::ExecRestarter),
            #[cfg(not(unix))]
            RestartStrategy::Exec => {
                log::warn!("exec restarts are not available here, spawning instead");
                Arc::new(SpawnRestarter)
            }
            RestartStrategy::Spawn => Arc::new(SpawnRestarter),
        }
    }
}
