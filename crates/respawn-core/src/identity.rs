use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;

use crate::error::UpdateError;

/// Channel served by the plain `LATEST` pointer.
pub const DEFAULT_CHANNEL: &str = "stable";

/// Project name of a build that was never stamped.
pub const UNCONFIGURED: &str = "unconfigured";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    Production,
    #[default]
    Development,
}

impl Mode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Production => "PROD",
            Mode::Development => "DEV",
        }
    }
}

impl FromStr for Mode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(if s.eq_ignore_ascii_case("prod") {
            Mode::Production
        } else {
            Mode::Development
        })
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the running process is, as far as the release index is concerned.
///
/// Everything is fixed at startup except the channel, which only changes
/// after a successful channel switch install.
#[derive(Debug)]
pub struct RunningIdentity {
    project_name: String,
    git_tag: String,
    date_tag: String,
    host: String,
    mode: Mode,
    channel: RwLock<String>,
}

impl RunningIdentity {
    #[must_use]
    pub fn new(
        project_name: impl Into<String>,
        git_tag: impl Into<String>,
        date_tag: impl Into<String>,
    ) -> Self {
        Self {
            project_name: project_name.into(),
            git_tag: git_tag.into(),
            date_tag: date_tag.into(),
            host: String::new(),
            mode: Mode::default(),
            channel: RwLock::new(DEFAULT_CHANNEL.to_string()),
        }
    }

    /// Build an identity from raw VCS stamps, typically
    /// `option_env!("RESPAWN_GIT_REVISION")` and `option_env!("RESPAWN_VCS_TIME")`.
    ///
    /// The revision is cut to its first 7 characters and the timestamp keeps
    /// only its digits (`2022-06-01T01:55:46Z` becomes `20220601015546`).
    /// Values that do not fit those shapes fall back to `""` and `"0"`.
    #[must_use]
    pub fn from_build(
        project_name: Option<&str>,
        revision: Option<&str>,
        vcs_time: Option<&str>,
    ) -> Self {
        let project_name = project_name
            .filter(|name| !name.is_empty())
            .unwrap_or(UNCONFIGURED);
        Self::new(
            project_name,
            revision.map(git_tag_from_revision).unwrap_or_default(),
            vcs_time.map_or_else(|| "0".to_string(), date_tag_from_vcs_time),
        )
    }

    #[must_use]
    pub fn with_channel(self, channel: impl Into<String>) -> Self {
        let channel = channel.into();
        Self {
            channel: RwLock::new(if channel.is_empty() {
                DEFAULT_CHANNEL.to_string()
            } else {
                channel
            }),
            ..self
        }
    }

    /// Set the distribution host. A trailing `/` is added when missing.
    #[must_use]
    pub fn with_host(self, host: impl Into<String>) -> Self {
        let mut host = host.into();
        if !host.is_empty() && !host.ends_with('/') {
            host.push('/');
        }
        Self { host, ..self }
    }

    #[must_use]
    pub fn with_mode(self, mode: Mode) -> Self {
        Self { mode, ..self }
    }

    #[must_use]
    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    #[must_use]
    pub fn git_tag(&self) -> &str {
        &self.git_tag
    }

    #[must_use]
    pub fn date_tag(&self) -> &str {
        &self.date_tag
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    #[must_use]
    pub fn channel(&self) -> String {
        self.channel
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_channel(&self, channel: &str) {
        let mut guard = self
            .channel
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        channel.clone_into(&mut *guard);
    }

    /// # Errors
    /// Returns a configuration error when the build carries no project name
    /// or no distribution host was set.
    pub fn ensure_configured(&self) -> Result<(), UpdateError> {
        if self.project_name.is_empty() || self.project_name == UNCONFIGURED {
            return Err(UpdateError::Configuration(
                "project name is not set".to_string(),
            ));
        }
        if self.host.is_empty() {
            return Err(UpdateError::Configuration(
                "distribution host is not set".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether a peer build stamp is strictly more recent than ours.
    ///
    /// Date tags are fixed-width digit strings; when both parse as numbers
    /// they are compared numerically, otherwise lexically.
    #[must_use]
    pub fn is_older_than(&self, peer_date_tag: &str) -> bool {
        match (self.date_tag.parse::<u64>(), peer_date_tag.parse::<u64>()) {
            (Ok(ours), Ok(theirs)) => theirs > ours,
            _ => peer_date_tag > self.date_tag.as_str(),
        }
    }

    /// Build variables, keyed the way release tooling names them.
    #[must_use]
    pub fn vars(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("PROJECT_NAME", self.project_name.clone()),
            ("MODE", self.mode.to_string()),
            ("CHANNEL", self.channel()),
            ("GIT_TAG", self.git_tag.clone()),
            ("DATE_TAG", self.date_tag.clone()),
            ("HOST", self.host.clone()),
        ])
    }
}

fn git_tag_from_revision(revision: &str) -> String {
    revision.get(..7).map(str::to_string).unwrap_or_default()
}

fn date_tag_from_vcs_time(vcs_time: &str) -> String {
    let digits: String = vcs_time.chars().filter(char::is_ascii_digit).collect();
    if digits.len() == 14 {
        digits
    } else {
        "0".to_string()
    }
}
