use respawn_platform::Target;

use crate::error::UpdateError;
use crate::identity::DEFAULT_CHANNEL;

/// A release as published by the `LATEST` pointer of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionDescriptor {
    pub project_name: String,
    pub channel: String,
    /// Build timestamp, e.g. `20230518035112`.
    pub date_tag: String,
    /// First 7 hex digits of the revision, e.g. `e894f37`.
    pub git_tag: String,
    /// Opaque artifact set name, e.g. `agent_stable_20230518035112_e894f37`.
    pub update_prefix: String,
}

impl VersionDescriptor {
    /// Parse the body of a `LATEST` pointer: `date_tag git_tag update_prefix`.
    ///
    /// # Errors
    /// Returns a protocol error unless the body holds exactly three
    /// whitespace-separated fields.
    pub fn parse(project_name: &str, channel: &str, body: &str) -> Result<Self, UpdateError> {
        let fields: Vec<&str> = body.split_whitespace().collect();
        let [date_tag, git_tag, update_prefix] = fields.as_slice() else {
            return Err(UpdateError::protocol(
                "failed to parse update data",
                format!("expected 3 fields, got {}: {fields:?}", fields.len()),
            ));
        };

        Ok(Self {
            project_name: project_name.to_string(),
            channel: channel.to_string(),
            date_tag: (*date_tag).to_string(),
            git_tag: (*git_tag).to_string(),
            update_prefix: (*update_prefix).to_string(),
        })
    }

    #[must_use]
    pub fn arch_url(&self, host: &str) -> String {
        format!("{host}{}/{}.arch", self.project_name, self.update_prefix)
    }

    /// Location of the compressed executable for `target`. Use
    /// [`crate::IndexClient::download`] to receive decompressed bytes.
    #[must_use]
    pub fn artifact_url(&self, host: &str, target: &Target) -> String {
        format!(
            "{host}{project}/{prefix}/{project}_{target}.bz2",
            project = self.project_name,
            prefix = self.update_prefix,
            target = target.token(),
        )
    }
}

/// `LATEST` pointer for a channel; the default channel uses the bare name.
#[must_use]
pub fn latest_url(host: &str, project_name: &str, channel: &str) -> String {
    if channel.is_empty() || channel == DEFAULT_CHANNEL {
        format!("{host}{project_name}/LATEST")
    } else {
        format!("{host}{project_name}/LATEST-{channel}")
    }
}
