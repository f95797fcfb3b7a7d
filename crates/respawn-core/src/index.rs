use std::time::Duration;

use log::{debug, info};
use respawn_platform::Target;

use crate::descriptor::{VersionDescriptor, latest_url};
use crate::download::ArtifactStream;
use crate::error::UpdateError;

/// HTTP policy for talking to the distribution host.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Whole-request timeout for small index resources (`LATEST`, `.arch`).
    pub index_timeout: Duration,
    pub connect_timeout: Duration,
    /// Maximum idle time between body chunks of an artifact download.
    pub read_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            index_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(60),
        }
    }
}

/// Client for the release index served under `host`.
#[derive(Debug, Clone)]
pub struct IndexClient {
    client: reqwest::Client,
    host: String,
    index_timeout: Duration,
}

impl IndexClient {
    /// # Errors
    /// Returns a network error when the HTTP client cannot be built.
    pub fn new(host: &str, config: &HttpConfig) -> Result<Self, UpdateError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .user_agent(format!("respawn/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|error| UpdateError::network("failed to build http client", error))?;

        let mut host = host.to_string();
        if !host.ends_with('/') {
            host.push('/');
        }

        Ok(Self {
            client,
            host,
            index_timeout: config.index_timeout,
        })
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Read the `LATEST` pointer of `channel`.
    ///
    /// # Errors
    /// Network errors for transport failures and non-success statuses,
    /// protocol errors for a body that is not exactly three fields.
    pub async fn resolve(
        &self,
        project_name: &str,
        channel: &str,
    ) -> Result<VersionDescriptor, UpdateError> {
        let url = latest_url(&self.host, project_name, channel);
        debug!("Resolving latest version from {url}");
        let body = self.get_text(&url, "failed to read latest version").await?;
        VersionDescriptor::parse(project_name, channel, &body)
    }

    /// Fail unless `version` publishes a build for `target`.
    ///
    /// # Errors
    /// Network errors when the `.arch` list cannot be fetched, a
    /// compatibility error when `target` is not listed.
    pub async fn check_arch(
        &self,
        version: &VersionDescriptor,
        target: &Target,
    ) -> Result<(), UpdateError> {
        let url = version.arch_url(&self.host);
        let body = self.get_text(&url, "failed to read arch info").await?;
        let wanted = target.token();

        if body.split_whitespace().any(|published| published == wanted) {
            debug!("Version {} is available for {wanted}", version.git_tag);
            Ok(())
        } else {
            Err(UpdateError::Compatibility { target: wanted })
        }
    }

    /// Start downloading the build of `version` for `target`.
    ///
    /// The artifact is not checksummed or signature-checked: whoever can
    /// serve the index can serve the binary.
    ///
    /// # Errors
    /// Returns a network error for transport failures or a non-success
    /// status, before any byte is handed out.
    pub async fn download(
        &self,
        version: &VersionDescriptor,
        target: &Target,
    ) -> Result<ArtifactStream, UpdateError> {
        let url = version.artifact_url(&self.host, target);
        info!("Downloading update from {url}");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|error| UpdateError::network("failed to fetch update", error))?;

        if !response.status().is_success() {
            return Err(UpdateError::HttpStatus {
                context: "failed to fetch update",
                status: response.status(),
                url,
            });
        }

        Ok(ArtifactStream::bzip2(url, response))
    }

    async fn get_text(&self, url: &str, context: &'static str) -> Result<String, UpdateError> {
        let response = self
            .client
            .get(url)
            .timeout(self.index_timeout)
            .send()
            .await
            .map_err(|error| UpdateError::network(context, error))?;

        if !response.status().is_success() {
            return Err(UpdateError::HttpStatus {
                context,
                url: url.to_string(),
                status: response.status(),
            });
        }

        response
            .text()
            .await
            .map_err(|error| UpdateError::network(context, error))
    }
}
