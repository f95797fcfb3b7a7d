use std::path::Path;

use thiserror::Error;

/// Broad failure classes, used to decide recovery (all of them end with
/// "keep running the current binary").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Configuration,
    Network,
    Protocol,
    Compatibility,
    Filesystem,
    Process,
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("updater is not configured: {0}")]
    Configuration(String),
    #[error("{context}: {source}")]
    Network {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{context}: HTTP {status} from {url}")]
    HttpStatus {
        context: &'static str,
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("{context}: {details}")]
    Protocol {
        context: &'static str,
        details: String,
    },
    #[error("no version available for {target}")]
    Compatibility { target: String },
    #[error("{context}: {source}")]
    Filesystem {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{context}: {details}")]
    Process {
        context: &'static str,
        details: String,
    },
}

impl UpdateError {
    pub(crate) fn network(context: &'static str, source: reqwest::Error) -> Self {
        Self::Network { context, source }
    }

    pub(crate) fn protocol(context: &'static str, details: impl Into<String>) -> Self {
        Self::Protocol {
            context,
            details: details.into(),
        }
    }

    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Filesystem { context, source }
    }

    pub(crate) fn io_with_path(context: &'static str, path: &Path, source: &std::io::Error) -> Self {
        Self::io(
            context,
            std::io::Error::new(source.kind(), format!("{}: {source}", path.display())),
        )
    }

    pub(crate) fn process(context: &'static str, details: impl std::fmt::Display) -> Self {
        Self::Process {
            context,
            details: details.to_string(),
        }
    }

    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Configuration(_) => ErrorClass::Configuration,
            Self::Network { .. } | Self::HttpStatus { .. } => ErrorClass::Network,
            Self::Protocol { .. } => ErrorClass::Protocol,
            Self::Compatibility { .. } => ErrorClass::Compatibility,
            Self::Filesystem { .. } => ErrorClass::Filesystem,
            Self::Process { .. } => ErrorClass::Process,
        }
    }
}
