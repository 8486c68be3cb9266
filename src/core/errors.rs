//! FXR-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, FxrError>;

/// Top-level error type for the fixture reconciler.
#[derive(Debug, Error)]
pub enum FxrError {
    #[error("[FXR-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[FXR-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[FXR-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[FXR-2001] malformed {fixture} declaration: {details}")]
    Declaration {
        fixture: &'static str,
        details: String,
    },

    #[error("[FXR-2002] storage '{storage}' has no entity '{entity}'")]
    UnknownEntity { storage: String, entity: String },

    #[error("[FXR-2003] storage '{name}' is not registered")]
    UnknownStorage { name: String },

    #[error("[FXR-2004] callback '{name}' is not registered")]
    UnknownCallback { name: String },

    #[error("[FXR-2005] node '{node}', fixture {fixture}: {source}")]
    Setup {
        node: String,
        fixture: &'static str,
        #[source]
        source: Box<FxrError>,
    },

    #[error("[FXR-2101] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[FXR-2102] dataset failure for '{storage}': {details}")]
    Dataset { storage: String, details: String },

    #[error("[FXR-2103] callback '{name}' failed: {details}")]
    Hook { name: String, details: String },

    #[error("[FXR-2104] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[FXR-3001] scope stack discipline violated: {details}")]
    StackDiscipline { details: String },

    #[error("[FXR-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[FXR-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl FxrError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "FXR-1001",
            Self::MissingConfig { .. } => "FXR-1002",
            Self::ConfigParse { .. } => "FXR-1003",
            Self::Declaration { .. } => "FXR-2001",
            Self::UnknownEntity { .. } => "FXR-2002",
            Self::UnknownStorage { .. } => "FXR-2003",
            Self::UnknownCallback { .. } => "FXR-2004",
            Self::Setup { .. } => "FXR-2005",
            Self::Sql { .. } => "FXR-2101",
            Self::Dataset { .. } => "FXR-2102",
            Self::Hook { .. } => "FXR-2103",
            Self::Serialization { .. } => "FXR-2104",
            Self::StackDiscipline { .. } => "FXR-3001",
            Self::Io { .. } => "FXR-3002",
            Self::Runtime { .. } => "FXR-3900",
        }
    }

    /// Whether the failure happened while converting or applying fixtures,
    /// as opposed to a contract violation by the caller.
    #[must_use]
    pub const fn is_setup_failure(&self) -> bool {
        !matches!(
            self,
            Self::StackDiscipline { .. }
                | Self::InvalidConfig { .. }
                | Self::MissingConfig { .. }
                | Self::ConfigParse { .. }
        )
    }

    /// Whether the failure came from turning a declaration into fixture state.
    #[must_use]
    pub fn is_declaration_failure(&self) -> bool {
        match self {
            Self::Declaration { .. }
            | Self::UnknownEntity { .. }
            | Self::UnknownStorage { .. }
            | Self::UnknownCallback { .. } => true,
            Self::Setup { source, .. } => source.is_declaration_failure(),
            _ => false,
        }
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for declaration errors.
    #[must_use]
    pub fn declaration(fixture: &'static str, details: impl Into<String>) -> Self {
        Self::Declaration {
            fixture,
            details: details.into(),
        }
    }

    /// Attach the node and fixture kind that were being set up.
    #[must_use]
    pub fn in_setup(self, node: &str, fixture: &'static str) -> Self {
        match self {
            already @ Self::Setup { .. } => already,
            other => Self::Setup {
                node: node.to_string(),
                fixture,
                source: Box::new(other),
            },
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for FxrError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for FxrError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for FxrError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
