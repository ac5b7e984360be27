// Error types for add-ip-rules

use crate::apply::BackendError;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the application. Every variant is fatal.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("error reading config file {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error parsing config: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("interface {0} not found")]
    LinkNotFound(String),

    #[error("interface {name} is a {kind} link, only plain devices are supported")]
    UnsupportedLinkType { name: String, kind: String },

    #[error("error getting link for interface {name}: {source}")]
    LinkLookup {
        name: String,
        #[source]
        source: BackendError,
    },

    #[error("error adding routing policy {rule} on {interface}: {source}")]
    RuleAdd {
        interface: String,
        rule: String,
        #[source]
        source: BackendError,
    },

    #[error("error adding route {route} on {interface}: {source}")]
    RouteAdd {
        interface: String,
        route: String,
        #[source]
        source: BackendError,
    },

    #[error("netlink error: {0}")]
    Netlink(String),
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Convert error to an operator hint
    pub fn user_message(&self) -> String {
        match self {
            AppError::ConfigRead { .. } => {
                "Check that the config path exists and is readable.".to_string()
            }
            AppError::ConfigParse(_) => {
                "Check the YAML syntax and that every prefix is in CIDR notation.".to_string()
            }
            AppError::LinkNotFound(name) => {
                format!("Make sure interface {} exists before running.", name)
            }
            AppError::UnsupportedLinkType { .. } => {
                "Only ethernet-style devices can carry routes from this tool.".to_string()
            }
            AppError::LinkLookup { .. } | AppError::Netlink(_) => {
                "Netlink request failed. This usually needs CAP_NET_ADMIN.".to_string()
            }
            AppError::RuleAdd { .. } | AppError::RouteAdd { .. } => {
                "The kernel rejected the change. Entries added before this one were kept; remove them before re-running.".to_string()
            }
        }
    }

    /// Process exit status for this error
    pub fn exit_code(&self) -> u8 {
        1
    }
}
