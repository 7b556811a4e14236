//! Error types for the tunnel engine.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised by the tunnel engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed or incomplete tunnel parameters
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A generated unit could not be written or secured
    #[error("Failed to apply {path}: {source}")]
    Apply {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The network manager could not be restarted
    #[error("Reload of {service} failed: {detail}")]
    Reload { service: String, detail: String },

    /// The reachability check tool could not be run at all
    #[error("Could not run reachability check {tool}: {source}")]
    ProbeTool {
        tool: String,
        #[source]
        source: io::Error,
    },

    /// Terminal is already configured and force was not given
    #[error("Refusing to change existing system #{0} without force")]
    AlreadyConfigured(u32),

    /// The backend could not be reached or rejected the request
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The legacy transport service could not be switched
    #[error("Legacy transport error: {0}")]
    LegacyTransport(String),

    /// Host name, mirror or hosts file could not be updated
    #[error("Host identity error: {0}")]
    HostIdentity(String),

    /// A freshly set up transport does not reach its server
    #[error("Cannot contact VPN server {0}")]
    Unreachable(String),
}

/// Machine-classifiable error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Apply,
    Reload,
    ProbeTool,
    AlreadyConfigured,
    BackendUnavailable,
    LegacyTransport,
    HostIdentity,
    Unreachable,
}

impl ErrorKind {
    /// Stable snake_case tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration_error",
            ErrorKind::Apply => "apply_error",
            ErrorKind::Reload => "reload_error",
            ErrorKind::ProbeTool => "probe_tool_error",
            ErrorKind::AlreadyConfigured => "already_configured",
            ErrorKind::BackendUnavailable => "backend_unavailable",
            ErrorKind::LegacyTransport => "legacy_transport_error",
            ErrorKind::HostIdentity => "host_identity_error",
            ErrorKind::Unreachable => "unreachable",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EngineError {
    /// Shorthand for a [`EngineError::Configuration`] error.
    pub fn config(message: impl Into<String>) -> Self {
        EngineError::Configuration(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Configuration(_) => ErrorKind::Configuration,
            EngineError::Apply { .. } => ErrorKind::Apply,
            EngineError::Reload { .. } => ErrorKind::Reload,
            EngineError::ProbeTool { .. } => ErrorKind::ProbeTool,
            EngineError::AlreadyConfigured(_) => ErrorKind::AlreadyConfigured,
            EngineError::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            EngineError::LegacyTransport(_) => ErrorKind::LegacyTransport,
            EngineError::HostIdentity(_) => ErrorKind::HostIdentity,
            EngineError::Unreachable(_) => ErrorKind::Unreachable,
        }
    }

    /// Process exit code: 1 for an unreachable server, 3 for failed
    /// subprocesses, 2 for everything else.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Unreachable => 1,
            ErrorKind::Reload | ErrorKind::ProbeTool | ErrorKind::LegacyTransport => 3,
            _ => 2,
        }
    }
}
