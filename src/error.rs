use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Coarse classification of a [`TelemetryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A caller passed an empty or malformed value to a registry operation.
    InvalidArgument,
    /// The operation is not allowed in the current state (disabled registry, torn-down manager).
    IllegalState,
    /// Validation failed, or a subsystem could not be built.
    Configuration,
    /// A single resource failed to dispose during teardown.
    ResourceDisposal,
}

/// Errors produced by the registry, the lifecycle manager and the orchestrator.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid argument `{argument}`: {message}")]
    InvalidArgument {
        argument: &'static str,
        value: Option<String>,
        message: String,
    },

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("{}", format_configuration(.errors, .warnings))]
    Configuration {
        errors: Vec<String>,
        warnings: Vec<String>,
        #[source]
        source: Option<BoxError>,
    },

    #[error("failed to dispose {resource}: {source}")]
    ResourceDisposal {
        resource: String,
        #[source]
        source: BoxError,
    },
}

impl TelemetryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::IllegalState(_) => ErrorKind::IllegalState,
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::ResourceDisposal { .. } => ErrorKind::ResourceDisposal,
        }
    }

    pub(crate) fn invalid_argument(
        argument: &'static str,
        value: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidArgument {
            argument,
            value: Some(value.into()),
            message: message.into(),
        }
    }

    /// Wrap a subsystem build failure. The failure message becomes the single error entry.
    pub(crate) fn build_failure(source: anyhow::Error, warnings: Vec<String>) -> Self {
        Self::Configuration {
            errors: vec![format!("{source:#}")],
            warnings,
            source: Some(source.into()),
        }
    }

    pub(crate) fn disposal(resource: impl Into<String>, source: anyhow::Error) -> Self {
        Self::ResourceDisposal {
            resource: resource.into(),
            source: source.into(),
        }
    }

    /// Blocking error strings carried by a configuration error; empty for other kinds.
    pub fn errors(&self) -> &[String] {
        match self {
            Self::Configuration { errors, .. } => errors,
            _ => &[],
        }
    }

    /// Advisory strings carried by a configuration error; empty for other kinds.
    pub fn warnings(&self) -> &[String] {
        match self {
            Self::Configuration { warnings, .. } => warnings,
            _ => &[],
        }
    }
}

fn format_configuration(errors: &[String], warnings: &[String]) -> String {
    let mut message = format!("telemetry configuration is invalid ({} error(s))", errors.len());
    for error in errors {
        message.push_str("\n  error: ");
        message.push_str(error);
    }
    for warning in warnings {
        message.push_str("\n  warning: ");
        message.push_str(warning);
    }
    message
}

pub type Result<T> = std::result::Result<T, TelemetryError>;
