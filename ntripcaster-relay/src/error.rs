use thiserror::Error;

/// Failures raised by the relay subsystem.
///
/// Parse and registry errors are returned synchronously to the admin console
/// or config loader. Connect, transmission and header errors stay inside the
/// connection worker that produced them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("Invalid syntax: {0}")]
    Syntax(String),

    #[error("Option {0} requires an argument")]
    ArgumentRequired(String),

    #[error("Could not connect: {0}")]
    Connect(String),

    #[error("Transmission error: {0}")]
    Transmission(String),

    #[error("Relay refused entrance: {0}")]
    Header(String),

    #[error("Relay not found: {0}")]
    NotFound(String),

    #[error("Missing argument: {0}")]
    NullArgument(&'static str),
}

pub type RelayResult<T> = Result<T, RelayError>;

impl RelayError {
    /// Short machine-friendly name of the error kind, used in admin replies.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Syntax(_) => "syntax",
            Self::ArgumentRequired(_) => "argument-required",
            Self::Connect(_) => "connect",
            Self::Transmission(_) => "transmission",
            Self::Header(_) => "header",
            Self::NotFound(_) => "not-found",
            Self::NullArgument(_) => "null-argument",
        }
    }
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        Self::Transmission(err.to_string())
    }
}
