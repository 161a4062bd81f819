use thiserror::Error;

/// Canonical result for every daoplan crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors fall into two classes: configuration errors raised once while a
/// dispatch table is being bound, and execution errors raised per call.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Duplicated result: {0}")]
    DuplicatedResult(String),

    #[error("Parameter not found: {0}")]
    ParameterNotFound(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Statement error: {0}")]
    Statement(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Hook error: {0}")]
    Hook(String),

    #[error("Declaration parse error: {0}")]
    Parse(String),

    #[error("Internal invariant failed: {0}")]
    Invariant(String),

    /// An error that was in flight when further errors (e.g. from after-hooks)
    /// were raised. The primary error is what the caller sees first.
    #[error("{primary} (+{} suppressed)", .suppressed.len())]
    WithSuppressed {
        primary: Box<Error>,
        suppressed: Vec<Error>,
    },
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// True for bind-time configuration errors.
    pub fn is_config(&self) -> bool {
        matches!(self.primary(), Error::Config(_))
    }

    /// Attach `other` as a secondary error without replacing `self`.
    pub fn with_suppressed(self, other: Error) -> Self {
        match self {
            Error::WithSuppressed {
                primary,
                mut suppressed,
            } => {
                suppressed.push(other);
                Error::WithSuppressed {
                    primary,
                    suppressed,
                }
            }
            primary => Error::WithSuppressed {
                primary: Box::new(primary),
                suppressed: vec![other],
            },
        }
    }

    /// The first error raised, skipping the suppression wrapper.
    pub fn primary(&self) -> &Error {
        match self {
            Error::WithSuppressed { primary, .. } => primary.primary(),
            other => other,
        }
    }

    pub fn suppressed(&self) -> &[Error] {
        match self {
            Error::WithSuppressed { suppressed, .. } => suppressed,
            _ => &[],
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Parse(e.to_string())
    }
}
