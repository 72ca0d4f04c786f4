use serde_json::json;

/// Failures surfaced by the grading core.
///
/// The IPC layer turns each variant into the `{code, message, details}` envelope;
/// none of them is fatal to the daemon.
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    /// Malformed input (bad date, out-of-range score, missing field).
    #[error("{0}")]
    Validation(String),
    /// The operation is well formed but its preconditions do not hold.
    #[error("{message}")]
    Precondition {
        code: &'static str,
        message: String,
        details: Option<serde_json::Value>,
    },
    /// Missing or owned by another professor; the two cases are indistinguishable.
    #[error("{what} not found")]
    NotFound {
        what: &'static str,
        redirect: &'static str,
    },
    /// Unexpected storage failure. The enclosing transaction has been rolled back.
    #[error("{action} failed")]
    Storage {
        action: &'static str,
        #[source]
        source: rusqlite::Error,
    },
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn precondition(code: &'static str, message: impl Into<String>) -> Self {
        Self::Precondition {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(self, details: serde_json::Value) -> Self {
        match self {
            Self::Precondition { code, message, .. } => Self::Precondition {
                code,
                message,
                details: Some(details),
            },
            other => other,
        }
    }

    pub fn class_not_found() -> Self {
        Self::NotFound {
            what: "class",
            redirect: "classes.list",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "bad_params",
            Self::Precondition { code, .. } => *code,
            Self::NotFound { .. } => "not_found",
            Self::Storage { action, .. } => *action,
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Precondition { details, .. } => details.clone(),
            Self::NotFound { redirect, .. } => Some(json!({ "redirect": redirect })),
            _ => None,
        }
    }
}

/// Tags rusqlite failures with the storage action that produced them.
pub trait StorageContext<T> {
    fn storage(self, action: &'static str) -> Result<T, CoreError>;
}

impl<T> StorageContext<T> for Result<T, rusqlite::Error> {
    fn storage(self, action: &'static str) -> Result<T, CoreError> {
        self.map_err(|source| CoreError::Storage { action, source })
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
