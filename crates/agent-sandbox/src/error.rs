use thiserror::Error;

/// Why a run ended early. The display text is the message the agent sees
/// after [`crate::ERROR_PREFIX`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SandboxError {
    /// An exception raised by the executed program, or a syntax error in it.
    /// `kind` is the exception's class name.
    #[error("{message}")]
    Raised { kind: String, message: String },

    /// The interpreter itself failed outside the executed program.
    #[error("{0}")]
    Interpreter(String),
}

impl SandboxError {
    pub fn raised(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Raised {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Exception class name, or `None` for interpreter failures.
    pub fn kind(&self) -> Option<&str> {
        match self {
            Self::Raised { kind, .. } => Some(kind),
            Self::Interpreter(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_the_message() {
        let error = SandboxError::raised("KeyError", "'b'");
        assert_eq!(error.to_string(), "'b'");
        assert_eq!(error.kind(), Some("KeyError"));
        assert_eq!(SandboxError::Interpreter("boom".into()).kind(), None);
    }
}
