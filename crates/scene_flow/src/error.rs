use std::time::Duration;
use thiserror::Error;

pub type FlowResult<T = ()> = Result<T, FlowError>;

/// Every failure the navigation core can report to a caller.
///
/// Local conditions (`InvalidParameter`, `Busy`, `NoPreviousEntry`) never
/// touch the stack. Resource and activation failures are rolled back before
/// they are returned and are additionally reported to the analytics sink.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("scene not found: {0}")]
    NotFound(String),

    #[error("cannot open scene {path}: {reason}")]
    CannotOpen { path: String, reason: String },

    #[error("another navigation is still pending")]
    Busy,

    #[error("no previous entry on the navigation stack")]
    NoPreviousEntry,

    #[error("activation failed: {0}")]
    ActivationFailed(String),

    #[error("load cancelled")]
    Cancelled,

    #[error("load timed out after {0:?}")]
    TimedOut(Duration),
}

impl FlowError {
    pub fn cannot_open(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CannotOpen {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Stable identifier used in analytics payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidParameter(_) => "invalid_parameter",
            Self::NotFound(_) => "not_found",
            Self::CannotOpen { .. } => "cannot_open",
            Self::Busy => "busy",
            Self::NoPreviousEntry => "no_previous_entry",
            Self::ActivationFailed(_) => "activation_failed",
            Self::Cancelled => "cancelled",
            Self::TimedOut(_) => "timed_out",
        }
    }

    /// Expected conditions that are answered without any stack mutation.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::InvalidParameter(_) | Self::Busy | Self::NoPreviousEntry
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(FlowError::Busy.code(), "busy");
        assert_eq!(FlowError::cannot_open("a", "b").code(), "cannot_open");
        assert_eq!(FlowError::TimedOut(Duration::from_secs(1)).code(), "timed_out");
    }

    #[test]
    fn local_errors() {
        assert!(FlowError::NoPreviousEntry.is_local());
        assert!(FlowError::InvalidParameter(String::new()).is_local());
        assert!(!FlowError::NotFound("x".into()).is_local());
        assert!(!FlowError::ActivationFailed("x".into()).is_local());
    }

    #[test]
    fn display_includes_context() {
        let err = FlowError::cannot_open("levels/forest", "bad header");
        assert_eq!(
            err.to_string(),
            "cannot open scene levels/forest: bad header"
        );
    }
}
