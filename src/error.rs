use thiserror::Error;

/// Errors surfaced by the music subsystem.
///
/// Every variant except [`MusicError::Internal`] carries a message that is
/// safe to show to the user verbatim. Internal errors are logged in full and
/// reported generically.
#[derive(Debug, Error)]
pub enum MusicError {
    /// Bad index, malformed URL, unparsable timestamp and friends.
    #[error("{0}")]
    UserInput(String),

    #[error("{0}")]
    Permission(String),

    /// Transcoder or metadata lookup failure.
    #[error("{0}")]
    ExternalProcess(String),

    /// Voice session missing or dropped.
    #[error("{0}")]
    Transport(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MusicError {
    pub fn user(msg: impl Into<String>) -> Self {
        Self::UserInput(msg.into())
    }

    pub fn denied(msg: impl Into<String>) -> Self {
        Self::Permission(msg.into())
    }

    pub fn external(msg: impl Into<String>) -> Self {
        Self::ExternalProcess(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Text shown to the end user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Internal(_) => "❌ Something went wrong, try again.".to_string(),
            Self::Transport(msg) => format!("🔌 {msg}"),
            Self::Permission(msg) => format!("🚫 {msg}"),
            other => format!("❌ {other}"),
        }
    }
}

pub type MusicResult<T> = std::result::Result<T, MusicError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_are_reported_generically() {
        let err = MusicError::internal("queue missing for guild 42");
        assert!(!err.user_message().contains("guild 42"));
        assert!(err.to_string().contains("guild 42"));
    }

    #[test]
    fn user_errors_keep_their_text() {
        let err = MusicError::user("Index out of range");
        assert_eq!(err.user_message(), "❌ Index out of range");
    }
}
