use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("permission denied: {0}")]
    Permission(String),
    #[error("token request failed{}: {reason}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    TokenFetch { status: Option<u16>, reason: String },
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("media publish failed: {0}")]
    Publish(String),
    #[error("a connection attempt is already in progress")]
    AlreadyConnecting,
    #[error("attempt {0} was superseded")]
    Cancelled(u64),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Coarse classification used by shells to pick an alert style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionErrorKind {
    Validation,
    Permission,
    TokenFetch,
    Connect,
    Publish,
    AlreadyConnecting,
    Cancelled,
    Config,
}

impl SessionError {
    pub fn kind(&self) -> SessionErrorKind {
        match self {
            Self::Validation(_) => SessionErrorKind::Validation,
            Self::Permission(_) => SessionErrorKind::Permission,
            Self::TokenFetch { .. } => SessionErrorKind::TokenFetch,
            Self::Connect(_) => SessionErrorKind::Connect,
            Self::Publish(_) => SessionErrorKind::Publish,
            Self::AlreadyConnecting => SessionErrorKind::AlreadyConnecting,
            Self::Cancelled(_) => SessionErrorKind::Cancelled,
            Self::Config(_) => SessionErrorKind::Config,
        }
    }

    /// Whether the error should reach the user as an alert.
    ///
    /// A superseded attempt is not a failure from the user's point of view,
    /// and a duplicate join tap is a UI bug rather than something to show.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, Self::Cancelled(_) | Self::AlreadyConnecting)
    }

    /// Alert title shown by shells.
    pub fn title(&self) -> &'static str {
        match self.kind() {
            SessionErrorKind::Validation => "Invalid Input",
            SessionErrorKind::Permission => "Permission Required",
            SessionErrorKind::Publish => "Media Error",
            SessionErrorKind::Config => "Configuration Error",
            _ => "Connection Error",
        }
    }
}
