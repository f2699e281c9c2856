use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("settings store unavailable: {0}")]
    Unavailable(String),

    #[error("failed to read `{key}`: {reason}")]
    Read { key: String, reason: String },

    #[error("failed to write `{key}`: {reason}")]
    Write { key: String, reason: String },

    #[error("stored value for `{key}` has an unexpected type")]
    TypeMismatch { key: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Rejected before touching any state.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The in-memory update stands, but it did not reach the store.
    #[error("change applied but not persisted: {0}")]
    Persistence(#[from] StoreError),
}

impl CoreError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}
