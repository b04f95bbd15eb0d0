/// Result alias that carries the custom [`RecorderError`] type.
pub type Result<T> = std::result::Result<T, RecorderError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    /// Free-form failure reported by a collaborator such as a file writer.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Settings or metadata could not be (de)serialised.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    /// No writer factory is registered under the requested format.
    #[error("unknown output format `{0}`")]
    UnknownFormat(String),
}

impl RecorderError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}
