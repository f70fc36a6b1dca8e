use thiserror::Error;

/// Custom error type for sqlclinic operations.
#[derive(Debug, Error)]
pub enum ClinicError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Model transport failed (network, HTTP status, exhausted retries).
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The model returned a response the engine cannot interpret.
    #[error("Malformed model response: {0}")]
    MalformedResponse(String),

    /// The model requested a tool that is not registered.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Tool input failed JSON Schema validation.
    #[error("Invalid input for tool '{tool}': {message}")]
    ToolInput { tool: String, message: String },

    /// Input validation failed (identifiers, option values).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Conversation invariant violated (role, ordering, or tool pairing).
    #[error("Conversation error: {0}")]
    Conversation(String),

    /// Persisting a run, query, or analysis outcome failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration could not be loaded or parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON (de)serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for ClinicError {
    fn from(err: sqlx::Error) -> Self {
        ClinicError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for ClinicError {
    fn from(err: reqwest::Error) -> Self {
        ClinicError::Transport {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<serde_json::Error> for ClinicError {
    fn from(err: serde_json::Error) -> Self {
        ClinicError::Serialization(err.to_string())
    }
}
