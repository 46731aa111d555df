//! Configuration error types.

/// Result type alias for config operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read a config file.
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Missing required field.
    #[error("missing required field '{field}' in {context}")]
    MissingField { field: String, context: String },

    /// Two server entries in one file share a name.
    #[error("duplicate server name '{0}'")]
    DuplicateServer(String),

    /// Referenced server not configured.
    #[error("server '{0}' not found in config")]
    ServerNotFound(String),

    /// Referenced server is configured but disabled.
    #[error("server '{0}' is disabled")]
    ServerDisabled(String),
}
