use thiserror::Error;

/// Errors surfaced by listeners and server construction.
///
/// Failures inside a single connection are logged and end that connection;
/// they never stop the listener.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),
}
