use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeckError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid pagination: {0}")]
    Pagination(String),
}

/// Failures that end an event stream. Malformed `data:` payloads are not
/// errors; the decoder logs and skips them.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Stream transport failed: {0}")]
    Transport(#[from] std::io::Error),
}
