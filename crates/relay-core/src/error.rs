use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// The TOML file or an env override could not be read into `RelayConfig`.
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;
