use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("config build error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to create HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}
