#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum RouterError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("integrity error: {0}")]
    Integrity(String),
    #[error("config error: {0}")]
    Config(String),
}
