use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("No price available for {0}")]
    PriceUnavailable(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Data source error: {0}")]
    DataSource(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}
