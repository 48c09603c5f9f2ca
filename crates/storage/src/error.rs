use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on signal store: {0}")]
    Io(#[from] std::io::Error),
    #[error("Signal store is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
