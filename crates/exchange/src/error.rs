use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExchangeError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Rate limited: {0}")]
    RateLimited(String),
    #[error("Unknown order: {0}")]
    UnknownOrder(String),
    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),
    #[error("Order rejected ({code}): {msg}")]
    Rejected { code: i64, msg: String },
    #[error("Binance API error ({code}): {msg}")]
    Api { code: i64, msg: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ExchangeError {
    /// Timeouts, disconnects and rate limits clear up on their own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RateLimited(_))
    }

    pub fn is_unknown_order(&self) -> bool {
        matches!(self, Self::UnknownOrder(_))
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidResponse(e.to_string())
    }
}
