pub mod auth;
pub mod coinbase;
pub mod websocket;

pub use auth::*;
pub use coinbase::*;
pub use websocket::*;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out after {0}s")]
    Timeout(u64),
    #[error("rate limited")]
    RateLimited,
    #[error("order rejected: {0}")]
    Rejected(String),
    #[error("auth error: {0}")]
    Auth(String),
    #[error("parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ExchangeError::Timeout(10)
        } else if e.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS) {
            ExchangeError::RateLimited
        } else {
            ExchangeError::Network(e.to_string())
        }
    }
}

impl ExchangeError {
    /// Errors that should slow the REST poller rather than trip the breaker.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ExchangeError::RateLimited)
    }
}
