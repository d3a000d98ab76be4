/// Shared error type used across all Helmsman crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("policy violation: {0}")]
    Policy(String),

    #[error("config: {0}")]
    Config(String),

    #[error("memory graph: {0}")]
    Memory(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the LLM retry schedule may re-attempt after this error.
    ///
    /// Timeouts, rate limits, and server-side failures are transient;
    /// everything else (connection refused, 4xx, bad payloads, policy
    /// denials) fails immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::RateLimited(_) | Error::Server(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(Error::Timeout("t".into()).is_retryable());
        assert!(Error::RateLimited("429".into()).is_retryable());
        assert!(Error::Server("503".into()).is_retryable());
        assert!(!Error::Http("connect refused".into()).is_retryable());
        assert!(!Error::Policy("denied".into()).is_retryable());
        assert!(!Error::InvalidResponse("bad json".into()).is_retryable());
    }
}
