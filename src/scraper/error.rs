use std::time::Duration;
use thiserror::Error;

/// Failures inside the scraping layer. None of these reach an HTTP client:
/// the aggregator turns every one of them into fallback data.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("not an absolute http(s) url: {0}")]
    InvalidUrl(String),

    #[error("invalid wait selector {0:?}")]
    InvalidSelector(String),

    #[error("navigator failed to launch: {0}")]
    Launch(String),

    #[error("navigation to {url} timed out after {elapsed:.2?}")]
    NavigationTimeout { url: String, elapsed: Duration },

    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("navigator is closed")]
    NavigatorClosed,

    #[error("no strategy located a value for {field}")]
    ExtractionMiss { field: String },

    #[error("{field}: implausible value {raw:?}")]
    MalformedUpstreamData { field: String, raw: String },
}

impl ScrapeError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http { .. } => true,
            Self::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_names_url() {
        let e = ScrapeError::NavigationTimeout {
            url: "https://www.brvm.org/fr/indices".into(),
            elapsed: Duration::from_secs(30),
        };
        let msg = e.to_string();
        assert!(msg.contains("https://www.brvm.org/fr/indices"));
        assert!(msg.contains("30"));
    }

    #[test]
    fn test_transient_classification() {
        let busy = ScrapeError::HttpStatus { url: "u".into(), status: 503 };
        let gone = ScrapeError::HttpStatus { url: "u".into(), status: 404 };
        assert!(busy.is_transient());
        assert!(!gone.is_transient());
        assert!(!ScrapeError::NavigatorClosed.is_transient());
    }
}
