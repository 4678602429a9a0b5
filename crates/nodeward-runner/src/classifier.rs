//! Error classification for retry decisions and metrics bucketing.
//!
//! Typed `NodeError` variants are classified directly. Untyped errors
//! (`NodeError::Other`) are inspected for a typed cause in their chain and
//! only then matched against known message patterns.

use std::io::ErrorKind;
use std::sync::OnceLock;

use regex::Regex;

use nodeward_core::error::NodeError;
use nodeward_core::types::{Classification, ErrorCategory};

fn network_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(econnrefused|econnreset|enotfound|eai_again|epipe|connection (refused|reset|closed|aborted)|dns|socket hang up|network (error|unreachable))",
        )
        .expect("valid network regex")
    })
}

fn timeout_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(etimedout|timed out|timeout)").expect("valid timeout regex")
    })
}

fn rate_limit_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(\b429\b|too many requests|rate.?limit)").expect("valid rate limit regex")
    })
}

const fn verdict(category: ErrorCategory, retryable: bool) -> Classification {
    Classification {
        category,
        retryable,
    }
}

/// Classify a node error. Total and side-effect free.
pub fn classify(error: &NodeError) -> Classification {
    match error {
        NodeError::Validation(_) => verdict(ErrorCategory::Validation, false),
        NodeError::Json(e) => classify_json(e),
        NodeError::Programming(_) => verdict(ErrorCategory::Programming, false),
        NodeError::Network(_) => verdict(ErrorCategory::Network, true),
        NodeError::Timeout { .. } => verdict(ErrorCategory::Timeout, true),
        NodeError::Io(e) => classify_io(e).unwrap_or_else(|| classify_message(&e.to_string())),
        NodeError::RateLimited(_) => verdict(ErrorCategory::RateLimit, true),
        NodeError::CircuitOpen { .. } => verdict(ErrorCategory::CircuitOpen, false),
        NodeError::Cancelled { .. } => verdict(ErrorCategory::Cancellation, false),
        NodeError::RetryExhausted { errors, .. } => {
            let category = errors
                .last()
                .map(|e| classify(e).category)
                .unwrap_or(ErrorCategory::Unknown);
            verdict(category, false)
        }
        NodeError::Other(e) => classify_foreign(e),
    }
}

fn classify_json(e: &serde_json::Error) -> Classification {
    if e.is_io() {
        verdict(ErrorCategory::Network, true)
    } else {
        // Syntax, data, and EOF errors all mean malformed input.
        verdict(ErrorCategory::Validation, false)
    }
}

fn classify_io(e: &std::io::Error) -> Option<Classification> {
    match e.kind() {
        ErrorKind::TimedOut => Some(verdict(ErrorCategory::Timeout, true)),
        ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::BrokenPipe
        | ErrorKind::AddrNotAvailable => Some(verdict(ErrorCategory::Network, true)),
        ErrorKind::InvalidData | ErrorKind::InvalidInput => {
            Some(verdict(ErrorCategory::Validation, false))
        }
        _ => None,
    }
}

fn classify_foreign(e: &anyhow::Error) -> Classification {
    for cause in e.chain() {
        if let Some(node_err) = cause.downcast_ref::<NodeError>() {
            return classify(node_err);
        }
        if let Some(io_err) = cause.downcast_ref::<std::io::Error>() {
            if let Some(c) = classify_io(io_err) {
                return c;
            }
        }
        if let Some(json_err) = cause.downcast_ref::<serde_json::Error>() {
            return classify_json(json_err);
        }
    }
    // Alternate format includes the whole cause chain.
    classify_message(&format!("{:#}", e))
}

/// Fallback for errors that carry no type information.
pub fn classify_message(message: &str) -> Classification {
    if network_pattern().is_match(message) {
        verdict(ErrorCategory::Network, true)
    } else if timeout_pattern().is_match(message) {
        verdict(ErrorCategory::Timeout, true)
    } else if rate_limit_pattern().is_match(message) {
        verdict(ErrorCategory::RateLimit, true)
    } else {
        verdict(ErrorCategory::Unknown, true)
    }
}

pub fn is_retryable(error: &NodeError) -> bool {
    classify(error).retryable
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(e: &NodeError) -> ErrorCategory {
        classify(e).category
    }

    #[test]
    fn validation_is_not_retryable() {
        let c = classify(&NodeError::validation("title missing"));
        assert_eq!(c.category, ErrorCategory::Validation);
        assert!(!c.retryable);
    }

    #[test]
    fn json_data_error_is_validation() {
        let err = serde_json::from_str::<u32>("\"nope\"").unwrap_err();
        let c = classify(&NodeError::Json(err));
        assert_eq!(c.category, ErrorCategory::Validation);
        assert!(!c.retryable);
    }

    #[test]
    fn programming_is_not_retryable() {
        let c = classify(&NodeError::programming("called len() on null"));
        assert_eq!(c.category, ErrorCategory::Programming);
        assert!(!c.retryable);
    }

    #[test]
    fn typed_transient_errors_are_retryable() {
        assert!(is_retryable(&NodeError::network("reset")));
        assert!(is_retryable(&NodeError::rate_limited("slow down")));
        assert!(is_retryable(&NodeError::Timeout {
            node_name: "n".into(),
            timeout_ms: 10,
        }));
        assert_eq!(
            category(&NodeError::Timeout {
                node_name: "n".into(),
                timeout_ms: 10
            }),
            ErrorCategory::Timeout
        );
    }

    #[test]
    fn io_kinds_map_to_network_and_timeout() {
        let refused = NodeError::Io(std::io::Error::new(ErrorKind::ConnectionRefused, "refused"));
        assert_eq!(category(&refused), ErrorCategory::Network);

        let timed_out = NodeError::Io(std::io::Error::new(ErrorKind::TimedOut, "slow"));
        assert_eq!(category(&timed_out), ErrorCategory::Timeout);
    }

    #[test]
    fn circuit_open_and_cancellation_are_not_retryable() {
        let open = classify(&NodeError::CircuitOpen {
            node_name: "n".into(),
            recovery_in_ms: 100,
        });
        assert_eq!(open.category, ErrorCategory::CircuitOpen);
        assert!(!open.retryable);

        let cancelled = classify(&NodeError::Cancelled {
            node_name: "n".into(),
        });
        assert_eq!(cancelled.category, ErrorCategory::Cancellation);
        assert!(!cancelled.retryable);
    }

    #[test]
    fn message_patterns_for_untyped_errors() {
        assert_eq!(
            category(&NodeError::other("connect ECONNREFUSED 127.0.0.1:5432")),
            ErrorCategory::Network
        );
        assert_eq!(
            category(&NodeError::other("getaddrinfo ENOTFOUND api.example.com")),
            ErrorCategory::Network
        );
        assert_eq!(
            category(&NodeError::other("HTTP 429 Too Many Requests")),
            ErrorCategory::RateLimit
        );
        assert_eq!(
            category(&NodeError::other("request timed out")),
            ErrorCategory::Timeout
        );
    }

    #[test]
    fn unknown_errors_are_optimistically_retryable() {
        let c = classify(&NodeError::other("something odd happened"));
        assert_eq!(c.category, ErrorCategory::Unknown);
        assert!(c.retryable);
    }

    #[test]
    fn typed_cause_inside_anyhow_wins() {
        let wrapped = anyhow::Error::new(NodeError::validation("bad"))
            .context("while generating seed");
        assert_eq!(category(&NodeError::Other(wrapped)), ErrorCategory::Validation);

        let io = anyhow::Error::new(std::io::Error::new(ErrorKind::ConnectionReset, "x"));
        assert_eq!(category(&NodeError::Other(io)), ErrorCategory::Network);
    }

    #[test]
    fn exhausted_takes_last_category_and_never_retries() {
        let err = NodeError::RetryExhausted {
            node_name: "n".into(),
            attempts: 2,
            errors: vec![NodeError::other("x"), NodeError::network("reset")],
        };
        let c = classify(&err);
        assert_eq!(c.category, ErrorCategory::Network);
        assert!(!c.retryable);
    }
}
