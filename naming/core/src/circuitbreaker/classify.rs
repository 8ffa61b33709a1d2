//! Error Classification Chain
//!
//! Decides whether a failed call counts against the circuit breaker of the
//! instance that served it.
//!
//! # Verdicts
//!
//! ```text
//! True     counted as a breaker failure
//! False    counted as a success
//! Ignore   not reported at all
//! Unknown  no opinion, ask the next link
//! ```
//!
//! # Chain Shape
//!
//! ```text
//! link_n -> link_n-1 -> ... -> link_1 -> default
//! (last registered runs first, first non-Unknown verdict wins)
//! ```
//!
//! The chain is assembled once with [`ClassifierChainBuilder`] during startup
//! and never changes afterwards. Request paths share it through `Arc`, so the
//! read path takes no lock.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Framework code: the client gave up waiting
pub const CLIENT_TIMEOUT: i32 = 101;

/// Framework code: connecting to the instance failed
pub const CONNECT_FAIL: i32 = 111;

/// Framework code: network error on an established connection
pub const NET_ERR: i32 = 141;

/// Shortest client timeout that still counts as a breaker failure
pub const DEFAULT_MIN_CLIENT_TIMEOUT: Duration = Duration::from_millis(1);

// ============================================================================
// Verdict and Errors
// ============================================================================

/// Classification outcome
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Verdict {
    /// Defer to the next link; unreported if nobody claims the error
    #[default]
    Unknown,
    /// Breaker failure
    True,
    /// Success
    False,
    /// Skip the report
    Ignore,
}

/// Where an error originated
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// RPC framework or transport
    Framework,
    /// Application business logic
    Business,
    /// Anything not produced by the framework's error type
    Other,
}

/// Error of a completed call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallError {
    /// Numeric code
    pub code: i32,
    /// Origin
    pub kind: ErrorKind,
    /// Message, informational only
    pub message: String,
}

impl CallError {
    /// Create an error
    pub fn new(kind: ErrorKind, code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            kind,
            message: message.into(),
        }
    }

    /// Framework error with `code`
    pub fn framework(code: i32, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Framework, code, message)
    }

    /// Business error with `code`
    pub fn business(code: i32, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Business, code, message)
    }

    /// Whether this is a framework client timeout
    #[must_use]
    pub fn is_client_timeout(&self) -> bool {
        self.kind == ErrorKind::Framework && self.code == CLIENT_TIMEOUT
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ErrorKind::Framework => "framework",
            ErrorKind::Business => "business",
            ErrorKind::Other => "other",
        };
        write!(f, "type:{kind}, code:{}, msg:{}", self.code, self.message)
    }
}

impl std::error::Error for CallError {}

/// A completed call as seen by the classifier
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorEvent {
    /// Call error, `None` on success
    pub error: Option<CallError>,
    /// Time the call took
    pub cost: Duration,
}

impl ErrorEvent {
    /// Successful call
    #[must_use]
    pub fn success(cost: Duration) -> Self {
        Self { error: None, cost }
    }

    /// Failed call
    #[must_use]
    pub fn failure(error: CallError, cost: Duration) -> Self {
        Self {
            error: Some(error),
            cost,
        }
    }
}

// ============================================================================
// Chain
// ============================================================================

/// One classifier link
pub type ClassifierLink = Arc<dyn Fn(&CallError, Duration) -> Verdict + Send + Sync>;

/// The innermost classifier
///
/// Only framework connect failures, network errors and client timeouts of at
/// least `min_client_timeout` are breaker failures. Everything else, including
/// every business error, is `False`.
#[must_use]
pub fn default_classify(err: &CallError, cost: Duration, min_client_timeout: Duration) -> Verdict {
    if err.kind != ErrorKind::Framework {
        return Verdict::False;
    }
    match err.code {
        CONNECT_FAIL | NET_ERR => Verdict::True,
        CLIENT_TIMEOUT if cost >= min_client_timeout => Verdict::True,
        _ => Verdict::False,
    }
}

/// Collects classifier links before traffic starts
pub struct ClassifierChainBuilder {
    links: Vec<ClassifierLink>,
    min_client_timeout: Duration,
}

impl Default for ClassifierChainBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassifierChainBuilder {
    /// Builder with no links and the default minimum client timeout
    #[must_use]
    pub fn new() -> Self {
        Self {
            links: Vec::new(),
            min_client_timeout: DEFAULT_MIN_CLIENT_TIMEOUT,
        }
    }

    /// Minimum cost for a client timeout to count as a breaker failure
    #[must_use]
    pub fn with_min_client_timeout(mut self, min: Duration) -> Self {
        self.min_client_timeout = min;
        self
    }

    /// Register a link ahead of every link registered so far
    #[must_use]
    pub fn register<F>(mut self, link: F) -> Self
    where
        F: Fn(&CallError, Duration) -> Verdict + Send + Sync + 'static,
    {
        self.links.push(Arc::new(link));
        self
    }

    /// Freeze the chain
    #[must_use]
    pub fn build(self) -> ClassifierChain {
        let mut links = self.links;
        links.reverse();
        ClassifierChain {
            links,
            min_client_timeout: self.min_client_timeout,
        }
    }
}

/// Immutable classifier chain
#[derive(Clone)]
pub struct ClassifierChain {
    /// Consultation order, most recently registered first
    links: Vec<ClassifierLink>,
    min_client_timeout: Duration,
}

impl Default for ClassifierChain {
    fn default() -> Self {
        ClassifierChainBuilder::new().build()
    }
}

impl fmt::Debug for ClassifierChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassifierChain")
            .field("links", &self.links.len())
            .field("min_client_timeout", &self.min_client_timeout)
            .finish()
    }
}

impl ClassifierChain {
    /// Number of registered links (excluding the default classifier)
    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Whether only the default classifier is present
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Minimum client timeout used by the default classifier
    #[must_use]
    pub fn min_client_timeout(&self) -> Duration {
        self.min_client_timeout
    }

    /// Classify one call error
    #[must_use]
    pub fn classify(&self, err: &CallError, cost: Duration) -> Verdict {
        self.links
            .iter()
            .map(|link| link(err, cost))
            .find(|v| *v != Verdict::Unknown)
            .unwrap_or_else(|| default_classify(err, cost, self.min_client_timeout))
    }

    /// Turn a completed call into a report decision
    #[must_use]
    pub fn shape_report(&self, event: &ErrorEvent) -> ReportShape {
        let Some(err) = &event.error else {
            return ReportShape::SUCCESS;
        };
        match self.classify(err, event.cost) {
            Verdict::True => ReportShape::FAILURE,
            Verdict::False => ReportShape::SUCCESS,
            Verdict::Unknown | Verdict::Ignore => ReportShape::SKIP,
        }
    }
}

// ============================================================================
// Report Shaping
// ============================================================================

/// Binary report decision
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReportShape {
    /// Report as success (`false` = breaker failure)
    pub success: bool,
    /// Do not report at all
    pub skip: bool,
}

impl ReportShape {
    /// Report a success
    pub const SUCCESS: Self = Self {
        success: true,
        skip: false,
    };

    /// Report a breaker failure
    pub const FAILURE: Self = Self {
        success: false,
        skip: false,
    };

    /// Report nothing
    pub const SKIP: Self = Self {
        success: false,
        skip: true,
    };
}

/// Legacy binary check, independent of the chain
///
/// `true` means the call is reported as a success. A missing error is always
/// a success; a framework client timeout shorter than `report_timeout` is
/// suppressed; every other error is a failure.
#[must_use]
pub fn suppress_timeout(
    error: Option<&CallError>,
    cost: Duration,
    report_timeout: Duration,
) -> bool {
    match error {
        None => true,
        Some(err) => err.is_client_timeout() && cost < report_timeout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MS: Duration = Duration::from_millis(1);

    fn chain() -> ClassifierChain {
        ClassifierChain::default()
    }

    #[test]
    fn test_default_framework_failures() {
        let c = chain();
        let refused = CallError::framework(CONNECT_FAIL, "refused");
        let reset = CallError::framework(NET_ERR, "reset");
        assert_eq!(c.classify(&refused, Duration::ZERO), Verdict::True);
        assert_eq!(c.classify(&reset, Duration::ZERO), Verdict::True);
        assert_eq!(c.classify(&CallError::framework(1, "other"), 10 * MS), Verdict::False);
    }

    #[test]
    fn test_client_timeout_threshold() {
        let c = chain();
        let timeout = CallError::framework(CLIENT_TIMEOUT, "timeout");
        assert_eq!(c.classify(&timeout, Duration::from_micros(999)), Verdict::False);
        assert_eq!(c.classify(&timeout, MS), Verdict::True);

        let lenient = ClassifierChainBuilder::new()
            .with_min_client_timeout(Duration::from_secs(1))
            .build();
        assert_eq!(lenient.classify(&timeout, 500 * MS), Verdict::False);
        assert_eq!(lenient.min_client_timeout(), Duration::from_secs(1));
    }

    /// Non-framework errors count as successes even when their code collides
    /// with a framework failure code. This under-reports genuine application
    /// failures and is kept as is.
    #[test]
    fn test_business_errors_reported_as_success() {
        let c = chain();
        for kind in [ErrorKind::Business, ErrorKind::Other] {
            for code in [CONNECT_FAIL, NET_ERR, CLIENT_TIMEOUT, 500] {
                let err = CallError::new(kind, code, "app failure");
                assert_eq!(c.classify(&err, Duration::from_secs(5)), Verdict::False);
                assert!(!suppress_timeout(
                    Some(&err),
                    Duration::ZERO,
                    Duration::from_secs(5)
                ));
            }
        }
        let event = ErrorEvent::failure(CallError::business(CONNECT_FAIL, "x"), MS);
        let shape = c.shape_report(&event);
        assert_eq!(shape, ReportShape::SUCCESS);
    }

    #[test]
    fn test_registered_link_wins() {
        for verdict in [Verdict::True, Verdict::False, Verdict::Ignore] {
            let c = ClassifierChainBuilder::new()
                .register(move |_, _| verdict)
                .build();
            assert_eq!(c.classify(&CallError::framework(CONNECT_FAIL, "x"), MS), verdict);
            assert_eq!(c.classify(&CallError::business(1, "x"), MS), verdict);
        }
    }

    #[test]
    fn test_unknown_falls_through_to_default() {
        let c = ClassifierChainBuilder::new()
            .register(|_, _| Verdict::Unknown)
            .build();
        assert_eq!(c.len(), 1);
        assert_eq!(c.classify(&CallError::framework(CONNECT_FAIL, "x"), MS), Verdict::True);
        assert_eq!(c.classify(&CallError::business(1, "x"), MS), Verdict::False);
    }

    #[test]
    fn test_most_recent_link_runs_first() {
        let c = ClassifierChainBuilder::new()
            .register(|_, _| Verdict::True)
            .register(|err, _| {
                if err.code == 7 {
                    Verdict::Ignore
                } else {
                    Verdict::Unknown
                }
            })
            .build();
        assert_eq!(c.classify(&CallError::business(7, "x"), MS), Verdict::Ignore);
        assert_eq!(c.classify(&CallError::business(8, "x"), MS), Verdict::True);
    }

    #[test]
    fn test_shape_report() {
        let c = ClassifierChainBuilder::new()
            .register(|err, _| match err.code {
                1 => Verdict::Ignore,
                2 => Verdict::True,
                _ => Verdict::Unknown,
            })
            .build();

        let failed = |code| ErrorEvent::failure(CallError::business(code, "x"), MS);
        assert_eq!(c.shape_report(&ErrorEvent::success(MS)), ReportShape::SUCCESS);
        assert_eq!(c.shape_report(&failed(2)), ReportShape::FAILURE);
        assert!(c.shape_report(&failed(1)).skip);
        assert_eq!(c.shape_report(&failed(3)), ReportShape::SUCCESS);
    }

    #[test]
    fn test_suppress_timeout() {
        let timeout = CallError::framework(CLIENT_TIMEOUT, "timeout");
        let threshold = 100 * MS;
        assert!(suppress_timeout(None, Duration::from_secs(9), threshold));
        assert!(suppress_timeout(Some(&timeout), 99 * MS, threshold));
        assert!(!suppress_timeout(Some(&timeout), 100 * MS, threshold));
        let refused = CallError::framework(CONNECT_FAIL, "x");
        assert!(!suppress_timeout(Some(&refused), Duration::ZERO, threshold));
    }

    #[test]
    fn test_call_error_display() {
        let err = CallError::framework(CLIENT_TIMEOUT, "deadline exceeded");
        assert_eq!(err.to_string(), "type:framework, code:101, msg:deadline exceeded");
    }
}
