//! Circuit Breaker Reporting
//!
//! Classification of call errors and the reporting built on top of it. The
//! breaker state machine itself lives in the discovery backend; this module
//! only decides what gets reported.

pub mod classify;
pub mod reporter;

pub use classify::{
    default_classify, suppress_timeout, CallError, ClassifierChain, ClassifierChainBuilder,
    ClassifierLink, ErrorEvent, ErrorKind, ReportShape, Verdict, DEFAULT_MIN_CLIENT_TIMEOUT,
};
pub use reporter::{report_with_timeout_suppression, CircuitBreaker, FAILURE_RET_CODE};
