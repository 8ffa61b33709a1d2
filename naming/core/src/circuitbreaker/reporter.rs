//! Call Result Reporting
//!
//! Feeds completed calls back into the discovery backend's breaker statistics,
//! either through the classification chain ([`CircuitBreaker::report`]) or
//! through the older timeout-suppression check
//! ([`report_with_timeout_suppression`]).

use std::sync::Arc;
use std::time::Duration;

use super::classify::{suppress_timeout, CallError, ClassifierChain, ErrorEvent};
use crate::discovery::backend::{CallResult, CallResultReporter, RetStatus};
use crate::discovery::instance::Instance;
use crate::error::{NamingError, Result};
use crate::routing::node::Node;

/// Code recorded with every breaker failure
pub const FAILURE_RET_CODE: i32 = 10000;

fn node_instance(node: &Node) -> Result<Arc<Instance>> {
    node.instance()
        .cloned()
        .ok_or(NamingError::InvalidInstanceMetadata("invalid instance"))
}

fn call_result(instance: Arc<Instance>, success: bool, cost: Duration) -> CallResult {
    let (status, ret_code) = if success {
        (RetStatus::Success, 0)
    } else {
        (RetStatus::Fail, FAILURE_RET_CODE)
    };
    CallResult {
        instance,
        status,
        cost,
        ret_code,
    }
}

// ============================================================================
// Circuit Breaker
// ============================================================================

/// Breaker front end over a result reporter
pub struct CircuitBreaker {
    reporter: Arc<dyn CallResultReporter>,
    classifier: Arc<ClassifierChain>,
}

impl CircuitBreaker {
    /// Create a breaker using `classifier` for every report
    pub fn new(reporter: Arc<dyn CallResultReporter>, classifier: Arc<ClassifierChain>) -> Self {
        Self {
            reporter,
            classifier,
        }
    }

    /// Classifier in use
    #[must_use]
    pub fn classifier(&self) -> &Arc<ClassifierChain> {
        &self.classifier
    }

    /// Whether `node` may receive calls
    ///
    /// Nodes without an instance attachment are never available; instances
    /// the backend has no breaker data for always are.
    #[must_use]
    pub fn available(&self, node: &Node) -> bool {
        let Some(instance) = node.instance() else {
            return false;
        };
        match &instance.circuit_breaker {
            Some(status) => status.is_available(),
            None => true,
        }
    }

    /// Report one completed call
    ///
    /// Calls the chain declines to classify (`Ignore`/`Unknown`) are dropped
    /// before the node is inspected.
    ///
    /// # Errors
    ///
    /// - [`NamingError::InvalidInstanceMetadata`] when the node carries no
    ///   instance
    /// - [`NamingError::Report`] when the reporter fails
    pub async fn report(
        &self,
        node: &Node,
        cost: Duration,
        error: Option<&CallError>,
    ) -> Result<()> {
        let event = ErrorEvent {
            error: error.cloned(),
            cost,
        };
        let shape = self.classifier.shape_report(&event);
        if shape.skip {
            tracing::trace!(error = ?error, "call result not reported");
            return Ok(());
        }

        let instance = node_instance(node)?;
        tracing::trace!(
            instance = %instance.id,
            success = shape.success,
            cost_ms = cost.as_millis(),
            "reporting call result"
        );
        self.reporter
            .report_call_result(call_result(instance, shape.success, cost))
            .await
            .map_err(NamingError::Report)
    }
}

/// Report one call using the binary timeout-suppression check
///
/// Framework client timeouts shorter than `report_timeout` are reported as
/// successes; everything else that failed is a breaker failure.
///
/// # Errors
///
/// Same as [`CircuitBreaker::report`].
pub async fn report_with_timeout_suppression(
    reporter: &dyn CallResultReporter,
    node: &Node,
    report_timeout: Duration,
    cost: Duration,
    error: Option<&CallError>,
) -> Result<()> {
    let success = suppress_timeout(error, cost, report_timeout);
    let instance = node_instance(node)?;
    reporter
        .report_call_result(call_result(instance, success, cost))
        .await
        .map_err(NamingError::Report)
}
