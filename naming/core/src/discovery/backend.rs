//! Collaborator Seams
//!
//! The naming layer never talks to a discovery server itself. Rule lookup,
//! stage execution, instance picking and call-result reporting are reached
//! through these traits. Calls are awaited directly on the calling task;
//! nothing here retries, caches or applies a timeout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::instance::{ClusterHandle, Instance, InstancePool, ServiceIdentity};
use crate::error::BackendError;
use crate::routing::chain::StageKind;
use crate::routing::context::ServiceInfo;
use crate::routing::rule::RoutingRule;

// ============================================================================
// Stage Execution
// ============================================================================

/// Everything the stage chain needs to know about one request
#[derive(Clone, Debug, PartialEq)]
pub struct RouteInfo {
    /// Calling service
    pub source: ServiceInfo,

    /// Called service
    pub dest: ServiceInfo,

    /// Rule fed to the rule-based stage (published or synthetic)
    pub source_rule: Option<RoutingRule>,

    /// Canary label, empty when the request is not canary traffic
    pub canary: String,

    /// Stage the backend falls back to when a stage filters everything out
    pub fallback_stage: StageKind,
}

/// Survivors of a stage chain
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StageOutput {
    /// Instances that passed every stage, in backend order
    pub instances: Vec<Arc<Instance>>,

    /// Cluster the stages settled on
    pub cluster: Option<ClusterHandle>,
}

/// Discovery backend capabilities used by the router
#[async_trait]
pub trait NamingBackend: Send + Sync {
    /// Fetch the published routing rule of `source`
    ///
    /// `Ok(None)` means the backend has no rule for the service.
    async fn fetch_route_rule(
        &self,
        source: &ServiceIdentity,
    ) -> Result<Option<RoutingRule>, BackendError>;

    /// Run `stages` in order against `pool`
    async fn execute_stages(
        &self,
        stages: &[StageKind],
        route: &RouteInfo,
        pool: &InstancePool,
    ) -> Result<StageOutput, BackendError>;
}

// ============================================================================
// Instance Picking
// ============================================================================

/// Criteria handed to the picking collaborator
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PickRequest {
    /// Called service
    pub service: String,

    /// Namespace of the called service
    pub namespace: String,

    /// Calling service, when known and routing is enabled
    pub source: Option<ServiceInfo>,

    /// Destination metadata filter
    pub metadata: std::collections::HashMap<String, String>,

    /// Load balancer policy name
    pub lb_policy: String,

    /// Replica count for consistent-hash balancers
    pub replicas: u32,

    /// Canary label
    pub canary: String,

    /// Hash key for hash based balancers
    pub hash_key: Vec<u8>,
}

/// Weight/hash based picking, owned by the discovery SDK
#[async_trait]
pub trait InstancePicker: Send + Sync {
    /// Pick instances for one call; the first is used
    async fn pick_instances(
        &self,
        request: &PickRequest,
    ) -> Result<Vec<Arc<Instance>>, BackendError>;
}

// ============================================================================
// Call Result Reporting
// ============================================================================

/// Outcome recorded against an instance
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetStatus {
    /// Counted as success
    Success,
    /// Counted as a breaker failure
    Fail,
}

/// One reported call
#[derive(Clone, Debug, PartialEq)]
pub struct CallResult {
    /// Instance that served the call
    pub instance: Arc<Instance>,

    /// Success or failure
    pub status: RetStatus,

    /// Call duration
    pub cost: Duration,

    /// Code recorded with the result
    pub ret_code: i32,
}

/// Sink for call results, feeding the backend's breaker statistics
#[async_trait]
pub trait CallResultReporter: Send + Sync {
    /// Record one call result
    async fn report_call_result(&self, result: CallResult) -> Result<(), BackendError>;
}
