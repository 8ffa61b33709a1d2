//! Instance Pool Model
//!
//! The discovery backend owns instance data; this crate only reads it. Pools
//! are shared behind `Arc` so the router can hand the untouched pool to the
//! picking step without copying it.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

// ============================================================================
// Service Identity
// ============================================================================

/// Identifies a routable service within a namespace
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceIdentity {
    /// Namespace the service lives in
    pub namespace: String,

    /// Service name
    pub name: String,
}

impl ServiceIdentity {
    /// Create a new identity
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Both namespace and name are present
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.namespace.is_empty() && !self.name.is_empty()
    }

    /// Neither namespace nor name is present
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.namespace.is_empty() && self.name.is_empty()
    }
}

impl std::fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// ============================================================================
// Circuit Breaker Status
// ============================================================================

/// Breaker state as tracked by the discovery backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation
    #[default]
    Closed,

    /// Tripped, calls rejected
    Open,

    /// Probing recovery with a limited number of calls
    HalfOpen,
}

/// Per-instance breaker status snapshot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    /// Current breaker state
    pub state: CircuitState,

    /// Whether a half-open instance still accepts probe calls
    #[serde(default)]
    pub allow_probe: bool,
}

impl CircuitBreakerStatus {
    /// Whether calls may be sent to the instance
    #[must_use]
    pub fn is_available(&self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => self.allow_probe,
        }
    }
}

// ============================================================================
// Instance
// ============================================================================

fn default_weight() -> u32 {
    100
}

fn default_healthy() -> bool {
    true
}

/// A single service instance known to the discovery backend
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    /// Backend assigned instance id
    pub id: String,

    /// Service this instance belongs to
    pub service: String,

    /// Namespace of the service
    #[serde(default)]
    pub namespace: String,

    /// Host or IP
    pub host: String,

    /// Port
    pub port: u16,

    /// Application protocol (e.g. "grpc")
    #[serde(default)]
    pub protocol: String,

    /// Static weight
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Health check result
    #[serde(default = "default_healthy")]
    pub healthy: bool,

    /// Manually isolated from traffic
    #[serde(default)]
    pub isolated: bool,

    /// Instance labels (env, set name, container, ...)
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// Breaker status, absent when the backend has no data yet
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerStatus>,
}

impl Instance {
    /// Create an instance with default weight, healthy and not isolated
    pub fn new(
        id: impl Into<String>,
        service: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            id: id.into(),
            service: service.into(),
            namespace: String::new(),
            host: host.into(),
            port,
            protocol: String::new(),
            weight: default_weight(),
            healthy: true,
            isolated: false,
            metadata: HashMap::new(),
            circuit_breaker: None,
        }
    }

    /// Set the protocol
    #[must_use]
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Set the weight
    #[must_use]
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Set health
    #[must_use]
    pub fn with_healthy(mut self, healthy: bool) -> Self {
        self.healthy = healthy;
        self
    }

    /// Add one metadata label
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Attach a breaker status
    #[must_use]
    pub fn with_circuit_breaker(mut self, status: CircuitBreakerStatus) -> Self {
        self.circuit_breaker = Some(status);
        self
    }

    /// `host:port`, with IPv6 hosts bracketed
    #[must_use]
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

// ============================================================================
// Instance Pool
// ============================================================================

/// Every instance the discovery backend knows for one service
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InstancePool {
    /// Service the pool belongs to
    pub service: ServiceIdentity,

    /// Backend revision of the instance list
    #[serde(default)]
    pub revision: String,

    /// Instances in backend order
    pub instances: Vec<Arc<Instance>>,
}

impl InstancePool {
    /// Build a pool from owned instances
    pub fn new(service: ServiceIdentity, instances: Vec<Instance>) -> Self {
        Self {
            service,
            revision: String::new(),
            instances: instances.into_iter().map(Arc::new).collect(),
        }
    }

    /// Number of instances
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether the pool has no instances
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

// ============================================================================
// Cluster Handle
// ============================================================================

/// Opaque handle produced by stage execution
///
/// The picking step uses it to pick within the cluster the stages settled on
/// without re-running them. The core never looks inside.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterHandle {
    /// Backend defined cluster key
    pub key: String,

    /// Number of instances in the cluster
    pub size: usize,
}

impl ClusterHandle {
    /// Create a handle
    pub fn new(key: impl Into<String>, size: usize) -> Self {
        Self {
            key: key.into(),
            size,
        }
    }
}
