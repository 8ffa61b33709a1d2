//! Discovery Collaborators
//!
//! Data model of the instances the discovery backend owns, the traits through
//! which the naming layer reaches the backend, and an in-memory backend.

pub mod backend;
pub mod instance;
pub mod memory;

pub use backend::{
    CallResult, CallResultReporter, InstancePicker, NamingBackend, PickRequest, RetStatus,
    RouteInfo, StageOutput,
};
pub use instance::{
    CircuitBreakerStatus, CircuitState, ClusterHandle, Instance, InstancePool, ServiceIdentity,
};
pub use memory::{FailurePoint, MemoryBackend};
