//! Route Filtering
//!
//! Computes the ordered subset of policy-eligible instances for one request.
//!
//! # Architecture
//!
//! ```text
//! RouteOptions --> RouteContext --> plan_route --> NamingBackend --> project
//!   (context)        (context)       (chain)      execute_stages     (node)
//!                                      ^
//!                                      | synthetic or published RoutingRule
//!                                    (rule)
//! ```
//!
//! The composer and the path selection are pure; the only I/O is the rule
//! fetch and stage execution, both owned by the backend.

pub mod chain;
pub mod context;
pub mod node;
pub mod router;
pub mod rule;

pub use chain::{plan_route, select_path, Chain, RoutePath, RoutePlan, RouterConfig, StageKind};
pub use context::{CallMetadata, ContextPolicy, RouteContext, RouteOptions, ServiceInfo};
pub use node::{project, Node, NodeAttachment, RouteResult};
pub use router::ServiceRouter;
pub use rule::{extract_env_priority, synthesize, RoutingRule};
