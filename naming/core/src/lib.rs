//! Naming Core - Client-Side Naming for RPC Calls
//!
//! Two decision engines sit between an RPC framework and its discovery
//! backend:
//!
//! - the **error classification chain**, deciding which failed calls count
//!   against an instance's circuit breaker, and
//! - the **route filtering chain**, deciding which instances of a service a
//!   request may be sent to.
//!
//! Everything that needs a network (rule lookup, stage execution, picking,
//! breaker statistics) is reached through the traits in [`discovery`].
//!
//! # Architecture
//!
//! ```text
//!            request options                         call outcome
//!                  |                                (error, cost)
//!                  v                                      |
//!   +-----------------------------+          +------------v------------+
//!   |        ServiceRouter        |          |     CircuitBreaker      |
//!   |  RouteContext -> plan_route |          |  ClassifierChain        |
//!   |  -> execute -> project      |          |  -> ReportShape         |
//!   +--------------+--------------+          +------------+------------+
//!                  |                                      |
//!                  v                                      v
//!   +------------------------------------------------------------------+
//!   |          NamingBackend / InstancePicker / CallResultReporter      |
//!   +------------------------------------------------------------------+
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use naming_core::{load_config, MemoryBackend, Naming, Node, RouteOptions};
//!
//! let backend = Arc::new(MemoryBackend::new());
//! let naming = Naming::builder()
//!     .with_config(load_config()?)
//!     .with_backend(backend)
//!     .build()?;
//!
//! let result = naming
//!     .route("callee", &[Node::from_pool(pool)], &RouteOptions::new("Production"))
//!     .await?;
//! ```
//!
//! # Module Overview
//!
//! - [`circuitbreaker`]: Error classification and call-result reporting
//! - [`routing`]: Route context, synthetic rules, chain composition, projection
//! - [`discovery`]: Instance model, collaborator traits, in-memory backend
//! - [`selector`]: One-shot node selection through the picker
//! - [`naming`]: Startup wiring
//! - [`config`]: TOML / environment configuration
//! - [`error`]: Error types

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod circuitbreaker;
pub mod config;
pub mod discovery;
pub mod error;
pub mod naming;
pub mod routing;
pub mod selector;

// Error exports
pub use error::{BackendError, NamingError, Result};

// Classification exports
pub use circuitbreaker::{
    report_with_timeout_suppression, suppress_timeout, CallError, CircuitBreaker,
    ClassifierChain, ClassifierChainBuilder, ErrorEvent, ErrorKind, ReportShape, Verdict,
};

// Routing exports
pub use routing::{
    CallMetadata, Node, NodeAttachment, RouteOptions, RoutePath, RouteResult, RouterConfig,
    ServiceRouter, StageKind,
};

// Discovery exports
pub use discovery::{
    CallResultReporter, Instance, InstancePicker, InstancePool, MemoryBackend, NamingBackend,
    ServiceIdentity,
};

// Facade exports
pub use naming::{Naming, NamingBuilder};
pub use selector::{Selector, SelectorConfig};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, NamingConfig, NamingToml,
};
