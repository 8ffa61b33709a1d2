//! Routing Rules
//!
//! Published routing rules come from the discovery backend. When a caller
//! supplies an explicit environment-transfer list instead, an equivalent rule
//! is synthesized locally and fed to the same rule-based stage.
//!
//! # Synthetic Rule Shape
//!
//! ```text
//! outbound route
//!   source:       ns/svc, env == <caller env>
//!   destinations: [ * env == list[0] priority 0 weight 100,
//!                   * env == list[1] priority 1 weight 100, ... ]
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::discovery::instance::ServiceIdentity;

/// Metadata key carrying the environment tag
pub const ENV_KEY: &str = "env";

/// Service name matching every service
pub const WILDCARD_SERVICE: &str = "*";

/// Weight given to every synthesized destination
pub const SYNTHETIC_WEIGHT: u32 = 100;

// ============================================================================
// Rule Model
// ============================================================================

/// How a metadata value is matched
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// Literal comparison
    #[default]
    Exact,
    /// Regular expression
    Regex,
}

/// A metadata matcher
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchString {
    /// Match mode
    #[serde(default)]
    pub match_type: MatchType,

    /// Value or pattern
    pub value: String,
}

impl MatchString {
    /// Exact matcher
    pub fn exact(value: impl Into<String>) -> Self {
        Self {
            match_type: MatchType::Exact,
            value: value.into(),
        }
    }
}

/// Source side of a route
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSource {
    /// Namespace the source must be in
    #[serde(default)]
    pub namespace: String,

    /// Source service name
    #[serde(default)]
    pub service: String,

    /// Metadata the source must carry
    #[serde(default)]
    pub metadata: HashMap<String, MatchString>,
}

/// Destination side of a route
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDestination {
    /// Namespace of the destination
    #[serde(default)]
    pub namespace: String,

    /// Destination service, `*` for any
    #[serde(default)]
    pub service: String,

    /// Metadata destination instances must carry
    #[serde(default)]
    pub metadata: HashMap<String, MatchString>,

    /// Lower value = tried first
    #[serde(default)]
    pub priority: u32,

    /// Relative weight among destinations of equal priority
    #[serde(default)]
    pub weight: u32,
}

/// A single route: who it applies to and where traffic goes
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Matching sources
    #[serde(default)]
    pub sources: Vec<RouteSource>,

    /// Ordered destinations
    #[serde(default)]
    pub destinations: Vec<RouteDestination>,
}

/// Where a rule came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOrigin {
    /// Published on the discovery backend
    #[default]
    Remote,
    /// Built in-process from an environment-transfer list
    Local,
}

/// Routing rule of one service
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    /// Owning namespace
    pub namespace: String,

    /// Owning service
    pub service: String,

    /// Where this rule came from
    #[serde(default)]
    pub origin: RuleOrigin,

    /// Routes applied to calls made by the service
    #[serde(default)]
    pub outbounds: Vec<Route>,

    /// Routes applied to calls received by the service
    #[serde(default)]
    pub inbounds: Vec<Route>,
}

impl RoutingRule {
    /// Outbound routes, empty when the rule has none
    #[must_use]
    pub fn outbounds(&self) -> &[Route] {
        &self.outbounds
    }

    /// Whether the rule has at least one outbound route
    #[must_use]
    pub fn has_outbounds(&self) -> bool {
        !self.outbounds.is_empty()
    }
}

// ============================================================================
// Synthesis
// ============================================================================

/// Build a local rule from an ordered environment-priority list
///
/// Destination `i` gets priority `i`, so earlier environments are preferred.
#[must_use]
pub fn synthesize(
    source: &ServiceIdentity,
    source_env: &str,
    dest_namespace: &str,
    env_list: &[String],
) -> RoutingRule {
    let route_source = RouteSource {
        namespace: source.namespace.clone(),
        service: source.name.clone(),
        metadata: HashMap::from([(ENV_KEY.to_string(), MatchString::exact(source_env))]),
    };

    let destinations = env_list
        .iter()
        .enumerate()
        .map(|(i, env)| RouteDestination {
            namespace: dest_namespace.to_string(),
            service: WILDCARD_SERVICE.to_string(),
            metadata: HashMap::from([(ENV_KEY.to_string(), MatchString::exact(env.as_str()))]),
            priority: u32::try_from(i).unwrap_or(u32::MAX),
            weight: SYNTHETIC_WEIGHT,
        })
        .collect();

    RoutingRule {
        namespace: source.namespace.clone(),
        service: source.name.clone(),
        origin: RuleOrigin::Local,
        outbounds: vec![Route {
            sources: vec![route_source],
            destinations,
        }],
        inbounds: Vec::new(),
    }
}

// ============================================================================
// Environment Priority
// ============================================================================

fn has_source_env(route: &Route, env: &str) -> bool {
    route
        .sources
        .iter()
        .any(|s| s.metadata.get(ENV_KEY).is_some_and(|m| m.value == env))
}

fn wildcard_destination_envs(route: &Route) -> impl Iterator<Item = &str> {
    route.destinations.iter().filter_map(|dest| {
        let value = dest.metadata.get(ENV_KEY)?;
        (dest.service == WILDCARD_SERVICE && !value.value.is_empty())
            .then_some(value.value.as_str())
    })
}

/// Environments a caller in `env` is routed into, comma joined
///
/// Informational only: attached to the first output node so the picking step
/// and debugging tools can see where traffic went. Never used to filter.
#[must_use]
pub fn extract_env_priority(routes: &[Route], env: &str) -> String {
    routes
        .iter()
        .filter(|r| has_source_env(r, env))
        .flat_map(wildcard_destination_envs)
        .collect::<Vec<_>>()
        .join(",")
}
