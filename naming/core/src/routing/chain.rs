//! Chain Composition
//!
//! Decides which filter stages run for a request and in what order. Stage
//! matching itself belongs to the discovery backend; this module only picks
//! membership and order, and it does so before the first stage executes.
//!
//! # Path Selection
//!
//! ```text
//!                   source incomplete / routing off?
//!                      |yes                  |no
//!                      v                     v
//!                  NoRouter          transfer list given?
//!                                      |yes          |no
//!                                      v             v
//!                                EnvTransfer    fetch rule -> outbounds?
//!                                                  |yes          |no
//!                                                  v             v
//!                                              RuleBased   RuleBasedDegraded
//! ```
//!
//! Every path ends with `[SetDivision] -> NearbyBased -> [Canary]`.

use std::collections::HashMap;

use crate::discovery::backend::RouteInfo;
use crate::routing::context::{RouteContext, ServiceInfo, ENV_SELECTOR_KEY};
use crate::routing::rule::{self, RoutingRule, ENV_KEY};

/// Metadata flag enabling set division on a service
pub const SET_ENABLE_KEY: &str = "internal-enable-set";

/// Metadata key carrying the set name
pub const SET_NAME_KEY: &str = "internal-set-name";

/// Value of [`SET_ENABLE_KEY`] when enabled
pub const SET_ENABLE_VALUE: &str = "Y";

/// Routing switches fixed at startup
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouterConfig {
    /// Service routing enabled
    pub enable: bool,

    /// Append the canary stage to every chain
    pub enable_canary: bool,

    /// Emit one node per survivor instead of a single placeholder
    pub need_return_all_nodes: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            enable: true,
            enable_canary: false,
            need_return_all_nodes: false,
        }
    }
}

// ============================================================================
// Stages and Paths
// ============================================================================

/// Filter stages provided by the discovery backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Match against a routing rule
    RuleBased,
    /// Prefer instances close to the caller
    NearbyBased,
    /// Restrict to a grouping set
    SetDivision,
    /// Drop unhealthy instances only
    FilterOnly,
    /// Match destination metadata
    DstMeta,
    /// Route canary traffic to canary instances
    Canary,
}

impl StageKind {
    /// Stable name used in logs and cluster keys
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RuleBased => "ruleBasedRouter",
            Self::NearbyBased => "nearbyBasedRouter",
            Self::SetDivision => "setDivisionRouter",
            Self::FilterOnly => "filterOnlyRouter",
            Self::DstMeta => "dstMetaRouter",
            Self::Canary => "canaryRouter",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request path through the composer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RoutePath {
    /// Service routing skipped, locality and metadata only
    NoRouter,
    /// Synthetic rule from an environment-transfer list
    EnvTransfer,
    /// Published rule with outbound routes
    RuleBased,
    /// Published rule absent or without outbound routes
    RuleBasedDegraded,
}

impl RoutePath {
    /// Whether an empty survivor set is reported as an error on this path
    #[must_use]
    pub fn rejects_empty_result(&self) -> bool {
        !matches!(self, Self::EnvTransfer)
    }
}

impl std::fmt::Display for RoutePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoRouter => write!(f, "no-router"),
            Self::EnvTransfer => write!(f, "env-transfer"),
            Self::RuleBased => write!(f, "rule-based"),
            Self::RuleBasedDegraded => write!(f, "rule-based-degraded"),
        }
    }
}

/// Ordered stage list for one request
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Chain {
    stages: Vec<StageKind>,
}

impl Chain {
    /// Empty chain
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage
    pub fn push(&mut self, stage: StageKind) {
        self.stages.push(stage);
    }

    /// Stages in execution order
    #[must_use]
    pub fn stages(&self) -> &[StageKind] {
        &self.stages
    }

    /// Whether `stage` is part of the chain
    #[must_use]
    pub fn contains(&self, stage: StageKind) -> bool {
        self.stages.contains(&stage)
    }

    /// Number of stages
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the chain has no stages
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

// ============================================================================
// Path Selection
// ============================================================================

/// Pick the request path
///
/// `has_outbound_routes` only matters once neither the no-router nor the
/// env-transfer path applies; callers that have not fetched a rule yet can use
/// [`needs_rule`] first.
#[must_use]
pub fn select_path(ctx: &RouteContext, has_outbound_routes: bool) -> RoutePath {
    if ctx.routable_source().is_none()
        || ctx.service_router_disabled_by_caller
        || !ctx.service_router_enabled
    {
        RoutePath::NoRouter
    } else if !ctx.env_transfer_list.is_empty() {
        RoutePath::EnvTransfer
    } else if has_outbound_routes {
        RoutePath::RuleBased
    } else {
        RoutePath::RuleBasedDegraded
    }
}

/// Path for `ctx` under the router's own switches
///
/// A router configured with routing off always takes the no-router path,
/// whatever policy the context was built with.
fn configured_path(
    ctx: &RouteContext,
    has_outbound_routes: bool,
    config: &RouterConfig,
) -> RoutePath {
    if config.enable {
        select_path(ctx, has_outbound_routes)
    } else {
        RoutePath::NoRouter
    }
}

/// Whether the published rule must be fetched before planning
#[must_use]
pub fn needs_rule(ctx: &RouteContext, config: &RouterConfig) -> bool {
    configured_path(ctx, true, config) == RoutePath::RuleBased
}

// ============================================================================
// Planning
// ============================================================================

/// Fully composed request, ready to execute
#[derive(Clone, Debug, PartialEq)]
pub struct RoutePlan {
    /// Selected path
    pub path: RoutePath,

    /// Stages to run
    pub chain: Chain,

    /// Input handed to the stage executor
    pub route: RouteInfo,

    /// Environment priority attached to the first output node
    pub env_priority: String,

    /// Caller environment, used in the empty-result error
    pub source_env: String,

    /// Explicit destination environment, used in the empty-result error
    pub dest_env: String,

    /// Environment selector key, used in the empty-result error
    pub env_key: String,
}

fn mark_set(info: &mut ServiceInfo, set_name: &str) {
    info.metadata
        .insert(SET_ENABLE_KEY.to_string(), SET_ENABLE_VALUE.to_string());
    info.metadata
        .insert(SET_NAME_KEY.to_string(), set_name.to_string());
}

/// Insert `SetDivision` when either side names a grouping set
fn apply_set_division(
    chain: &mut Chain,
    source: &mut ServiceInfo,
    dest: &mut ServiceInfo,
    source_set: &str,
    dest_set: &str,
) {
    if source_set.is_empty() && dest_set.is_empty() {
        return;
    }
    if !source_set.is_empty() {
        mark_set(source, source_set);
    }
    if !dest_set.is_empty() {
        mark_set(dest, dest_set);
    }
    chain.push(StageKind::SetDivision);
}

fn rule_source_metadata(ctx: &RouteContext) -> HashMap<String, String> {
    let mut metadata: HashMap<String, String> = ctx
        .source_metadata
        .iter()
        .filter(|(k, v)| !k.is_empty() && !v.is_empty())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if ctx.env_key.is_empty() {
        metadata.insert(ENV_KEY.to_string(), ctx.source_env.clone());
    } else {
        metadata.insert(ENV_SELECTOR_KEY.to_string(), ctx.env_key.clone());
    }
    metadata
}

/// Compose the stage chain and stage input for a request
///
/// `fetched` is the published rule of the source service, ignored on paths
/// that do not consult it. Pure: no I/O, no logging side effects that matter.
#[must_use]
pub fn plan_route(
    ctx: RouteContext,
    fetched: Option<RoutingRule>,
    config: &RouterConfig,
) -> RoutePlan {
    let has_outbounds = fetched.as_ref().is_some_and(RoutingRule::has_outbounds);
    let path = configured_path(&ctx, has_outbounds, config);

    let mut source = ServiceInfo::new(ctx.source_identity.clone());
    let mut dest = ctx.dest.clone();
    let mut chain = Chain::new();
    let mut env_priority = String::new();
    let mut source_rule = None;

    match path {
        RoutePath::NoRouter => {
            if !ctx.dest_env.is_empty() {
                chain.push(StageKind::DstMeta);
                dest.metadata = HashMap::from([(ENV_KEY.to_string(), ctx.dest_env.clone())]);
            }
        }
        RoutePath::EnvTransfer => {
            source.metadata = HashMap::from([(ENV_KEY.to_string(), ctx.source_env.clone())]);
            source_rule = Some(rule::synthesize(
                &ctx.source_identity,
                &ctx.source_env,
                &ctx.dest.identity.namespace,
                &ctx.env_transfer_list,
            ));
            env_priority = ctx.env_transfer_joined();
            chain.push(StageKind::RuleBased);
        }
        RoutePath::RuleBased => {
            source.metadata = rule_source_metadata(&ctx);
            if let Some(rule) = &fetched {
                env_priority = rule::extract_env_priority(rule.outbounds(), &ctx.source_env);
            }
            source_rule = fetched;
            chain.push(StageKind::RuleBased);
        }
        RoutePath::RuleBasedDegraded => {
            source_rule = fetched;
        }
    }

    apply_set_division(
        &mut chain,
        &mut source,
        &mut dest,
        &ctx.source_set_name,
        &ctx.dest_set_name,
    );
    chain.push(StageKind::NearbyBased);
    if config.enable_canary {
        chain.push(StageKind::Canary);
    }

    RoutePlan {
        path,
        chain,
        route: RouteInfo {
            source,
            dest,
            source_rule,
            canary: ctx.canary_tag,
            fallback_stage: StageKind::FilterOnly,
        },
        env_priority,
        source_env: ctx.source_env,
        dest_env: ctx.dest_env,
        env_key: ctx.env_key,
    }
}
