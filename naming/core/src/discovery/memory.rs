//! In-Memory Discovery Backend
//!
//! A fixture driven implementation of every collaborator trait. It is what the
//! `naming-route` binary runs against, and what the tests use to observe which
//! stages the router asked for.
//!
//! Stage semantics are deliberately small approximations of a real discovery
//! SDK:
//!
//! ```text
//! RuleBased     lowest-priority destination group with a matching instance
//! DstMeta       every dest metadata pair must match instance metadata
//! SetDivision   instance set name equals dest (or source) set name
//! Canary        canary-labelled instances when the request carries a label
//! NearbyBased   pass-through (no locality data)
//! FilterOnly    healthy, not isolated
//! ```
//!
//! A stage that filters everything out makes the backend restart from the
//! pool with the request's fallback stage.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;

use super::backend::{
    CallResult, CallResultReporter, InstancePicker, NamingBackend, PickRequest, RouteInfo,
    StageOutput,
};
use super::instance::{ClusterHandle, Instance, InstancePool, ServiceIdentity};
use crate::error::BackendError;
use crate::routing::chain::{StageKind, SET_ENABLE_KEY, SET_ENABLE_VALUE, SET_NAME_KEY};
use crate::routing::rule::{RouteDestination, RoutingRule};

/// Instance metadata key marking canary instances
pub const CANARY_METADATA_KEY: &str = "canary";

// ============================================================================
// Recording
// ============================================================================

/// One recorded `execute_stages` call
#[derive(Clone, Debug, PartialEq)]
pub struct StageInvocation {
    /// Stages requested, in order
    pub stages: Vec<StageKind>,

    /// Route input handed over
    pub route: RouteInfo,
}

/// Collaborator call that can be made to fail
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    /// `fetch_route_rule`
    RuleFetch,
    /// `execute_stages`
    Stages,
    /// `pick_instances`
    Pick,
    /// `report_call_result`
    Report,
}

/// Fixture file layout
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Fixture {
    /// Published rules
    #[serde(default)]
    pub rules: Vec<RoutingRule>,

    /// Known pools, used by the picker
    #[serde(default)]
    pub pools: Vec<InstancePool>,
}

// ============================================================================
// Memory Backend
// ============================================================================

/// Discovery backend holding everything in process memory
#[derive(Default)]
pub struct MemoryBackend {
    rules: RwLock<HashMap<ServiceIdentity, RoutingRule>>,
    pools: RwLock<HashMap<ServiceIdentity, Arc<InstancePool>>>,
    failures: RwLock<HashMap<FailurePoint, BackendError>>,
    invocations: Mutex<Vec<StageInvocation>>,
    reported: Mutex<Vec<CallResult>>,
}

impl MemoryBackend {
    /// Empty backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend preloaded from a fixture
    #[must_use]
    pub fn from_fixture(fixture: Fixture) -> Self {
        let backend = Self::new();
        for rule in fixture.rules {
            backend.insert_rule(rule);
        }
        for pool in fixture.pools {
            backend.insert_pool(Arc::new(pool));
        }
        backend
    }

    /// Parse a JSON fixture
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Malformed`] when the JSON does not describe a
    /// fixture.
    pub fn from_json(json: &str) -> Result<Self, BackendError> {
        let fixture: Fixture =
            serde_json::from_str(json).map_err(|e| BackendError::Malformed(e.to_string()))?;
        Ok(Self::from_fixture(fixture))
    }

    /// Publish a routing rule for its owning service
    pub fn insert_rule(&self, rule: RoutingRule) {
        let id = ServiceIdentity::new(rule.namespace.as_str(), rule.service.as_str());
        self.rules.write().insert(id, rule);
    }

    /// Register a pool for picking
    pub fn insert_pool(&self, pool: Arc<InstancePool>) {
        self.pools.write().insert(pool.service.clone(), pool);
    }

    /// Pool registered for `service`
    #[must_use]
    pub fn pool(&self, service: &ServiceIdentity) -> Option<Arc<InstancePool>> {
        self.pools.read().get(service).cloned()
    }

    /// Make the next and all later calls at `point` fail with `error`
    pub fn fail_at(&self, point: FailurePoint, error: BackendError) {
        self.failures.write().insert(point, error);
    }

    /// Stop failing at `point`
    pub fn clear_failure(&self, point: FailurePoint) {
        self.failures.write().remove(&point);
    }

    /// Every `execute_stages` call seen so far
    #[must_use]
    pub fn invocations(&self) -> Vec<StageInvocation> {
        self.invocations.lock().clone()
    }

    /// Every reported call result so far
    #[must_use]
    pub fn reported(&self) -> Vec<CallResult> {
        self.reported.lock().clone()
    }

    fn check(&self, point: FailurePoint) -> Result<(), BackendError> {
        match self.failures.read().get(&point) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Stage Approximations
// ============================================================================

fn usable(instance: &Instance) -> bool {
    instance.healthy && !instance.isolated
}

fn matches_all(instance: &Instance, wanted: &HashMap<String, String>) -> bool {
    wanted
        .iter()
        .all(|(k, v)| instance.metadata.get(k).is_some_and(|have| have == v))
}

fn matches_destination(instance: &Instance, dest: &RouteDestination) -> bool {
    dest.metadata
        .iter()
        .all(|(k, m)| instance.metadata.get(k).is_some_and(|have| *have == m.value))
}

fn rule_based(instances: Vec<Arc<Instance>>, route: &RouteInfo) -> Vec<Arc<Instance>> {
    let Some(rule) = &route.source_rule else {
        return instances;
    };
    let mut destinations: Vec<&RouteDestination> = rule
        .outbounds()
        .iter()
        .flat_map(|r| r.destinations.iter())
        .collect();
    if destinations.is_empty() {
        return instances;
    }
    destinations.sort_by_key(|d| d.priority);

    for dest in destinations {
        let group: Vec<_> = instances
            .iter()
            .filter(|i| matches_destination(i, dest))
            .cloned()
            .collect();
        if !group.is_empty() {
            return group;
        }
    }
    Vec::new()
}

fn set_name(metadata: &HashMap<String, String>) -> Option<&str> {
    (metadata.get(SET_ENABLE_KEY).map(String::as_str) == Some(SET_ENABLE_VALUE))
        .then(|| metadata.get(SET_NAME_KEY).map(String::as_str))
        .flatten()
}

fn set_division(instances: Vec<Arc<Instance>>, route: &RouteInfo) -> Vec<Arc<Instance>> {
    let Some(wanted) = set_name(&route.dest.metadata).or_else(|| set_name(&route.source.metadata))
    else {
        return instances;
    };
    instances
        .into_iter()
        .filter(|i| set_name(&i.metadata) == Some(wanted))
        .collect()
}

fn canary(instances: Vec<Arc<Instance>>, route: &RouteInfo) -> Vec<Arc<Instance>> {
    let labelled = |i: &Arc<Instance>| {
        i.metadata
            .get(CANARY_METADATA_KEY)
            .is_some_and(|c| !c.is_empty())
    };
    if route.canary.is_empty() {
        return instances.into_iter().filter(|i| !labelled(i)).collect();
    }
    instances
        .into_iter()
        .filter(|i| i.metadata.get(CANARY_METADATA_KEY) == Some(&route.canary))
        .collect()
}

fn apply_stage(
    stage: StageKind,
    instances: Vec<Arc<Instance>>,
    route: &RouteInfo,
) -> Vec<Arc<Instance>> {
    match stage {
        StageKind::RuleBased => rule_based(instances, route),
        StageKind::DstMeta => instances
            .into_iter()
            .filter(|i| matches_all(i, &route.dest.metadata))
            .collect(),
        StageKind::SetDivision => set_division(instances, route),
        StageKind::Canary => canary(instances, route),
        StageKind::NearbyBased => instances,
        StageKind::FilterOnly => instances.into_iter().filter(|i| usable(i)).collect(),
    }
}

fn cluster_key(stages: &[StageKind]) -> String {
    stages
        .iter()
        .map(StageKind::as_str)
        .collect::<Vec<_>>()
        .join("|")
}

#[async_trait]
impl NamingBackend for MemoryBackend {
    async fn fetch_route_rule(
        &self,
        source: &ServiceIdentity,
    ) -> Result<Option<RoutingRule>, BackendError> {
        self.check(FailurePoint::RuleFetch)?;
        Ok(self.rules.read().get(source).cloned())
    }

    async fn execute_stages(
        &self,
        stages: &[StageKind],
        route: &RouteInfo,
        pool: &InstancePool,
    ) -> Result<StageOutput, BackendError> {
        self.invocations.lock().push(StageInvocation {
            stages: stages.to_vec(),
            route: route.clone(),
        });
        self.check(FailurePoint::Stages)?;

        let usable_pool: Vec<Arc<Instance>> =
            pool.instances.iter().filter(|i| usable(i)).cloned().collect();

        let mut survivors = usable_pool.clone();
        let mut applied = Vec::with_capacity(stages.len());
        for stage in stages {
            survivors = apply_stage(*stage, survivors, route);
            applied.push(*stage);
            if survivors.is_empty() {
                tracing::debug!(
                    stage = %stage,
                    fallback = %route.fallback_stage,
                    "stage emptied the pool"
                );
                survivors = apply_stage(route.fallback_stage, usable_pool, route);
                applied = vec![route.fallback_stage];
                break;
            }
        }

        let cluster = ClusterHandle::new(cluster_key(&applied), survivors.len());
        Ok(StageOutput {
            instances: survivors,
            cluster: Some(cluster),
        })
    }
}

#[async_trait]
impl InstancePicker for MemoryBackend {
    async fn pick_instances(
        &self,
        request: &PickRequest,
    ) -> Result<Vec<Arc<Instance>>, BackendError> {
        self.check(FailurePoint::Pick)?;
        let id = ServiceIdentity::new(request.namespace.as_str(), request.service.as_str());
        let Some(pool) = self.pool(&id) else {
            return Ok(Vec::new());
        };

        let mut picked: Vec<Arc<Instance>> = pool
            .instances
            .iter()
            .filter(|i| usable(i) && matches_all(i, &request.metadata))
            .cloned()
            .collect();
        // Heaviest first stands in for weighted random.
        picked.sort_by_key(|i| std::cmp::Reverse(i.weight));
        Ok(picked)
    }
}

#[async_trait]
impl CallResultReporter for MemoryBackend {
    async fn report_call_result(&self, result: CallResult) -> Result<(), BackendError> {
        self.check(FailurePoint::Report)?;
        self.reported.lock().push(result);
        Ok(())
    }
}
