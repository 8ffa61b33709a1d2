//! Service Router
//!
//! Entry point of the route filtering chain. Takes the pool delivered by
//! discovery, builds the request context, plans the chain, runs it through the
//! backend and projects the survivors.
//!
//! # Usage
//!
//! ```ignore
//! let router = ServiceRouter::new(backend, RouterConfig::default());
//! let result = router.filter("callee", &nodes, &options).await?;
//! ```

use std::sync::Arc;

use super::chain::{self, RoutePath, RoutePlan, RouterConfig};
use super::context::{ContextPolicy, RouteContext, RouteOptions};
use super::node::{self, Node, RouteResult};
use super::rule::RoutingRule;
use crate::discovery::backend::NamingBackend;
use crate::discovery::instance::InstancePool;
use crate::error::{NamingError, Result};

/// Routes requests against pools using a discovery backend
pub struct ServiceRouter {
    /// Rule lookup and stage execution
    backend: Arc<dyn NamingBackend>,
    /// Routing switches
    config: RouterConfig,
}

impl ServiceRouter {
    /// Create a router
    pub fn new(backend: Arc<dyn NamingBackend>, config: RouterConfig) -> Self {
        Self { backend, config }
    }

    /// Routing switches in use
    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Inbound `selector-meta-` propagation is a selector concern; the
    /// router rebuilds source metadata per path and never propagates it.
    fn policy(&self) -> ContextPolicy {
        ContextPolicy {
            service_router_enabled: self.config.enable,
            enable_trans_meta: false,
        }
    }

    /// Filter the pool carried by `nodes[0]` for a call to `service_name`
    ///
    /// # Errors
    ///
    /// - [`NamingError::NoNodeAvailable`] for an empty node list
    /// - [`NamingError::InvalidInstanceMetadata`] when the first node carries
    ///   no instance pool
    /// - any error of [`ServiceRouter::filter_pool`]
    pub async fn filter(
        &self,
        service_name: &str,
        nodes: &[Node],
        opts: &RouteOptions,
    ) -> Result<RouteResult> {
        let first = nodes.first().ok_or(NamingError::NoNodeAvailable)?;
        let pool = first
            .pool()
            .cloned()
            .ok_or(NamingError::InvalidInstanceMetadata("node carries no instance pool"))?;
        let ctx = RouteContext::build(service_name, opts, self.policy())?;
        self.filter_pool(ctx, pool).await
    }

    /// Run the full chain for one request context
    ///
    /// # Errors
    ///
    /// - [`NamingError::RuleFetch`] when the published rule cannot be fetched
    /// - [`NamingError::FilterExecution`] when the stage chain fails
    /// - [`NamingError::NoInstancesAvailable`] when nothing survives on a path
    ///   that rejects empty results
    pub async fn filter_pool(
        &self,
        ctx: RouteContext,
        pool: Arc<InstancePool>,
    ) -> Result<RouteResult> {
        let fetched = if chain::needs_rule(&ctx, &self.config) {
            self.fetch_rule(&ctx).await?
        } else {
            None
        };

        let service_name = ctx.dest.identity.name.clone();
        let plan = chain::plan_route(ctx, fetched, &self.config);

        tracing::debug!(
            service = %service_name,
            path = %plan.path,
            chain = ?plan.chain.stages(),
            env_priority = %plan.env_priority,
            "composed filter chain"
        );

        let output = self
            .backend
            .execute_stages(plan.chain.stages(), &plan.route, &pool)
            .await
            .map_err(|source| {
                tracing::warn!(path = %plan.path, error = %source, "filter stages failed");
                NamingError::FilterExecution {
                    path: plan.path,
                    source,
                }
            })?;

        if output.instances.is_empty() {
            if let Some(err) = empty_result_error(&plan) {
                tracing::debug!(path = %plan.path, error = %err, "no instance survived");
                return Err(err);
            }
        }

        Ok(node::project(
            &service_name,
            &output.instances,
            plan.env_priority,
            output.cluster,
            pool,
            self.config.need_return_all_nodes,
        ))
    }

    async fn fetch_rule(&self, ctx: &RouteContext) -> Result<Option<RoutingRule>> {
        let source = &ctx.source_identity;
        self.backend.fetch_route_rule(source).await.map_err(|err| {
            tracing::warn!(source = %source, error = %err, "route rule fetch failed");
            NamingError::RuleFetch {
                namespace: source.namespace.clone(),
                service: source.name.clone(),
                source: err,
            }
        })
    }
}

fn empty_result_error(plan: &RoutePlan) -> Option<NamingError> {
    match plan.path {
        RoutePath::EnvTransfer => None,
        RoutePath::NoRouter => Some(NamingError::NoInstancesAvailable {
            env: plan.dest_env.clone(),
            key: String::new(),
        }),
        RoutePath::RuleBased | RoutePath::RuleBasedDegraded => {
            Some(NamingError::NoInstancesAvailable {
                env: plan.source_env.clone(),
                key: plan.env_key.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::instance::{Instance, ServiceIdentity};
    use crate::discovery::memory::{FailurePoint, MemoryBackend};
    use crate::error::BackendError;
    use crate::routing::chain::StageKind;
    use crate::routing::context::CallMetadata;
    use crate::routing::node::NodeAttachment;
    use crate::routing::rule::{self, RuleOrigin};
    use pretty_assertions::assert_eq;

    fn pool(envs: &[&str]) -> Arc<InstancePool> {
        let instances = envs
            .iter()
            .enumerate()
            .map(|(i, env)| {
                let port = 8000 + u16::try_from(i).unwrap();
                Instance::new(format!("i{i}"), "callee", "10.0.0.1", port)
                    .with_metadata("env", *env)
            })
            .collect();
        Arc::new(InstancePool::new(ServiceIdentity::new("Production", "callee"), instances))
    }

    fn router(backend: &Arc<MemoryBackend>, config: RouterConfig) -> ServiceRouter {
        ServiceRouter::new(backend.clone(), config)
    }

    #[tokio::test]
    async fn test_empty_node_list() {
        let backend = Arc::new(MemoryBackend::new());
        let err = router(&backend, RouterConfig::default())
            .filter("callee", &[], &RouteOptions::new("Production"))
            .await
            .unwrap_err();
        assert!(matches!(err, NamingError::NoNodeAvailable));
    }

    #[tokio::test]
    async fn test_node_without_pool() {
        let backend = Arc::new(MemoryBackend::new());
        let err = router(&backend, RouterConfig::default())
            .filter("callee", &[Node::placeholder("callee")], &RouteOptions::new("Production"))
            .await
            .unwrap_err();
        assert!(matches!(err, NamingError::InvalidInstanceMetadata(_)));
        assert!(backend.invocations().is_empty());
    }

    #[tokio::test]
    async fn test_no_router_skips_rule_fetch() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_at(FailurePoint::RuleFetch, BackendError::Unavailable("down".into()));

        let nodes = vec![Node::from_pool(pool(&["a", "b"]))];
        let result = router(&backend, RouterConfig::default())
            .filter("callee", &nodes, &RouteOptions::new("Production"))
            .await
            .unwrap();

        assert_eq!(result.nodes().len(), 1);
        let calls = backend.invocations();
        assert_eq!(calls[0].stages, vec![StageKind::NearbyBased]);
    }

    #[tokio::test]
    async fn test_rule_fetch_failure_surfaces() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_at(FailurePoint::RuleFetch, BackendError::Unavailable("down".into()));

        let nodes = vec![Node::from_pool(pool(&["a"]))];
        let opts = RouteOptions::new("Production").with_source("Production", "caller");
        let err = router(&backend, RouterConfig::default())
            .filter("callee", &nodes, &opts)
            .await
            .unwrap_err();

        match err {
            NamingError::RuleFetch { namespace, service, .. } => {
                assert_eq!(namespace, "Production");
                assert_eq!(service, "caller");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(backend.invocations().is_empty());
    }

    #[tokio::test]
    async fn test_stage_failure_names_path() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_at(FailurePoint::Stages, BackendError::Unavailable("down".into()));

        let nodes = vec![Node::from_pool(pool(&["a"]))];
        let opts = RouteOptions::new("Production")
            .with_source("Production", "caller")
            .with_env_transfer("a");
        let err = router(&backend, RouterConfig::default())
            .filter("callee", &nodes, &opts)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            NamingError::FilterExecution { path: RoutePath::EnvTransfer, .. }
        ));
    }

    #[tokio::test]
    async fn test_env_transfer_routes_by_priority() {
        let backend = Arc::new(MemoryBackend::new());
        let config = RouterConfig {
            need_return_all_nodes: true,
            ..RouterConfig::default()
        };
        let nodes = vec![Node::from_pool(pool(&["formal", "test", "test"]))];
        let opts = RouteOptions::new("Production")
            .with_source("Production", "caller")
            .with_source_env("dev")
            .with_env_transfer("test,formal");

        let result = router(&backend, config).filter("callee", &nodes, &opts).await.unwrap();
        let out = result.nodes();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].env_key, "test,formal");

        let call = &backend.invocations()[0];
        assert_eq!(call.stages, vec![StageKind::RuleBased, StageKind::NearbyBased]);
        let rule = call.route.source_rule.as_ref().unwrap();
        assert_eq!(rule.origin, RuleOrigin::Local);
    }

    #[tokio::test]
    async fn test_env_transfer_empty_is_not_an_error() {
        let backend = Arc::new(MemoryBackend::new());
        let p = Arc::new(InstancePool::new(
            ServiceIdentity::new("Production", "callee"),
            vec![Instance::new("down", "callee", "10.0.0.1", 80).with_healthy(false)],
        ));
        let opts = RouteOptions::new("Production")
            .with_source("Production", "caller")
            .with_env_transfer("a");

        let result = router(&backend, RouterConfig::default())
            .filter_pool(
                RouteContext::build("callee", &opts, ContextPolicy::default()).unwrap(),
                p,
            )
            .await
            .unwrap();
        assert_eq!(result, RouteResult::Empty);
    }

    #[tokio::test]
    async fn test_rule_based_empty_reports_env_and_key() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert_rule(rule::synthesize(
            &ServiceIdentity::new("Production", "caller"),
            "formal",
            "Production",
            &["formal".to_string()],
        ));
        let dead = Arc::new(InstancePool::new(
            ServiceIdentity::new("Production", "callee"),
            vec![Instance::new("x", "callee", "10.0.0.1", 80).with_healthy(false)],
        ));
        let opts = RouteOptions::new("Production")
            .with_source("Production", "caller")
            .with_source_env("formal")
            .with_env_key("team");

        let err = router(&backend, RouterConfig::default())
            .filter("callee", &[Node::from_pool(dead)], &opts)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "env formal has no instances, key: team");
    }

    #[tokio::test]
    async fn test_rule_based_attaches_priority_and_cluster() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert_rule(rule::synthesize(
            &ServiceIdentity::new("Production", "caller"),
            "formal",
            "Production",
            &["test".to_string(), "formal".to_string()],
        ));
        let p = pool(&["formal", "test"]);
        let opts = RouteOptions::new("Production")
            .with_source("Production", "caller")
            .with_source_env("formal");

        let result = router(&backend, RouterConfig::default())
            .filter("callee", &[Node::from_pool(p.clone())], &opts)
            .await
            .unwrap();

        let RouteResult::Deferred(node) = result else {
            panic!("placeholder expected");
        };
        assert_eq!(node.env_key, "test,formal");
        match node.attachment {
            Some(NodeAttachment::Route { pool, cluster }) => {
                assert!(Arc::ptr_eq(&pool, &p));
                let cluster = cluster.unwrap();
                assert_eq!(cluster.size, 1);
            }
            other => panic!("unexpected attachment: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rule_based_source_excludes_inbound_selector_meta() {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert_rule(rule::synthesize(
            &ServiceIdentity::new("Production", "caller"),
            "formal",
            "Production",
            &["formal".to_string()],
        ));
        let call = CallMetadata::new().with_server_entry("selector-meta-zone", "sz");
        let opts = RouteOptions::new("Production")
            .with_source("Production", "caller")
            .with_source_env("formal")
            .with_call_metadata(call);

        router(&backend, RouterConfig::default())
            .filter("callee", &[Node::from_pool(pool(&["formal"]))], &opts)
            .await
            .unwrap();

        let call = &backend.invocations()[0];
        assert_eq!(call.stages.first(), Some(&StageKind::RuleBased));
        let source = &call.route.source.metadata;
        assert_eq!(source.get("env").map(String::as_str), Some("formal"));
        assert!(!source.contains_key("zone"));
    }

    #[tokio::test]
    async fn test_globally_disabled_routing() {
        let backend = Arc::new(MemoryBackend::new());
        let config = RouterConfig {
            enable: false,
            enable_canary: true,
            need_return_all_nodes: false,
        };
        let opts = RouteOptions::new("Production").with_source("Production", "caller");
        router(&backend, config)
            .filter("callee", &[Node::from_pool(pool(&["a"]))], &opts)
            .await
            .unwrap();

        let call = &backend.invocations()[0];
        assert_eq!(call.stages, vec![StageKind::NearbyBased, StageKind::Canary]);
        assert!(call.route.source_rule.is_none());
    }

    #[tokio::test]
    async fn test_disabled_router_ignores_context_policy() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_at(FailurePoint::RuleFetch, BackendError::Unavailable("down".into()));
        let config = RouterConfig {
            enable: false,
            ..RouterConfig::default()
        };
        let opts = RouteOptions::new("Production")
            .with_source("Production", "caller")
            .with_env_transfer("a");
        let ctx = RouteContext::build("callee", &opts, ContextPolicy::default()).unwrap();

        let result = router(&backend, config)
            .filter_pool(ctx, pool(&["a", "b"]))
            .await
            .unwrap();
        assert_eq!(result.nodes().len(), 1);

        let call = &backend.invocations()[0];
        assert_eq!(call.stages, vec![StageKind::NearbyBased]);
        assert!(call.route.source_rule.is_none());
    }

    #[tokio::test]
    async fn test_no_router_empty_names_dest_env() {
        let backend = Arc::new(MemoryBackend::new());
        let dead = Arc::new(InstancePool::new(
            ServiceIdentity::new("Production", "callee"),
            vec![Instance::new("x", "callee", "10.0.0.1", 80).with_healthy(false)],
        ));
        let opts = RouteOptions::new("Production").with_destination_env("test");
        let err = router(&backend, RouterConfig::default())
            .filter("callee", &[Node::from_pool(dead)], &opts)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "env test has no instances, key: ");
    }
}
