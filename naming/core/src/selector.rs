//! Node Selection
//!
//! One-shot "give me a node" entry point. Builds the same request context the
//! router uses, but hands the whole decision (routing and balancing) to the
//! picking collaborator and wraps its first answer in a node.

use std::sync::Arc;
use std::time::Duration;

use crate::circuitbreaker::classify::CallError;
use crate::circuitbreaker::reporter::report_with_timeout_suppression;
use crate::discovery::backend::{CallResultReporter, InstancePicker, PickRequest};
use crate::error::{NamingError, Result};
use crate::routing::chain::{SET_ENABLE_KEY, SET_ENABLE_VALUE, SET_NAME_KEY};
use crate::routing::context::{ContextPolicy, RouteContext, RouteOptions};
use crate::routing::node::{Node, NodeAttachment};

/// Instance metadata key naming the container
pub const CONTAINER_KEY: &str = "container_name";

/// Balancer used when the caller does not ask for one
pub const DEFAULT_LB_POLICY: &str = "polaris_wr";

/// Framework balancer names and the picker policies they stand for
const LB_POLICIES: &[(&str, &str)] = &[
    ("polaris_wr", "weightedRandom"),
    ("polaris_hash", "hash"),
    ("polaris_ring_hash", "ringHash"),
    ("polaris_maglev", "maglev"),
    ("polaris_l5cst", "l5cst"),
];

/// Picker policy for a framework balancer name
///
/// Unknown names are passed through so picker-native names keep working.
#[must_use]
pub fn lb_policy_name(lb: &str) -> &str {
    let lb = if lb.is_empty() { DEFAULT_LB_POLICY } else { lb };
    LB_POLICIES
        .iter()
        .find(|(framework, _)| *framework == lb)
        .map_or(lb, |(_, picker)| *picker)
}

/// Selection switches fixed at startup
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SelectorConfig {
    /// Pass the calling service to the picker
    pub enable_service_router: bool,
    /// Propagate `selector-meta-` inbound metadata
    pub enable_trans_meta: bool,
    /// Client timeouts shorter than this are reported as successes
    pub report_timeout: Duration,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            enable_service_router: true,
            enable_trans_meta: false,
            report_timeout: crate::circuitbreaker::DEFAULT_MIN_CLIENT_TIMEOUT,
        }
    }
}

/// Picks single nodes through the discovery SDK
pub struct Selector {
    picker: Arc<dyn InstancePicker>,
    reporter: Arc<dyn CallResultReporter>,
    config: SelectorConfig,
}

impl Selector {
    /// Create a selector
    pub fn new(
        picker: Arc<dyn InstancePicker>,
        reporter: Arc<dyn CallResultReporter>,
        config: SelectorConfig,
    ) -> Self {
        Self {
            picker,
            reporter,
            config,
        }
    }

    /// Selection switches in use
    #[must_use]
    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    /// Pick one node for a call to `service_name`
    ///
    /// # Errors
    ///
    /// - [`NamingError::Config`] for an empty service name
    /// - [`NamingError::Pick`] when the picker fails
    /// - [`NamingError::EmptyPick`] when it returns nothing
    pub async fn select(&self, service_name: &str, opts: &RouteOptions) -> Result<Node> {
        let policy = ContextPolicy {
            service_router_enabled: self.config.enable_service_router,
            enable_trans_meta: self.config.enable_trans_meta,
        };
        let ctx = RouteContext::build(service_name, opts, policy)?;

        let request = PickRequest {
            service: service_name.to_string(),
            namespace: ctx.dest.identity.namespace.clone(),
            source: ctx.source,
            metadata: ctx.dest.metadata,
            lb_policy: lb_policy_name(&ctx.lb_policy).to_string(),
            replicas: ctx.replicas,
            canary: ctx.canary_tag,
            hash_key: ctx.hash_key,
        };

        let instances = self.picker.pick_instances(&request).await.map_err(|err| {
            tracing::warn!(service = service_name, error = %err, "instance pick failed");
            NamingError::Pick(err)
        })?;
        let instance = instances.into_iter().next().ok_or(NamingError::EmptyPick)?;

        let metadata = &instance.metadata;
        let container_name = metadata.get(CONTAINER_KEY).cloned().unwrap_or_default();
        let set_enabled =
            metadata.get(SET_ENABLE_KEY).map(String::as_str) == Some(SET_ENABLE_VALUE);
        let set_name = if set_enabled {
            metadata.get(SET_NAME_KEY).cloned().unwrap_or_default()
        } else {
            String::new()
        };

        tracing::debug!(
            service = service_name,
            address = %instance.address(),
            lb = %request.lb_policy,
            "selected node"
        );

        Ok(Node {
            service_name: service_name.to_string(),
            address: instance.address(),
            protocol: instance.protocol.clone(),
            weight: instance.weight,
            env_key: String::new(),
            set_name,
            container_name,
            attachment: Some(NodeAttachment::Instance {
                instance,
                namespace: request.namespace,
            }),
        })
    }

    /// Report the outcome of a call made to `node`
    ///
    /// # Errors
    ///
    /// See [`report_with_timeout_suppression`].
    pub async fn report(
        &self,
        node: &Node,
        cost: Duration,
        error: Option<&CallError>,
    ) -> Result<()> {
        report_with_timeout_suppression(
            self.reporter.as_ref(),
            node,
            self.config.report_timeout,
            cost,
            error,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuitbreaker::classify::CLIENT_TIMEOUT;
    use crate::discovery::backend::RetStatus;
    use crate::discovery::instance::{Instance, InstancePool, ServiceIdentity};
    use crate::discovery::memory::{FailurePoint, MemoryBackend};
    use crate::error::BackendError;
    use pretty_assertions::assert_eq;

    fn backend() -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert_pool(Arc::new(InstancePool::new(
            ServiceIdentity::new("Production", "callee"),
            vec![
                Instance::new("light", "callee", "10.0.0.1", 80).with_weight(10),
                Instance::new("heavy", "callee", "10.0.0.2", 8080)
                    .with_weight(90)
                    .with_protocol("trpc")
                    .with_metadata(CONTAINER_KEY, "pod-7")
                    .with_metadata(SET_ENABLE_KEY, SET_ENABLE_VALUE)
                    .with_metadata(SET_NAME_KEY, "app.sz.1"),
            ],
        )));
        backend
    }

    fn selector(backend: &Arc<MemoryBackend>) -> Selector {
        Selector::new(backend.clone(), backend.clone(), SelectorConfig::default())
    }

    #[test]
    fn test_lb_policy_mapping() {
        assert_eq!(lb_policy_name(""), "weightedRandom");
        assert_eq!(lb_policy_name("polaris_ring_hash"), "ringHash");
        assert_eq!(lb_policy_name("custom"), "custom");
    }

    #[tokio::test]
    async fn test_select_builds_node() {
        let backend = backend();
        let node = selector(&backend)
            .select("callee", &RouteOptions::new("Production"))
            .await
            .unwrap();

        assert_eq!(node.address, "10.0.0.2:8080");
        assert_eq!(node.weight, 90);
        assert_eq!(node.protocol, "trpc");
        assert_eq!(node.container_name, "pod-7");
        assert_eq!(node.set_name, "app.sz.1");
        match &node.attachment {
            Some(NodeAttachment::Instance { instance, namespace }) => {
                assert_eq!(instance.id, "heavy");
                assert_eq!(namespace, "Production");
            }
            other => panic!("unexpected attachment: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_select_filters_by_dest_metadata() {
        let backend = backend();
        let opts =
            RouteOptions::new("Production").with_destination_metadata(CONTAINER_KEY, "missing");
        let err = selector(&backend).select("callee", &opts).await.unwrap_err();
        assert!(matches!(err, NamingError::EmptyPick));
    }

    #[tokio::test]
    async fn test_select_errors() {
        let backend = backend();
        let err = selector(&backend)
            .select("unknown", &RouteOptions::new("Production"))
            .await
            .unwrap_err();
        assert!(matches!(err, NamingError::EmptyPick));

        backend.fail_at(
            FailurePoint::Pick,
            BackendError::Rejected {
                code: 500,
                message: "busy".into(),
            },
        );
        let err = selector(&backend)
            .select("callee", &RouteOptions::new("Production"))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("get one instance err"));
    }

    #[tokio::test]
    async fn test_report_uses_timeout_suppression() {
        let backend = backend();
        let config = SelectorConfig {
            report_timeout: Duration::from_millis(200),
            ..SelectorConfig::default()
        };
        let sel = Selector::new(backend.clone(), backend.clone(), config);
        let node = sel.select("callee", &RouteOptions::new("Production")).await.unwrap();

        let timeout = CallError::framework(CLIENT_TIMEOUT, "timeout");
        sel.report(&node, Duration::from_millis(100), Some(&timeout)).await.unwrap();
        sel.report(&node, Duration::from_millis(300), Some(&timeout)).await.unwrap();

        let reported = backend.reported();
        assert_eq!(reported[0].status, RetStatus::Success);
        assert_eq!(reported[1].status, RetStatus::Fail);
    }
}
