//! Naming Facade
//!
//! Startup wiring. The classifier chain is assembled here exactly once, before
//! any request path exists, and then handed by `Arc` to the breaker.
//!
//! ```text
//! NamingBuilder
//!   .with_config(cfg)            routing, breaker and selector switches
//!   .with_backend(backend)       NamingBackend + InstancePicker + CallResultReporter
//!   .register_classifier(link)   zero or more, last registered runs first
//!   .build()  ->  Naming { router, breaker, selector }
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::circuitbreaker::{
    CallError, CircuitBreaker, ClassifierChain, ClassifierChainBuilder, Verdict,
};
use crate::config::NamingConfig;
use crate::discovery::backend::{CallResultReporter, InstancePicker, NamingBackend};
use crate::error::{NamingError, Result};
use crate::routing::context::RouteOptions;
use crate::routing::node::{Node, RouteResult};
use crate::routing::router::ServiceRouter;
use crate::selector::Selector;

/// Collaborators the facade needs
struct Collaborators {
    backend: Arc<dyn NamingBackend>,
    picker: Arc<dyn InstancePicker>,
    reporter: Arc<dyn CallResultReporter>,
}

/// Builder for [`Naming`]
#[derive(Default)]
pub struct NamingBuilder {
    config: NamingConfig,
    classifiers: ClassifierChainBuilder,
    collaborators: Option<Collaborators>,
}

impl NamingBuilder {
    /// Builder with default configuration and no collaborators
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `config`
    #[must_use]
    pub fn with_config(mut self, config: NamingConfig) -> Self {
        self.config = config;
        self
    }

    /// Use one value for every collaborator role
    #[must_use]
    pub fn with_backend<B>(mut self, backend: Arc<B>) -> Self
    where
        B: NamingBackend + InstancePicker + CallResultReporter + 'static,
    {
        self.collaborators = Some(Collaborators {
            backend: backend.clone(),
            picker: backend.clone(),
            reporter: backend,
        });
        self
    }

    /// Use separate collaborators
    #[must_use]
    pub fn with_collaborators(
        mut self,
        backend: Arc<dyn NamingBackend>,
        picker: Arc<dyn InstancePicker>,
        reporter: Arc<dyn CallResultReporter>,
    ) -> Self {
        self.collaborators = Some(Collaborators {
            backend,
            picker,
            reporter,
        });
        self
    }

    /// Register a classifier link ahead of all links registered so far
    #[must_use]
    pub fn register_classifier<F>(mut self, link: F) -> Self
    where
        F: Fn(&CallError, Duration) -> Verdict + Send + Sync + 'static,
    {
        self.classifiers = self.classifiers.register(link);
        self
    }

    /// Wire everything together
    ///
    /// # Errors
    ///
    /// Returns [`NamingError::Config`] when no collaborator was supplied.
    pub fn build(self) -> Result<Naming> {
        let Collaborators {
            backend,
            picker,
            reporter,
        } = self
            .collaborators
            .ok_or_else(|| NamingError::Config("no discovery backend configured".to_string()))?;

        let classifier: Arc<ClassifierChain> = Arc::new(
            self.classifiers
                .with_min_client_timeout(self.config.report_timeout)
                .build(),
        );

        tracing::info!(
            name = %self.config.name,
            service_router = self.config.router.enable,
            canary = self.config.router.enable_canary,
            return_all_nodes = self.config.router.need_return_all_nodes,
            classifiers = classifier.len(),
            "naming layer ready"
        );

        Ok(Naming {
            router: ServiceRouter::new(backend, self.config.router),
            breaker: CircuitBreaker::new(reporter.clone(), classifier),
            selector: Selector::new(picker, reporter, self.config.selector_config()),
            config: self.config,
        })
    }
}

/// The assembled naming layer
pub struct Naming {
    config: NamingConfig,
    router: ServiceRouter,
    breaker: CircuitBreaker,
    selector: Selector,
}

impl Naming {
    /// Start building
    #[must_use]
    pub fn builder() -> NamingBuilder {
        NamingBuilder::new()
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &NamingConfig {
        &self.config
    }

    /// Route filtering
    #[must_use]
    pub fn router(&self) -> &ServiceRouter {
        &self.router
    }

    /// Breaker reporting
    #[must_use]
    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// One-shot selection
    #[must_use]
    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Shorthand for [`ServiceRouter::filter`]
    ///
    /// # Errors
    ///
    /// See [`ServiceRouter::filter`].
    pub async fn route(
        &self,
        service_name: &str,
        nodes: &[Node],
        opts: &RouteOptions,
    ) -> Result<RouteResult> {
        self.router.filter(service_name, nodes, opts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuitbreaker::classify::CONNECT_FAIL;
    use crate::discovery::backend::RetStatus;
    use crate::discovery::instance::{Instance, InstancePool, ServiceIdentity};
    use crate::discovery::memory::MemoryBackend;

    fn backend() -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new());
        backend.insert_pool(Arc::new(InstancePool::new(
            ServiceIdentity::new("Production", "callee"),
            vec![Instance::new("i1", "callee", "10.0.0.1", 80)],
        )));
        backend
    }

    #[test]
    fn test_build_requires_backend() {
        assert!(matches!(Naming::builder().build(), Err(NamingError::Config(_))));
    }

    #[test]
    fn test_build_propagates_config() {
        let mut config = NamingConfig::default();
        config.router.need_return_all_nodes = true;
        config.report_timeout = Duration::from_millis(30);

        let naming = Naming::builder()
            .with_config(config)
            .with_backend(backend())
            .register_classifier(|_, _| Verdict::Unknown)
            .build()
            .unwrap();

        assert!(naming.router().config().need_return_all_nodes);
        assert_eq!(naming.circuit_breaker().classifier().len(), 1);
        assert_eq!(
            naming.circuit_breaker().classifier().min_client_timeout(),
            Duration::from_millis(30)
        );
        assert_eq!(naming.selector().config().report_timeout, Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_registered_classifier_reaches_breaker() {
        let backend = backend();
        let naming = Naming::builder()
            .with_backend(backend.clone())
            .register_classifier(|err, _| {
                if err.code == CONNECT_FAIL {
                    Verdict::False
                } else {
                    Verdict::Unknown
                }
            })
            .build()
            .unwrap();

        let node = naming
            .selector()
            .select("callee", &RouteOptions::new("Production"))
            .await
            .unwrap();
        let refused = CallError::framework(CONNECT_FAIL, "refused");
        naming
            .circuit_breaker()
            .report(&node, Duration::from_millis(2), Some(&refused))
            .await
            .unwrap();

        assert_eq!(backend.reported()[0].status, RetStatus::Success);
    }

    #[tokio::test]
    async fn test_route_through_facade() {
        let backend = backend();
        let pool = backend.pool(&ServiceIdentity::new("Production", "callee")).unwrap();
        let naming = Naming::builder().with_backend(backend).build().unwrap();

        let result = naming
            .route("callee", &[Node::from_pool(pool)], &RouteOptions::new("Production"))
            .await
            .unwrap();
        assert_eq!(result.nodes().len(), 1);
    }
}
