//! Route Context
//!
//! Turns the raw per-request option bag into the addressing context the
//! chain composer works from. A context is built fresh for every request and
//! moved into the composer; it is never shared or reused.
//!
//! # Source Metadata Merge Order
//!
//! ```text
//! 1. env = <declared source env>
//! 2. inbound server metadata "selector-meta-<k>" -> <k>   (trans-meta enabled)
//! 3. caller supplied source metadata                       (wins on collision)
//! ```

use std::collections::HashMap;

use crate::discovery::instance::ServiceIdentity;
use crate::error::{NamingError, Result};
use crate::routing::rule::ENV_KEY;

/// Client metadata key carrying the canary label
pub const CANARY_KEY: &str = "trpc-canary";

/// Prefix of inbound metadata keys propagated into source metadata
pub const SELECTOR_META_PREFIX: &str = "selector-meta-";

/// Metadata key used when an explicit environment selector key is supplied
pub const ENV_SELECTOR_KEY: &str = "key";

// ============================================================================
// Service Info
// ============================================================================

/// A service identity plus the metadata stages match against
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceInfo {
    /// Namespace and name
    pub identity: ServiceIdentity,

    /// Metadata labels
    pub metadata: HashMap<String, String>,
}

impl ServiceInfo {
    /// Service info without metadata
    #[must_use]
    pub fn new(identity: ServiceIdentity) -> Self {
        Self {
            identity,
            metadata: HashMap::new(),
        }
    }

    /// Service info with metadata
    #[must_use]
    pub fn with_metadata(identity: ServiceIdentity, metadata: HashMap<String, String>) -> Self {
        Self { identity, metadata }
    }
}

// ============================================================================
// Call Metadata
// ============================================================================

/// Transport metadata of the call being made
///
/// `client` is what this process will send downstream; `server` is what it
/// received from its own caller.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallMetadata {
    /// Outgoing (client side) metadata
    pub client: HashMap<String, Vec<u8>>,

    /// Incoming (server side) metadata
    pub server: HashMap<String, Vec<u8>>,
}

impl CallMetadata {
    /// Empty metadata
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the call as canary traffic
    #[must_use]
    pub fn with_canary(mut self, label: impl Into<String>) -> Self {
        self.client
            .insert(CANARY_KEY.to_string(), label.into().into_bytes());
        self
    }

    /// Add one inbound metadata entry
    #[must_use]
    pub fn with_server_entry(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.server.insert(key.into(), value.into());
        self
    }

    /// Canary label, empty when absent
    #[must_use]
    pub fn canary(&self) -> String {
        self.client
            .get(CANARY_KEY)
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .unwrap_or_default()
    }

    /// Inbound `selector-meta-` entries with the prefix stripped
    pub fn selector_meta(&self) -> impl Iterator<Item = (String, String)> + '_ {
        self.server.iter().filter_map(|(k, v)| {
            k.strip_prefix(SELECTOR_META_PREFIX)
                .map(|key| (key.to_string(), String::from_utf8_lossy(v).into_owned()))
        })
    }
}

// ============================================================================
// Route Options
// ============================================================================

/// Raw per-request routing options
#[derive(Clone, Debug, Default)]
pub struct RouteOptions {
    /// Namespace of the called service
    pub namespace: String,

    /// Calling service namespace
    pub source_namespace: String,

    /// Calling service name
    pub source_service_name: String,

    /// Caller supplied source metadata
    pub source_metadata: HashMap<String, String>,

    /// Caller supplied destination metadata
    pub destination_metadata: HashMap<String, String>,

    /// Declared environment of the caller
    pub source_env_name: String,

    /// Explicit destination environment
    pub destination_env_name: String,

    /// Comma separated environment priority list
    pub env_transfer: String,

    /// Explicit environment selector key
    pub env_key: String,

    /// Grouping set of the caller
    pub source_set_name: String,

    /// Grouping set of the callee
    pub destination_set_name: String,

    /// Hash key for hash based balancers
    pub hash_key: String,

    /// Replica count for consistent-hash balancers
    pub replicas: u32,

    /// Load balancer policy requested by the caller
    pub load_balance_type: String,

    /// Skip service routing for this call
    pub disable_service_router: bool,

    /// Transport metadata of the call
    pub call: Option<CallMetadata>,
}

impl RouteOptions {
    /// Options addressing `namespace`
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Set the calling service
    #[must_use]
    pub fn with_source(mut self, namespace: impl Into<String>, service: impl Into<String>) -> Self {
        self.source_namespace = namespace.into();
        self.source_service_name = service.into();
        self
    }

    /// Set the caller environment
    #[must_use]
    pub fn with_source_env(mut self, env: impl Into<String>) -> Self {
        self.source_env_name = env.into();
        self
    }

    /// Set the destination environment
    #[must_use]
    pub fn with_destination_env(mut self, env: impl Into<String>) -> Self {
        self.destination_env_name = env.into();
        self
    }

    /// Add a source metadata entry
    #[must_use]
    pub fn with_source_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.source_metadata.insert(key.into(), value.into());
        self
    }

    /// Add a destination metadata entry
    #[must_use]
    pub fn with_destination_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.destination_metadata.insert(key.into(), value.into());
        self
    }

    /// Set the environment-transfer list (comma separated)
    #[must_use]
    pub fn with_env_transfer(mut self, list: impl Into<String>) -> Self {
        self.env_transfer = list.into();
        self
    }

    /// Set the environment selector key
    #[must_use]
    pub fn with_env_key(mut self, key: impl Into<String>) -> Self {
        self.env_key = key.into();
        self
    }

    /// Set grouping set names
    #[must_use]
    pub fn with_set_names(
        mut self,
        source: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        self.source_set_name = source.into();
        self.destination_set_name = destination.into();
        self
    }

    /// Set the hash key
    #[must_use]
    pub fn with_hash_key(mut self, key: impl Into<String>) -> Self {
        self.hash_key = key.into();
        self
    }

    /// Set the replica count
    #[must_use]
    pub fn with_replicas(mut self, replicas: u32) -> Self {
        self.replicas = replicas;
        self
    }

    /// Set the load balancer policy
    #[must_use]
    pub fn with_load_balance_type(mut self, lb: impl Into<String>) -> Self {
        self.load_balance_type = lb.into();
        self
    }

    /// Disable service routing for this call
    #[must_use]
    pub fn without_service_router(mut self) -> Self {
        self.disable_service_router = true;
        self
    }

    /// Attach call transport metadata
    #[must_use]
    pub fn with_call_metadata(mut self, call: CallMetadata) -> Self {
        self.call = Some(call);
        self
    }
}

// ============================================================================
// Route Context
// ============================================================================

/// Process-wide switches that influence context building
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContextPolicy {
    /// Service routing enabled by configuration
    pub service_router_enabled: bool,

    /// Propagate `selector-meta-` inbound metadata into source metadata
    pub enable_trans_meta: bool,
}

impl Default for ContextPolicy {
    fn default() -> Self {
        Self {
            service_router_enabled: true,
            enable_trans_meta: false,
        }
    }
}

/// Per-request addressing context
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteContext {
    /// Calling service exactly as the caller named it
    pub source_identity: ServiceIdentity,

    /// Calling service with merged metadata, `None` when the caller supplied
    /// neither identity nor metadata or routing is off
    pub source: Option<ServiceInfo>,

    /// Called service, metadata holds the destination filter
    pub dest: ServiceInfo,

    /// Caller supplied source metadata, unmerged
    pub source_metadata: HashMap<String, String>,

    /// Declared caller environment
    pub source_env: String,

    /// Explicit destination environment
    pub dest_env: String,

    /// Ordered environment priority list
    pub env_transfer_list: Vec<String>,

    /// Explicit environment selector key
    pub env_key: String,

    /// Hash key bytes
    pub hash_key: Vec<u8>,

    /// Replica count
    pub replicas: u32,

    /// Load balancer policy requested by the caller
    pub lb_policy: String,

    /// Canary label, empty when absent
    pub canary_tag: String,

    /// Grouping set of the caller
    pub source_set_name: String,

    /// Grouping set of the callee
    pub dest_set_name: String,

    /// Service routing enabled by configuration
    pub service_router_enabled: bool,

    /// Service routing disabled for this call
    pub service_router_disabled_by_caller: bool,
}

fn merge_non_empty(into: &mut HashMap<String, String>, from: &HashMap<String, String>) {
    for (k, v) in from {
        if !k.is_empty() && !v.is_empty() {
            into.insert(k.clone(), v.clone());
        }
    }
}

fn split_env_transfer(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split(',').map(str::to_string).collect()
}

fn source_metadata(opts: &RouteOptions, enable_trans_meta: bool) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    if !opts.source_env_name.is_empty() {
        metadata.insert(ENV_KEY.to_string(), opts.source_env_name.clone());
    }
    if enable_trans_meta {
        if let Some(call) = &opts.call {
            metadata.extend(call.selector_meta());
        }
    }
    merge_non_empty(&mut metadata, &opts.source_metadata);
    metadata
}

fn dest_metadata(opts: &RouteOptions) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    if opts.disable_service_router && !opts.destination_env_name.is_empty() {
        metadata.insert(ENV_KEY.to_string(), opts.destination_env_name.clone());
    }
    merge_non_empty(&mut metadata, &opts.destination_metadata);
    metadata
}

impl RouteContext {
    /// Build the context for a call to `service_name`
    ///
    /// # Errors
    ///
    /// Returns [`NamingError::Config`] when `service_name` is empty.
    pub fn build(service_name: &str, opts: &RouteOptions, policy: ContextPolicy) -> Result<Self> {
        if service_name.is_empty() {
            return Err(NamingError::Config("destination service name is empty".to_string()));
        }

        tracing::trace!(service = service_name, options = ?opts, "building route context");

        let source_identity =
            ServiceIdentity::new(opts.source_namespace.as_str(), opts.source_service_name.as_str());
        let source = if policy.service_router_enabled && !opts.disable_service_router {
            let metadata = source_metadata(opts, policy.enable_trans_meta);
            (!source_identity.is_empty() || !metadata.is_empty())
                .then(|| ServiceInfo::with_metadata(source_identity.clone(), metadata))
        } else {
            None
        };

        Ok(Self {
            source_identity,
            source,
            dest: ServiceInfo::with_metadata(
                ServiceIdentity::new(opts.namespace.as_str(), service_name),
                dest_metadata(opts),
            ),
            source_metadata: opts.source_metadata.clone(),
            source_env: opts.source_env_name.clone(),
            dest_env: opts.destination_env_name.clone(),
            env_transfer_list: split_env_transfer(&opts.env_transfer),
            env_key: opts.env_key.clone(),
            hash_key: opts.hash_key.as_bytes().to_vec(),
            replicas: opts.replicas,
            lb_policy: opts.load_balance_type.clone(),
            canary_tag: opts.call.as_ref().map(CallMetadata::canary).unwrap_or_default(),
            source_set_name: opts.source_set_name.clone(),
            dest_set_name: opts.destination_set_name.clone(),
            service_router_enabled: policy.service_router_enabled,
            service_router_disabled_by_caller: opts.disable_service_router,
        })
    }

    /// Source identity usable for service routing (namespace and name set)
    #[must_use]
    pub fn routable_source(&self) -> Option<&ServiceIdentity> {
        Some(&self.source_identity).filter(|id| id.is_complete())
    }

    /// Environment priority list as the caller wrote it
    #[must_use]
    pub fn env_transfer_joined(&self) -> String {
        self.env_transfer_list.join(",")
    }
}
