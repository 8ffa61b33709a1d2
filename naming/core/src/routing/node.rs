//! Result Projection
//!
//! Converts stage survivors into the node list handed to the picking step.
//!
//! ```text
//! survivors: [i1, i2, i3]
//!
//! return-all:   [Node(i1) + env_key + Route{pool, cluster}, Node(i2), Node(i3)]
//! placeholder:  [Node(service) + env_key + Route{pool, cluster}]
//! ```
//!
//! In placeholder mode the picking step reads the cluster handle and picks
//! lazily, so the projector never materializes one node per instance.

use std::sync::Arc;

use serde::Serialize;

use crate::discovery::instance::{ClusterHandle, Instance, InstancePool};

// ============================================================================
// Node
// ============================================================================

/// What a node carries for the picking step
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeAttachment {
    /// Raw pool as delivered by discovery, before routing
    Pool(Arc<InstancePool>),

    /// Routed result: the untouched pool and the cluster the stages chose
    Route {
        /// Pool the stages ran against
        pool: Arc<InstancePool>,
        /// Cluster selected by the stages
        cluster: Option<ClusterHandle>,
    },

    /// A concrete picked instance
    Instance {
        /// Picked instance
        instance: Arc<Instance>,
        /// Namespace it was picked in
        namespace: String,
    },
}

impl NodeAttachment {
    /// Instance pool, for pool and route attachments
    #[must_use]
    pub fn pool(&self) -> Option<&Arc<InstancePool>> {
        match self {
            Self::Pool(pool) | Self::Route { pool, .. } => Some(pool),
            Self::Instance { .. } => None,
        }
    }

    /// Picked instance, for instance attachments
    #[must_use]
    pub fn instance(&self) -> Option<&Arc<Instance>> {
        match self {
            Self::Instance { instance, .. } => Some(instance),
            _ => None,
        }
    }
}

/// A routable endpoint as seen by the framework
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Node {
    /// Service the node belongs to
    pub service_name: String,

    /// `host:port`, empty for placeholder nodes
    pub address: String,

    /// Application protocol
    pub protocol: String,

    /// Static weight
    pub weight: u32,

    /// Environments the request was routed into, first node only
    #[serde(skip_serializing_if = "String::is_empty")]
    pub env_key: String,

    /// Grouping set of the instance
    #[serde(skip_serializing_if = "String::is_empty")]
    pub set_name: String,

    /// Container the instance runs in
    #[serde(skip_serializing_if = "String::is_empty")]
    pub container_name: String,

    /// Data for the picking step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<NodeAttachment>,
}

impl Node {
    /// Placeholder node for `service_name`
    #[must_use]
    pub fn placeholder(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Node carrying a raw discovery pool
    #[must_use]
    pub fn from_pool(pool: Arc<InstancePool>) -> Self {
        Self {
            service_name: pool.service.name.clone(),
            attachment: Some(NodeAttachment::Pool(pool)),
            ..Default::default()
        }
    }

    /// Node for one concrete instance
    #[must_use]
    pub fn from_instance(instance: &Instance) -> Self {
        Self {
            service_name: instance.service.clone(),
            address: instance.address(),
            protocol: instance.protocol.clone(),
            weight: instance.weight,
            ..Default::default()
        }
    }

    /// Pool carried by the node, if any
    #[must_use]
    pub fn pool(&self) -> Option<&Arc<InstancePool>> {
        self.attachment.as_ref().and_then(NodeAttachment::pool)
    }

    /// Instance carried by the node, if any
    #[must_use]
    pub fn instance(&self) -> Option<&Arc<Instance>> {
        self.attachment.as_ref().and_then(NodeAttachment::instance)
    }
}

// ============================================================================
// Route Result
// ============================================================================

/// Output of one routing call
#[derive(Clone, Debug, PartialEq)]
pub enum RouteResult {
    /// No instance survived
    Empty,

    /// One node per surviving instance
    Expanded(Vec<Node>),

    /// Single placeholder, the picking step resolves instances later
    Deferred(Node),
}

impl RouteResult {
    /// Nodes in output order
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        match self {
            Self::Empty => &[],
            Self::Expanded(nodes) => nodes,
            Self::Deferred(node) => std::slice::from_ref(node),
        }
    }

    /// Consume into a node list
    #[must_use]
    pub fn into_nodes(self) -> Vec<Node> {
        match self {
            Self::Empty => Vec::new(),
            Self::Expanded(nodes) => nodes,
            Self::Deferred(node) => vec![node],
        }
    }

    /// Whether no node was produced
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes().is_empty()
    }
}

/// Build the node list for a routed request
pub fn project(
    service_name: &str,
    survivors: &[Arc<Instance>],
    env_priority: String,
    cluster: Option<ClusterHandle>,
    pool: Arc<InstancePool>,
    return_all_nodes: bool,
) -> RouteResult {
    if survivors.is_empty() {
        return RouteResult::Empty;
    }

    let attachment = NodeAttachment::Route { pool, cluster };

    if return_all_nodes {
        let mut nodes: Vec<Node> = survivors.iter().map(|i| Node::from_instance(i)).collect();
        if let Some(first) = nodes.first_mut() {
            first.env_key = env_priority;
            first.attachment = Some(attachment);
        }
        RouteResult::Expanded(nodes)
    } else {
        let mut node = Node::placeholder(service_name);
        node.env_key = env_priority;
        node.attachment = Some(attachment);
        RouteResult::Deferred(node)
    }
}
