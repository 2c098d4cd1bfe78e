//! Contracts the migration driver requires of the two stores

use std::collections::BTreeMap;

use api_types::Container;
use api_types::ContainerFilter;
use api_types::Node;
use api_types::NodeCertificates;
use api_types::Pod;
use api_types::SourceNode;
use api_types::TotalCapacity;
use async_trait::async_trait;
use error_stack::Report;

use super::errors::StoreError;

/// Everything needed to create a node in the successor store.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub name: String,
    pub endpoint: String,
    pub pod_name: String,
    pub certificates: NodeCertificates,
    /// Number of CPUs to allocate in the initial pool
    pub cpu_count: usize,
    /// Shares per CPU in the initial pool
    pub share_base: u32,
    pub memory_capacity: TotalCapacity,
    pub labels: BTreeMap<String, String>,
}

/// Read-only access to the legacy store.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// List pods; `None` lists every pod, `Some(name)` at most that one.
    async fn list_pods(&self, filter: Option<&str>) -> Result<Vec<Pod>, Report<StoreError>>;

    /// List the nodes registered under a pod
    async fn list_nodes(&self, pod_name: &str) -> Result<Vec<SourceNode>, Report<StoreError>>;

    /// Read the certificate material of a node
    async fn get_node_credentials(
        &self,
        pod_name: &str,
        node_name: &str,
    ) -> Result<NodeCertificates, Report<StoreError>>;

    /// List the live containers scheduled on a node
    async fn list_containers_on_node(
        &self,
        node_name: &str,
    ) -> Result<Vec<Container>, Report<StoreError>>;

    /// List containers across the whole cluster matching `filter`
    async fn list_all_containers(
        &self,
        filter: &ContainerFilter,
    ) -> Result<Vec<Container>, Report<StoreError>>;
}

/// Write access to the successor store.
#[async_trait]
pub trait DestinationStore: Send + Sync {
    async fn get_pod(&self, name: &str) -> Result<Option<Pod>, Report<StoreError>>;

    /// Create a pod.
    ///
    /// # Errors
    ///
    /// - [`StoreError::AlreadyExists`] if a pod with that name is present
    async fn create_pod(
        &self,
        name: &str,
        favor: &str,
        desc: &str,
    ) -> Result<Pod, Report<StoreError>>;

    /// Delete a node with its credentials and the containers indexed under it.
    ///
    /// Deleting an absent node succeeds.
    async fn delete_node(&self, node_name: &str) -> Result<(), Report<StoreError>>;

    /// Create a node with a uniform initial CPU pool
    async fn create_node(&self, spec: NodeSpec) -> Result<Node, Report<StoreError>>;

    /// Persist the resource fields of an existing node
    async fn update_node_resources(&self, node: &Node) -> Result<(), Report<StoreError>>;

    async fn create_container(&self, container: &Container) -> Result<(), Report<StoreError>>;
}
