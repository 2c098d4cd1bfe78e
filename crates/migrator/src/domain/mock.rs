//! Test adapters implementing the store traits
//!
//! In-memory source and destination stores with failure injection, used by the
//! orchestrator tests and by anything that wants to drive a migration without etcd.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;

use api_types::Container;
use api_types::ContainerFilter;
use api_types::CpuMap;
use api_types::Node;
use api_types::NodeCertificates;
use api_types::Pod;
use api_types::SourceNode;
use async_trait::async_trait;
use error_stack::Report;

use super::errors::StoreError;
use super::traits::DestinationStore;
use super::traits::NodeSpec;
use super::traits::SourceStore;

fn injected(key: impl Into<String>) -> Report<StoreError> {
    Report::new(StoreError::Transport {
        endpoint: "mock".to_string(),
        message: format!("injected failure for {}", key.into()),
    })
}

#[derive(Default)]
struct SourceState {
    pods: Vec<Pod>,
    nodes: Vec<SourceNode>,
    credentials: BTreeMap<(String, String), NodeCertificates>,
    containers: Vec<Container>,
    fail_pod_listing: bool,
    fail_container_listing: bool,
    fail_nodes_of: HashSet<String>,
    fail_credentials_of: HashSet<String>,
    fail_containers_of: HashSet<String>,
}

/// Mock legacy store
#[derive(Clone, Default)]
pub struct MockSourceStore {
    state: Arc<Mutex<SourceState>>,
}

impl MockSourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pod(&self, pod: Pod) {
        self.state.lock().unwrap().pods.push(pod);
    }

    pub fn add_node(&self, node: SourceNode) {
        self.state.lock().unwrap().nodes.push(node);
    }

    pub fn set_credentials(&self, pod_name: &str, node_name: &str, certs: NodeCertificates) {
        self.state
            .lock()
            .unwrap()
            .credentials
            .insert((pod_name.to_string(), node_name.to_string()), certs);
    }

    /// Register a live container; it shows up both on its node and cluster-wide.
    pub fn add_container(&self, container: Container) {
        self.state.lock().unwrap().containers.push(container);
    }

    pub fn fail_pod_listing(&self) {
        self.state.lock().unwrap().fail_pod_listing = true;
    }

    pub fn fail_container_listing(&self) {
        self.state.lock().unwrap().fail_container_listing = true;
    }

    pub fn fail_nodes_of(&self, pod_name: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_nodes_of
            .insert(pod_name.to_string());
    }

    pub fn fail_credentials_of(&self, node_name: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_credentials_of
            .insert(node_name.to_string());
    }

    pub fn fail_containers_of(&self, node_name: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_containers_of
            .insert(node_name.to_string());
    }
}

#[async_trait]
impl SourceStore for MockSourceStore {
    async fn list_pods(&self, filter: Option<&str>) -> Result<Vec<Pod>, Report<StoreError>> {
        let state = self.state.lock().unwrap();
        if state.fail_pod_listing {
            return Err(injected("pod listing"));
        }
        Ok(state
            .pods
            .iter()
            .filter(|pod| filter.map_or(true, |name| pod.name == name))
            .cloned()
            .collect())
    }

    async fn list_nodes(&self, pod_name: &str) -> Result<Vec<SourceNode>, Report<StoreError>> {
        let state = self.state.lock().unwrap();
        if state.fail_nodes_of.contains(pod_name) {
            return Err(injected(format!("nodes of {pod_name}")));
        }
        Ok(state
            .nodes
            .iter()
            .filter(|node| node.pod_name == pod_name)
            .cloned()
            .collect())
    }

    async fn get_node_credentials(
        &self,
        pod_name: &str,
        node_name: &str,
    ) -> Result<NodeCertificates, Report<StoreError>> {
        let state = self.state.lock().unwrap();
        if state.fail_credentials_of.contains(node_name) {
            return Err(injected(format!("credentials of {node_name}")));
        }
        Ok(state
            .credentials
            .get(&(pod_name.to_string(), node_name.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn list_containers_on_node(
        &self,
        node_name: &str,
    ) -> Result<Vec<Container>, Report<StoreError>> {
        let state = self.state.lock().unwrap();
        if state.fail_containers_of.contains(node_name) {
            return Err(injected(format!("containers of {node_name}")));
        }
        Ok(state
            .containers
            .iter()
            .filter(|container| container.node_name == node_name)
            .cloned()
            .collect())
    }

    async fn list_all_containers(
        &self,
        filter: &ContainerFilter,
    ) -> Result<Vec<Container>, Report<StoreError>> {
        let state = self.state.lock().unwrap();
        if state.fail_container_listing {
            return Err(injected("container listing"));
        }
        Ok(state
            .containers
            .iter()
            .filter(|container| filter.matches(container))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct DestinationState {
    pods: BTreeMap<String, Pod>,
    nodes: BTreeMap<String, Node>,
    containers: Vec<Container>,
    fail_pods: HashSet<String>,
    fail_nodes: HashSet<String>,
    fail_node_updates: HashSet<String>,
    fail_containers: HashSet<String>,
    /// Container writes that arrived while their node was missing
    orphan_writes: Vec<String>,
    operations: Vec<String>,
}

/// Mock successor store
#[derive(Clone, Default)]
pub struct MockDestinationStore {
    state: Arc<Mutex<DestinationState>>,
}

impl MockDestinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a pod as if a previous run had created it
    pub fn insert_pod(&self, pod: Pod) {
        self.state
            .lock()
            .unwrap()
            .pods
            .insert(pod.name.clone(), pod);
    }

    /// Seed a node as if a previous run had created it
    pub fn insert_node(&self, node: Node) {
        self.state
            .lock()
            .unwrap()
            .nodes
            .insert(node.name.clone(), node);
    }

    pub fn fail_pod(&self, name: &str) {
        self.state.lock().unwrap().fail_pods.insert(name.to_string());
    }

    /// Make creation of the named node fail
    pub fn fail_node(&self, name: &str) {
        self.state.lock().unwrap().fail_nodes.insert(name.to_string());
    }

    pub fn fail_node_update(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_node_updates
            .insert(name.to_string());
    }

    pub fn fail_container(&self, id: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_containers
            .insert(id.to_string());
    }

    pub fn pods(&self) -> Vec<Pod> {
        self.state.lock().unwrap().pods.values().cloned().collect()
    }

    pub fn node(&self, name: &str) -> Option<Node> {
        self.state.lock().unwrap().nodes.get(name).cloned()
    }

    pub fn node_names(&self) -> Vec<String> {
        self.state.lock().unwrap().nodes.keys().cloned().collect()
    }

    pub fn containers(&self) -> Vec<Container> {
        self.state.lock().unwrap().containers.clone()
    }

    pub fn containers_on(&self, node_name: &str) -> Vec<Container> {
        self.state
            .lock()
            .unwrap()
            .containers
            .iter()
            .filter(|container| container.node_name == node_name)
            .cloned()
            .collect()
    }

    pub fn orphan_writes(&self) -> Vec<String> {
        self.state.lock().unwrap().orphan_writes.clone()
    }

    /// Every successful mutation in the order it was applied
    pub fn operations(&self) -> Vec<String> {
        self.state.lock().unwrap().operations.clone()
    }
}

#[async_trait]
impl DestinationStore for MockDestinationStore {
    async fn get_pod(&self, name: &str) -> Result<Option<Pod>, Report<StoreError>> {
        let state = self.state.lock().unwrap();
        if state.fail_pods.contains(name) {
            return Err(injected(format!("pod {name}")));
        }
        Ok(state.pods.get(name).cloned())
    }

    async fn create_pod(
        &self,
        name: &str,
        favor: &str,
        desc: &str,
    ) -> Result<Pod, Report<StoreError>> {
        let mut state = self.state.lock().unwrap();
        if state.fail_pods.contains(name) {
            return Err(injected(format!("pod {name}")));
        }
        if state.pods.contains_key(name) {
            return Err(Report::new(StoreError::AlreadyExists {
                key: name.to_string(),
            }));
        }
        let pod = Pod {
            name: name.to_string(),
            favor: favor.to_string(),
            desc: desc.to_string(),
        };
        state.pods.insert(name.to_string(), pod.clone());
        state.operations.push(format!("create_pod {name}"));
        Ok(pod)
    }

    async fn delete_node(&self, node_name: &str) -> Result<(), Report<StoreError>> {
        let mut state = self.state.lock().unwrap();
        state
            .containers
            .retain(|container| container.node_name != node_name);
        if state.nodes.remove(node_name).is_some() {
            state.operations.push(format!("delete_node {node_name}"));
        }
        Ok(())
    }

    async fn create_node(&self, spec: NodeSpec) -> Result<Node, Report<StoreError>> {
        let mut state = self.state.lock().unwrap();
        if state.fail_nodes.contains(&spec.name) {
            return Err(injected(format!("node {}", spec.name)));
        }
        if state.nodes.contains_key(&spec.name) {
            return Err(Report::new(StoreError::AlreadyExists { key: spec.name }));
        }
        let cpu = CpuMap::with_uniform_shares(spec.cpu_count, spec.share_base);
        let node = Node {
            name: spec.name,
            endpoint: spec.endpoint,
            pod_name: spec.pod_name,
            init_cpu: cpu.clone(),
            cpu,
            share_base: spec.share_base,
            memory_capacity: spec.memory_capacity,
            labels: spec.labels,
            certificates: spec.certificates,
        };
        state.operations.push(format!("create_node {}", node.name));
        state.nodes.insert(node.name.clone(), node.clone());
        Ok(node)
    }

    async fn update_node_resources(&self, node: &Node) -> Result<(), Report<StoreError>> {
        let mut state = self.state.lock().unwrap();
        if state.fail_node_updates.contains(&node.name) {
            return Err(injected(format!("node {} update", node.name)));
        }
        let Some(stored) = state.nodes.get_mut(&node.name) else {
            return Err(Report::new(StoreError::NotFound {
                key: node.name.clone(),
            }));
        };
        stored.cpu = node.cpu.clone();
        stored.memory_capacity = node.memory_capacity;
        state.operations.push(format!("update_node {}", node.name));
        Ok(())
    }

    async fn create_container(&self, container: &Container) -> Result<(), Report<StoreError>> {
        let mut state = self.state.lock().unwrap();
        if state.fail_containers.contains(&container.id) {
            return Err(injected(format!("container {}", container.id)));
        }
        if !state.nodes.contains_key(&container.node_name) {
            state.orphan_writes.push(container.id.clone());
        }
        state.containers.push(container.clone());
        state
            .operations
            .push(format!("create_container {}", container.id));
        Ok(())
    }
}
