//! Write side: the successor key layout
//!
//! ```text
//! {prefix}/pod/info/{pod}                       pod record
//! {prefix}/node/{node}                          node record, memcap is total memory
//! {prefix}/node/{pod}:pod/{node}                pod-scoped copy of the node record
//! {prefix}/node/{node}:{ca,cert,key}            credentials
//! {prefix}/containers/{id}                      container record
//! {prefix}/node/{node}:containers/{id}          node-scoped copy of the container
//! ```

use std::collections::BTreeMap;

use api_types::Container;
use api_types::CpuMap;
use api_types::Node;
use api_types::NodeCertificates;
use api_types::Pod;
use api_types::TotalCapacity;
use async_trait::async_trait;
use error_stack::Report;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::instrument;

use super::kv::decode_json;
use super::kv::encode_json;
use super::kv::KvStore;
use super::records::normalize_prefix;
use super::records::ContainerRecord;
use super::records::PodRecord;
use crate::domain::errors::StoreError;
use crate::domain::traits::DestinationStore;
use crate::domain::traits::NodeSpec;

/// Key builders for the successor layout.
pub mod keys {
    pub fn pod_info(prefix: &str, pod: &str) -> String {
        format!("{prefix}/pod/info/{pod}")
    }

    pub fn node(prefix: &str, node: &str) -> String {
        format!("{prefix}/node/{node}")
    }

    pub fn pod_nodes(prefix: &str, pod: &str) -> String {
        format!("{prefix}/node/{pod}:pod/")
    }

    pub fn pod_node(prefix: &str, pod: &str, node: &str) -> String {
        format!("{prefix}/node/{pod}:pod/{node}")
    }

    /// `kind` is one of `ca`, `cert` or `key`.
    pub fn node_cert(prefix: &str, node: &str, kind: &str) -> String {
        format!("{prefix}/node/{node}:{kind}")
    }

    pub fn container(prefix: &str, id: &str) -> String {
        format!("{prefix}/containers/{id}")
    }

    pub fn node_containers(prefix: &str, node: &str) -> String {
        format!("{prefix}/node/{node}:containers/")
    }

    pub fn node_container(prefix: &str, node: &str, id: &str) -> String {
        format!("{prefix}/node/{node}:containers/{id}")
    }
}

const CERT_KINDS: [&str; 3] = ["ca", "cert", "key"];

#[derive(Debug, Serialize, Deserialize)]
struct SuccessorNodeRecord {
    name: String,
    endpoint: String,
    podname: String,
    cpu: CpuMap,
    init_cpu: CpuMap,
    share_base: u32,
    memcap: TotalCapacity,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

impl SuccessorNodeRecord {
    fn into_node(self, certificates: NodeCertificates) -> Node {
        Node {
            name: self.name,
            endpoint: self.endpoint,
            pod_name: self.podname,
            cpu: self.cpu,
            init_cpu: self.init_cpu,
            share_base: self.share_base,
            memory_capacity: self.memcap,
            labels: self.labels,
            certificates,
        }
    }
}

impl From<&Node> for SuccessorNodeRecord {
    fn from(node: &Node) -> Self {
        SuccessorNodeRecord {
            name: node.name.clone(),
            endpoint: node.endpoint.clone(),
            podname: node.pod_name.clone(),
            cpu: node.cpu.clone(),
            init_cpu: node.init_cpu.clone(),
            share_base: node.share_base,
            memcap: node.memory_capacity,
            labels: node.labels.clone(),
        }
    }
}

/// [`DestinationStore`] over a key-value store holding the successor layout.
pub struct SuccessorStore<K> {
    kv: K,
    prefix: String,
}

impl<K: KvStore> SuccessorStore<K> {
    pub fn new(kv: K, prefix: &str) -> Self {
        Self {
            kv,
            prefix: normalize_prefix(prefix),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    async fn read_node_record(
        &self,
        node_name: &str,
    ) -> Result<Option<SuccessorNodeRecord>, Report<StoreError>> {
        let key = keys::node(&self.prefix, node_name);
        match self.kv.get(&key).await? {
            Some(bytes) => Ok(Some(decode_json(&key, &bytes)?)),
            None => Ok(None),
        }
    }

    async fn write_node_record(&self, node: &Node) -> Result<(), Report<StoreError>> {
        let key = keys::node(&self.prefix, &node.name);
        let bytes = encode_json(&key, &SuccessorNodeRecord::from(node))?;
        self.kv.put(&key, bytes.clone()).await?;
        self.kv
            .put(&keys::pod_node(&self.prefix, &node.pod_name, &node.name), bytes)
            .await
    }

    async fn read_certificates(&self, node_name: &str) -> Result<NodeCertificates, Report<StoreError>> {
        let cert = |kind| keys::node_cert(&self.prefix, node_name, kind);
        Ok(NodeCertificates {
            authority: self.kv.get(&cert("ca")).await?.unwrap_or_default(),
            certificate: self.kv.get(&cert("cert")).await?.unwrap_or_default(),
            key: self.kv.get(&cert("key")).await?.unwrap_or_default(),
        })
    }

    async fn write_certificates(
        &self,
        node_name: &str,
        certs: &NodeCertificates,
    ) -> Result<(), Report<StoreError>> {
        let material = [&certs.authority, &certs.certificate, &certs.key];
        for (kind, bytes) in CERT_KINDS.into_iter().zip(material) {
            if bytes.is_empty() {
                continue;
            }
            self.kv
                .put(&keys::node_cert(&self.prefix, node_name, kind), bytes.clone())
                .await?;
        }
        Ok(())
    }

    /// Read a node, credentials included.
    pub async fn get_node(&self, node_name: &str) -> Result<Option<Node>, Report<StoreError>> {
        let Some(record) = self.read_node_record(node_name).await? else {
            return Ok(None);
        };
        let certificates = self.read_certificates(node_name).await?;
        Ok(Some(record.into_node(certificates)))
    }

    /// Nodes registered under a pod, without credentials.
    pub async fn list_pod_nodes(&self, pod_name: &str) -> Result<Vec<Node>, Report<StoreError>> {
        self.kv
            .get_prefix(&keys::pod_nodes(&self.prefix, pod_name))
            .await?
            .into_iter()
            .map(|(key, bytes)| -> Result<Node, Report<StoreError>> {
                let record: SuccessorNodeRecord = decode_json(&key, &bytes)?;
                Ok(record.into_node(NodeCertificates::default()))
            })
            .collect()
    }

    /// Containers indexed under a node.
    pub async fn list_node_containers(
        &self,
        node_name: &str,
    ) -> Result<Vec<Container>, Report<StoreError>> {
        self.kv
            .get_prefix(&keys::node_containers(&self.prefix, node_name))
            .await?
            .into_iter()
            .map(|(key, bytes)| -> Result<Container, Report<StoreError>> {
                Ok(decode_json::<ContainerRecord>(&key, &bytes)?.into())
            })
            .collect()
    }
}

#[async_trait]
impl<K: KvStore> DestinationStore for SuccessorStore<K> {
    async fn get_pod(&self, name: &str) -> Result<Option<Pod>, Report<StoreError>> {
        let key = keys::pod_info(&self.prefix, name);
        match self.kv.get(&key).await? {
            Some(bytes) => Ok(Some(decode_json::<PodRecord>(&key, &bytes)?.into())),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn create_pod(
        &self,
        name: &str,
        favor: &str,
        desc: &str,
    ) -> Result<Pod, Report<StoreError>> {
        let pod = Pod {
            name: name.to_string(),
            favor: favor.to_string(),
            desc: desc.to_string(),
        };
        let key = keys::pod_info(&self.prefix, name);
        let bytes = encode_json(&key, &PodRecord::from(&pod))?;
        if !self.kv.put_if_absent(&key, bytes).await? {
            return Err(Report::new(StoreError::AlreadyExists { key }));
        }
        Ok(pod)
    }

    #[instrument(skip(self))]
    async fn delete_node(&self, node_name: &str) -> Result<(), Report<StoreError>> {
        // A recreated node starts without reservations.
        let index = keys::node_containers(&self.prefix, node_name);
        for (key, _) in self.kv.get_prefix(&index).await? {
            if let Some(id) = key.strip_prefix(&index) {
                self.kv.delete(&keys::container(&self.prefix, id)).await?;
            }
            self.kv.delete(&key).await?;
        }

        let Some(record) = self.read_node_record(node_name).await? else {
            debug!(node = node_name, "node absent, nothing to delete");
            return Ok(());
        };

        self.kv.delete(&keys::node(&self.prefix, node_name)).await?;
        self.kv
            .delete(&keys::pod_node(&self.prefix, &record.podname, node_name))
            .await?;
        for kind in CERT_KINDS {
            self.kv
                .delete(&keys::node_cert(&self.prefix, node_name, kind))
                .await?;
        }
        Ok(())
    }

    #[instrument(skip(self, spec), fields(node = %spec.name, pod = %spec.pod_name))]
    async fn create_node(&self, spec: NodeSpec) -> Result<Node, Report<StoreError>> {
        let pod_key = keys::pod_info(&self.prefix, &spec.pod_name);
        if self.kv.get(&pod_key).await?.is_none() {
            return Err(Report::new(StoreError::NotFound { key: pod_key }));
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

        let key = keys::node(&self.prefix, &node.name);
        let bytes = encode_json(&key, &SuccessorNodeRecord::from(&node))?;
        if !self.kv.put_if_absent(&key, bytes.clone()).await? {
            return Err(Report::new(StoreError::AlreadyExists { key }));
        }
        self.kv
            .put(&keys::pod_node(&self.prefix, &node.pod_name, &node.name), bytes)
            .await?;
        self.write_certificates(&node.name, &node.certificates)
            .await?;

        Ok(node)
    }

    #[instrument(skip(self, node), fields(node = %node.name))]
    async fn update_node_resources(&self, node: &Node) -> Result<(), Report<StoreError>> {
        if self.read_node_record(&node.name).await?.is_none() {
            return Err(Report::new(StoreError::NotFound {
                key: keys::node(&self.prefix, &node.name),
            }));
        }
        self.write_node_record(node).await
    }

    async fn create_container(&self, container: &Container) -> Result<(), Report<StoreError>> {
        let key = keys::container(&self.prefix, &container.id);
        let bytes = encode_json(&key, &ContainerRecord::from(container))?;
        self.kv.put(&key, bytes.clone()).await?;
        self.kv
            .put(
                &keys::node_container(&self.prefix, &container.node_name, &container.id),
                bytes,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::infrastructure::kv::MemoryKv;

    const PREFIX: &str = "/eru";

    fn spec(name: &str, pod: &str) -> NodeSpec {
        NodeSpec {
            name: name.to_string(),
            endpoint: format!("tcp://{name}:2376"),
            pod_name: pod.to_string(),
            certificates: NodeCertificates {
                authority: b"CA".to_vec(),
                certificate: b"CERT".to_vec(),
                key: Vec::new(),
            },
            cpu_count: 4,
            share_base: 100,
            memory_capacity: TotalCapacity(1500),
            labels: BTreeMap::new(),
        }
    }

    async fn store_with_pod() -> (Arc<MemoryKv>, SuccessorStore<Arc<MemoryKv>>) {
        let kv = Arc::new(MemoryKv::new());
        let store = SuccessorStore::new(kv.clone(), PREFIX);
        store
            .create_pod("prod", "MEM", "production")
            .await
            .expect("pod should be created");
        (kv, store)
    }

    #[test(tokio::test)]
    async fn second_pod_create_is_rejected() {
        let (_, store) = store_with_pod().await;

        let err = store
            .create_pod("prod", "CPU", "other")
            .await
            .expect_err("duplicate pod should be rejected");

        assert!(matches!(
            err.current_context(),
            StoreError::AlreadyExists { .. }
        ));
        let pod = store
            .get_pod("prod")
            .await
            .expect("read should succeed")
            .expect("pod should exist");
        assert_eq!(pod.favor, "MEM");
    }

    #[test(tokio::test)]
    async fn created_node_has_uniform_pool_and_index_entries() {
        let (kv, store) = store_with_pod().await;

        let node = store
            .create_node(spec("n1", "prod"))
            .await
            .expect("node should be created");

        assert_eq!(node.cpu, CpuMap::with_uniform_shares(4, 100));
        assert_eq!(node.init_cpu, node.cpu);
        assert_eq!(
            kv.keys().await,
            vec![
                "/eru/node/n1".to_string(),
                "/eru/node/n1:ca".to_string(),
                "/eru/node/n1:cert".to_string(),
                "/eru/node/prod:pod/n1".to_string(),
                "/eru/pod/info/prod".to_string(),
            ]
        );

        let stored = store
            .get_node("n1")
            .await
            .expect("read should succeed")
            .expect("node should exist");
        assert_eq!(stored.memory_capacity, TotalCapacity(1500));
        assert_eq!(stored.certificates.certificate, b"CERT".to_vec());
        assert!(stored.certificates.key.is_empty());
    }

    #[test(tokio::test)]
    async fn node_requires_existing_pod() {
        let kv = Arc::new(MemoryKv::new());
        let store = SuccessorStore::new(kv, PREFIX);

        let err = store
            .create_node(spec("n1", "prod"))
            .await
            .expect_err("node without pod should be rejected");

        assert!(matches!(err.current_context(), StoreError::NotFound { .. }));
    }

    #[test(tokio::test)]
    async fn delete_removes_node_index_and_credentials() {
        let (kv, store) = store_with_pod().await;
        store
            .create_node(spec("n1", "prod"))
            .await
            .expect("node should be created");

        store.delete_node("n1").await.expect("delete should succeed");
        store
            .delete_node("n1")
            .await
            .expect("second delete should succeed");

        assert_eq!(kv.keys().await, vec!["/eru/pod/info/prod".to_string()]);
    }

    #[test(tokio::test)]
    async fn delete_removes_containers_indexed_under_node() {
        let (kv, store) = store_with_pod().await;
        store
            .create_node(spec("n1", "prod"))
            .await
            .expect("node should be created");
        let on_n1 = Container {
            id: "c1".to_string(),
            name: "web".to_string(),
            pod_name: "prod".to_string(),
            node_name: "n1".to_string(),
            cpu: CpuMap::default(),
            memory: 500,
            labels: BTreeMap::new(),
        };
        let on_n2 = Container {
            id: "c2".to_string(),
            node_name: "n2".to_string(),
            ..on_n1.clone()
        };
        for container in [&on_n1, &on_n2] {
            store
                .create_container(container)
                .await
                .expect("container should be written");
        }

        store.delete_node("n1").await.expect("delete should succeed");

        assert!(store
            .list_node_containers("n1")
            .await
            .expect("listing should succeed")
            .is_empty());
        assert_eq!(
            kv.keys().await,
            vec![
                "/eru/containers/c2".to_string(),
                "/eru/node/n2:containers/c2".to_string(),
                "/eru/pod/info/prod".to_string(),
            ]
        );
    }

    #[test(tokio::test)]
    async fn resource_update_rewrites_both_node_records() {
        let (_, store) = store_with_pod().await;
        let mut node = store
            .create_node(spec("n1", "prod"))
            .await
            .expect("node should be created");

        node.cpu = [("0", 10), ("1", 10)].into_iter().collect();
        node.memory_capacity = TotalCapacity(4096);
        store
            .update_node_resources(&node)
            .await
            .expect("update should succeed");

        let stored = store
            .get_node("n1")
            .await
            .expect("read should succeed")
            .expect("node should exist");
        assert_eq!(stored.cpu.total_shares(), 20);
        assert_eq!(stored.init_cpu, CpuMap::with_uniform_shares(4, 100));
        let in_pod = store
            .list_pod_nodes("prod")
            .await
            .expect("listing should succeed");
        assert_eq!(in_pod.len(), 1);
        assert_eq!(in_pod[0].memory_capacity, TotalCapacity(4096));
    }

    #[test(tokio::test)]
    async fn updating_missing_node_fails() {
        let (_, store) = store_with_pod().await;
        let node = store
            .create_node(spec("n1", "prod"))
            .await
            .expect("node should be created");
        store.delete_node("n1").await.expect("delete should succeed");

        let err = store
            .update_node_resources(&node)
            .await
            .expect_err("update should fail");

        assert!(matches!(err.current_context(), StoreError::NotFound { .. }));
    }

    #[test(tokio::test)]
    async fn container_is_indexed_under_its_node() {
        let (_, store) = store_with_pod().await;
        let container = Container {
            id: "c1".to_string(),
            name: "web".to_string(),
            pod_name: "prod".to_string(),
            node_name: "n1".to_string(),
            cpu: [("0", 50)].into_iter().collect(),
            memory: 500,
            labels: BTreeMap::new(),
        };

        store
            .create_container(&container)
            .await
            .expect("container should be written");

        let on_node = store
            .list_node_containers("n1")
            .await
            .expect("listing should succeed");
        assert_eq!(on_node, vec![container]);
    }
}
