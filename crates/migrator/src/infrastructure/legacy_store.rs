//! Read side: the legacy key layout
//!
//! ```text
//! {prefix}/pod/{pod}/info                       pod record
//! {prefix}/pod/{pod}/node/{node}/info           node record, memcap is available memory
//! {prefix}/pod/{pod}/node/{node}/{ca,cert,key}.pem
//! {prefix}/node/{node}/containers/{id}          per-node container index
//! {prefix}/container/{id}                       container record
//! ```

use std::collections::BTreeMap;

use api_types::AvailableCapacity;
use api_types::Container;
use api_types::ContainerFilter;
use api_types::CpuMap;
use api_types::NodeCertificates;
use api_types::Pod;
use api_types::SourceNode;
use async_trait::async_trait;
use error_stack::Report;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::instrument;

use super::kv::decode_json;
use super::kv::KvStore;
use super::records::normalize_prefix;
use super::records::ContainerRecord;
use super::records::PodRecord;
use crate::domain::errors::StoreError;
use crate::domain::traits::SourceStore;

/// Key builders for the legacy layout.
pub mod keys {
    pub fn pods(prefix: &str) -> String {
        format!("{prefix}/pod/")
    }

    pub fn pod_info(prefix: &str, pod: &str) -> String {
        format!("{prefix}/pod/{pod}/info")
    }

    pub fn pod_nodes(prefix: &str, pod: &str) -> String {
        format!("{prefix}/pod/{pod}/node/")
    }

    pub fn node_info(prefix: &str, pod: &str, node: &str) -> String {
        format!("{prefix}/pod/{pod}/node/{node}/info")
    }

    /// `kind` is one of `ca`, `cert` or `key`.
    pub fn node_pem(prefix: &str, pod: &str, node: &str, kind: &str) -> String {
        format!("{prefix}/pod/{pod}/node/{node}/{kind}.pem")
    }

    pub fn node_containers(prefix: &str, node: &str) -> String {
        format!("{prefix}/node/{node}/containers/")
    }

    pub fn node_container(prefix: &str, node: &str, id: &str) -> String {
        format!("{prefix}/node/{node}/containers/{id}")
    }

    pub fn containers(prefix: &str) -> String {
        format!("{prefix}/container/")
    }

    pub fn container(prefix: &str, id: &str) -> String {
        format!("{prefix}/container/{id}")
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LegacyNodeRecord {
    name: String,
    endpoint: String,
    podname: String,
    #[serde(default)]
    cpu: CpuMap,
    memcap: AvailableCapacity,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

impl From<LegacyNodeRecord> for SourceNode {
    fn from(record: LegacyNodeRecord) -> Self {
        SourceNode {
            name: record.name,
            endpoint: record.endpoint,
            pod_name: record.podname,
            cpu: record.cpu,
            available_memory: record.memcap,
            labels: record.labels,
        }
    }
}

/// [`SourceStore`] over a key-value store holding the legacy layout.
pub struct LegacyStore<K> {
    kv: K,
    prefix: String,
}

impl<K: KvStore> LegacyStore<K> {
    pub fn new(kv: K, prefix: &str) -> Self {
        Self {
            kv,
            prefix: normalize_prefix(prefix),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    async fn read_pod(&self, name: &str) -> Result<Option<Pod>, Report<StoreError>> {
        let key = keys::pod_info(&self.prefix, name);
        match self.kv.get(&key).await? {
            Some(bytes) => Ok(Some(decode_json::<PodRecord>(&key, &bytes)?.into())),
            None => Ok(None),
        }
    }

    async fn read_containers(&self, prefix: &str) -> Result<Vec<Container>, Report<StoreError>> {
        self.kv
            .get_prefix(prefix)
            .await?
            .into_iter()
            .map(|(key, bytes)| -> Result<Container, Report<StoreError>> {
                Ok(decode_json::<ContainerRecord>(&key, &bytes)?.into())
            })
            .collect()
    }

    async fn read_pem(&self, key: String) -> Result<Vec<u8>, Report<StoreError>> {
        Ok(self.kv.get(&key).await?.unwrap_or_default())
    }
}

#[async_trait]
impl<K: KvStore> SourceStore for LegacyStore<K> {
    #[instrument(skip(self))]
    async fn list_pods(&self, filter: Option<&str>) -> Result<Vec<Pod>, Report<StoreError>> {
        if let Some(name) = filter {
            return Ok(self.read_pod(name).await?.into_iter().collect());
        }

        let root = keys::pods(&self.prefix);
        let mut pods = Vec::new();
        for (key, bytes) in self.kv.get_prefix(&root).await? {
            // Only `{root}{pod}/info`; node records share the prefix.
            let Some(rest) = key.strip_prefix(&root) else {
                continue;
            };
            match rest.split_once('/') {
                Some((_, "info")) => pods.push(decode_json::<PodRecord>(&key, &bytes)?.into()),
                _ => continue,
            }
        }
        debug!(count = pods.len(), "listed legacy pods");
        Ok(pods)
    }

    #[instrument(skip(self))]
    async fn list_nodes(&self, pod_name: &str) -> Result<Vec<SourceNode>, Report<StoreError>> {
        let root = keys::pod_nodes(&self.prefix, pod_name);
        let mut nodes = Vec::new();
        for (key, bytes) in self.kv.get_prefix(&root).await? {
            let Some(rest) = key.strip_prefix(&root) else {
                continue;
            };
            if let Some((_, "info")) = rest.split_once('/') {
                nodes.push(decode_json::<LegacyNodeRecord>(&key, &bytes)?.into());
            }
        }
        Ok(nodes)
    }

    async fn get_node_credentials(
        &self,
        pod_name: &str,
        node_name: &str,
    ) -> Result<NodeCertificates, Report<StoreError>> {
        let pem = |kind| keys::node_pem(&self.prefix, pod_name, node_name, kind);
        Ok(NodeCertificates {
            authority: self.read_pem(pem("ca")).await?,
            certificate: self.read_pem(pem("cert")).await?,
            key: self.read_pem(pem("key")).await?,
        })
    }

    async fn list_containers_on_node(
        &self,
        node_name: &str,
    ) -> Result<Vec<Container>, Report<StoreError>> {
        self.read_containers(&keys::node_containers(&self.prefix, node_name))
            .await
    }

    #[instrument(skip(self))]
    async fn list_all_containers(
        &self,
        filter: &ContainerFilter,
    ) -> Result<Vec<Container>, Report<StoreError>> {
        let containers = self
            .read_containers(&keys::containers(&self.prefix))
            .await?;
        Ok(containers
            .into_iter()
            .filter(|container| filter.matches(container))
            .collect())
    }
}
