//! Stored JSON shapes shared by both schemas
//!
//! Pods and containers are encoded identically in the legacy and successor
//! layouts; only their keys differ. Node records are schema specific and live
//! with their adapters.

use std::collections::BTreeMap;

use api_types::Container;
use api_types::CpuMap;
use api_types::Pod;
use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PodRecord {
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub favor: String,
}

impl From<PodRecord> for Pod {
    fn from(record: PodRecord) -> Self {
        Pod {
            name: record.name,
            favor: record.favor,
            desc: record.desc,
        }
    }
}

impl From<&Pod> for PodRecord {
    fn from(pod: &Pod) -> Self {
        PodRecord {
            name: pod.name.clone(),
            desc: pod.desc.clone(),
            favor: pod.favor.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ContainerRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub podname: String,
    pub nodename: String,
    #[serde(default)]
    pub cpu: CpuMap,
    #[serde(default)]
    pub memory: u64,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl From<ContainerRecord> for Container {
    fn from(record: ContainerRecord) -> Self {
        Container {
            id: record.id,
            name: record.name,
            pod_name: record.podname,
            node_name: record.nodename,
            cpu: record.cpu,
            memory: record.memory,
            labels: record.labels,
        }
    }
}

impl From<&Container> for ContainerRecord {
    fn from(container: &Container) -> Self {
        ContainerRecord {
            id: container.id.clone(),
            name: container.name.clone(),
            podname: container.pod_name.clone(),
            nodename: container.node_name.clone(),
            cpu: container.cpu.clone(),
            memory: container.memory,
            labels: container.labels.clone(),
        }
    }
}

/// Strip trailing slashes so keys can be joined with `/`.
pub(crate) fn normalize_prefix(prefix: &str) -> String {
    prefix.trim_end_matches('/').to_string()
}
