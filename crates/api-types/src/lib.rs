//! Shared cluster metadata types
//!
//! This crate contains the data model shared by the legacy and successor store
//! adapters and the migration driver: pods, nodes, containers, the CPU share map
//! and the two memory capacity quantities.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Memory on a node not reserved by any container.
///
/// This is what the legacy schema stores in a node's `memcap` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AvailableCapacity(pub u64);

/// Full physical memory of a node, independent of current reservations.
///
/// This is what the successor schema stores in a node's `memcap` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TotalCapacity(pub u64);

impl fmt::Display for AvailableCapacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TotalCapacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// CPU resource pool of a node: CPU id to available shares.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CpuMap(BTreeMap<String, u32>);

impl CpuMap {
    /// Build a pool of `count` CPUs numbered from zero, each with `share_base` shares.
    pub fn with_uniform_shares(count: usize, share_base: u32) -> Self {
        Self((0..count).map(|id| (id.to_string(), share_base)).collect())
    }

    /// Number of CPUs in the pool
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sum of shares across all CPUs.
    pub fn total_shares(&self) -> u64 {
        self.0.values().map(|&shares| u64::from(shares)).sum()
    }

    pub fn get(&self, cpu: &str) -> Option<u32> {
        self.0.get(cpu).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.0.iter().map(|(id, shares)| (id.as_str(), *shares))
    }

    /// CPU ids in ascending key order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl From<BTreeMap<String, u32>> for CpuMap {
    fn from(map: BTreeMap<String, u32>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>> FromIterator<(K, u32)> for CpuMap {
    fn from_iter<I: IntoIterator<Item = (K, u32)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// A named grouping of nodes sharing a scheduling favor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    /// Pod name, unique and immutable once created
    pub name: String,
    /// Scheduling affinity tag
    pub favor: String,
    /// Free text description
    pub desc: String,
}

/// Access credentials of a node, carried as opaque bytes.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct NodeCertificates {
    pub authority: Vec<u8>,
    pub certificate: Vec<u8>,
    pub key: Vec<u8>,
}

impl NodeCertificates {
    pub fn is_empty(&self) -> bool {
        self.authority.is_empty() && self.certificate.is_empty() && self.key.is_empty()
    }
}

// Key material must never end up in logs.
impl fmt::Debug for NodeCertificates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeCertificates")
            .field("authority", &format_args!("<{} bytes>", self.authority.len()))
            .field("certificate", &format_args!("<{} bytes>", self.certificate.len()))
            .field("key", &format_args!("<{} bytes>", self.key.len()))
            .finish()
    }
}

/// A node as recorded by the legacy store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceNode {
    pub name: String,
    pub endpoint: String,
    pub pod_name: String,
    /// Full CPU pool declared for the node
    pub cpu: CpuMap,
    /// Memory left after all live container reservations
    pub available_memory: AvailableCapacity,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// A node as recorded by the successor store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Node name, unique across the cluster
    pub name: String,
    pub endpoint: String,
    /// Owning pod
    pub pod_name: String,
    /// Current CPU pool
    pub cpu: CpuMap,
    /// CPU pool allocated when the node was created
    pub init_cpu: CpuMap,
    /// Shares per whole CPU
    pub share_base: u32,
    /// Total physical memory
    pub memory_capacity: TotalCapacity,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(skip)]
    pub certificates: NodeCertificates,
}

/// A scheduled workload occupying part of a node's CPU and memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    /// Opaque id assigned by the legacy store
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub pod_name: String,
    pub node_name: String,
    /// CPU shares reserved on the node
    #[serde(default)]
    pub cpu: CpuMap,
    /// Memory reserved on the node, in bytes
    pub memory: u64,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Selection criteria for a cluster-wide container listing.
///
/// Empty criteria match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerFilter {
    pub pod_name: Option<String>,
    pub node_name: Option<String>,
    /// Every entry must be present on the container with the same value
    pub labels: BTreeMap<String, String>,
}

impl ContainerFilter {
    /// Filter matching every container.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_pod(pod_name: impl Into<String>) -> Self {
        Self {
            pod_name: Some(pod_name.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, container: &Container) -> bool {
        let pod_matches = self
            .pod_name
            .as_deref()
            .map_or(true, |pod| pod.is_empty() || pod == container.pod_name);
        let node_matches = self
            .node_name
            .as_deref()
            .map_or(true, |node| node.is_empty() || node == container.node_name);
        let labels_match = self
            .labels
            .iter()
            .all(|(key, value)| container.labels.get(key) == Some(value));

        pod_matches && node_matches && labels_match
    }
}
