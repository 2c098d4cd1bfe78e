use api_types::AvailableCapacity;
use api_types::TotalCapacity;
use serde::Serialize;

/// How one node's memory was converted between the two schemas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeReconciliation {
    pub pod: String,
    pub node: String,
    /// Memory left on the node according to the legacy store
    pub available: AvailableCapacity,
    /// Memory held by containers live on the node
    pub reserved: u64,
    /// Memory written to the successor store
    pub total: TotalCapacity,
    /// Size of the CPU pool carried over
    pub cpu_count: usize,
}

/// Outcome of a migration run.
///
/// A run always completes; this records what was skipped along the way.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub pods_migrated: usize,
    /// Pods whose record or node listing failed; none of their nodes were touched.
    ///
    /// Nodes of a pod whose record failed are also counted in `nodes_skipped`. Nodes
    /// of a pod whose node listing failed are unknown and counted nowhere.
    pub pods_skipped: usize,
    pub nodes_migrated: usize,
    pub nodes_skipped: usize,
    pub containers_migrated: usize,
    /// Container writes rejected by the destination
    pub containers_failed: usize,
    /// Containers not written because their node is not part of this run
    pub containers_orphaned: usize,
    /// Set when the pod listing failed and no pod was migrated
    pub pod_listing_failed: bool,
    /// Set when the cluster-wide container listing itself failed
    pub container_listing_failed: bool,
    pub nodes: Vec<NodeReconciliation>,
}

impl MigrationReport {
    /// True when nothing was skipped or failed.
    pub fn is_clean(&self) -> bool {
        self.pods_skipped == 0
            && self.nodes_skipped == 0
            && self.containers_failed == 0
            && self.containers_orphaned == 0
            && !self.pod_listing_failed
            && !self.container_listing_failed
    }
}
