//! Idempotent write operations against the successor store.

use api_types::Container;
use api_types::CpuMap;
use api_types::Node;
use api_types::Pod;
use api_types::TotalCapacity;
use error_stack::Report;
use error_stack::ResultExt;
use tracing::debug;
use tracing::info;
use tracing::instrument;

use super::errors::MigrationError;
use super::errors::StoreError;
use super::traits::DestinationStore;
use super::traits::NodeSpec;

/// Applies the migration's write policy on top of a [`DestinationStore`].
pub struct DestinationWriter<D> {
    store: D,
}

impl<D: DestinationStore> DestinationWriter<D> {
    pub fn new(store: D) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &D {
        &self.store
    }

    /// Create the pod unless it already exists, in which case the stored record
    /// is returned untouched.
    #[instrument(skip_all, fields(pod = %pod.name))]
    pub async fn upsert_pod(&self, pod: &Pod) -> Result<Pod, Report<MigrationError>> {
        let entity = || MigrationError::DestinationWrite {
            entity: format!("pod {}", pod.name),
        };

        if let Some(existing) = self.store.get_pod(&pod.name).await.change_context_lazy(entity)? {
            debug!("pod already present, keeping stored record");
            return Ok(existing);
        }

        match self.store.create_pod(&pod.name, &pod.favor, &pod.desc).await {
            Ok(created) => {
                info!("pod created");
                Ok(created)
            }
            Err(report) if matches!(report.current_context(), StoreError::AlreadyExists { .. }) => {
                // Lost a race with another writer between the read and the create.
                self.store
                    .get_pod(&pod.name)
                    .await
                    .change_context_lazy(entity)?
                    .ok_or_else(|| report.change_context(entity()))
            }
            Err(report) => Err(report.change_context(entity())),
        }
    }

    /// Delete any node with the same name, then create it fresh from `spec`.
    ///
    /// Stale state from a previous partial run is never merged into the new node.
    #[instrument(skip_all, fields(pod = %spec.pod_name, node = %spec.name))]
    pub async fn replace_node(&self, spec: NodeSpec) -> Result<Node, Report<MigrationError>> {
        let entity = || MigrationError::DestinationWrite {
            entity: format!("node {}", spec.name),
        };

        self.store
            .delete_node(&spec.name)
            .await
            .change_context_lazy(entity)
            .attach_printable("deleting previous node record")?;

        let entity_name = format!("node {}", spec.name);
        let node = self
            .store
            .create_node(spec)
            .await
            .change_context(MigrationError::DestinationWrite {
                entity: entity_name,
            })
            .attach_printable("creating node record")?;

        debug!(
            cpu_count = node.cpu.len(),
            memory_capacity = %node.memory_capacity,
            "node recreated"
        );
        Ok(node)
    }

    /// Overwrite the resource fields of a freshly created node with the CPU pool
    /// declared by the legacy store and the reconciled total memory.
    #[instrument(skip_all, fields(node = %node.name))]
    pub async fn patch_node_resources(
        &self,
        mut node: Node,
        cpu: CpuMap,
        memory_capacity: TotalCapacity,
    ) -> Result<Node, Report<MigrationError>> {
        node.cpu = cpu;
        node.memory_capacity = memory_capacity;

        self.store
            .update_node_resources(&node)
            .await
            .change_context_lazy(|| MigrationError::DestinationWrite {
                entity: format!("node {}", node.name),
            })
            .attach_printable("updating node resources")?;

        Ok(node)
    }

    /// Append a container. Its node must already exist in the destination.
    pub async fn add_container(&self, container: &Container) -> Result<(), Report<MigrationError>> {
        self.store
            .create_container(container)
            .await
            .change_context_lazy(|| MigrationError::DestinationWrite {
                entity: format!("container {}", container.id),
            })
    }
}
