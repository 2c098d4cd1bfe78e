//! Sequences a migration: pods, then their nodes, then every container.
//!
//! Failures never abort the run. A failed pod skips its nodes, a failed node skips
//! its containers, a failed container skips only itself. Containers are written in
//! a separate pass once all nodes exist, and only onto nodes migrated by this run.

use std::collections::HashSet;

use api_types::ContainerFilter;
use api_types::Pod;
use api_types::SourceNode;
use error_stack::Report;
use error_stack::ResultExt;
use tracing::error;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use super::errors::MigrationError;
use super::reconciler;
use super::report::MigrationReport;
use super::report::NodeReconciliation;
use super::traits::DestinationStore;
use super::traits::NodeSpec;
use super::traits::SourceStore;
use super::writer::DestinationWriter;

/// Run parameters.
#[derive(Debug, Clone)]
pub struct MigrationOptions {
    /// Shares per CPU used for the destination's initial CPU pool
    pub share_base: u32,
    /// Restrict the run to a single pod
    pub pod_filter: Option<String>,
}

/// Stages of a run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Phase {
    #[display("start")]
    Start,
    #[display("pods")]
    Pods,
    #[display("containers")]
    Containers,
    #[display("done")]
    Done,
}

/// Drives a migration from a [`SourceStore`] into a [`DestinationStore`].
pub struct Migrator<S, D> {
    source: S,
    writer: DestinationWriter<D>,
    options: MigrationOptions,
}

impl<S, D> Migrator<S, D>
where
    S: SourceStore,
    D: DestinationStore,
{
    pub fn new(source: S, destination: D, options: MigrationOptions) -> Self {
        Self {
            source,
            writer: DestinationWriter::new(destination),
            options,
        }
    }

    pub fn destination(&self) -> &D {
        self.writer.store()
    }

    /// Run the migration to completion.
    ///
    /// Always returns a report; individual failures are logged and counted there.
    #[instrument(skip(self), fields(pod_filter = ?self.options.pod_filter))]
    pub async fn run(&self) -> MigrationReport {
        let mut report = MigrationReport::default();
        let mut migrated_nodes = HashSet::new();

        enter(Phase::Start);
        let pods = match self
            .source
            .list_pods(self.options.pod_filter.as_deref())
            .await
            .change_context(MigrationError::SourceRead {
                entity: "pods".to_string(),
            }) {
            Ok(pods) => pods,
            Err(e) => {
                error!("Failed to list pods, no node will be migrated: {e:?}");
                report.pod_listing_failed = true;
                Vec::new()
            }
        };
        info!(pods = pods.len(), "pods to migrate");

        enter(Phase::Pods);
        for pod in &pods {
            self.migrate_pod(pod, &mut report, &mut migrated_nodes).await;
        }

        enter(Phase::Containers);
        self.migrate_containers(&migrated_nodes, &mut report).await;

        enter(Phase::Done);
        info!(
            pods_migrated = report.pods_migrated,
            pods_skipped = report.pods_skipped,
            nodes_migrated = report.nodes_migrated,
            nodes_skipped = report.nodes_skipped,
            containers_migrated = report.containers_migrated,
            containers_failed = report.containers_failed,
            containers_orphaned = report.containers_orphaned,
            pod_listing_failed = report.pod_listing_failed,
            container_listing_failed = report.container_listing_failed,
            clean = report.is_clean(),
            "Done"
        );
        report
    }

    /// Compute how every node would be reconciled without writing anything.
    ///
    /// # Errors
    ///
    /// - [`MigrationError::SourceRead`] if the pods cannot be listed
    pub async fn plan(&self) -> Result<Vec<NodeReconciliation>, Report<MigrationError>> {
        let pods = self
            .source
            .list_pods(self.options.pod_filter.as_deref())
            .await
            .change_context(MigrationError::SourceRead {
                entity: "pods".to_string(),
            })?;

        let mut plan = Vec::new();
        for pod in &pods {
            let nodes = match self.list_nodes(&pod.name).await {
                Ok(nodes) => nodes,
                Err(e) => {
                    warn!(pod = %pod.name, "Skipping pod in plan: {e:?}");
                    continue;
                }
            };
            for node in &nodes {
                match self.reconcile_node(&pod.name, node).await {
                    Ok(record) => plan.push(record),
                    Err(e) => {
                        warn!(pod = %pod.name, node = %node.name, "Skipping node in plan: {e:?}")
                    }
                }
            }
        }
        Ok(plan)
    }

    #[instrument(skip_all, fields(pod = %pod.name))]
    async fn migrate_pod(
        &self,
        pod: &Pod,
        report: &mut MigrationReport,
        migrated_nodes: &mut HashSet<String>,
    ) {
        let stored = match self.writer.upsert_pod(pod).await {
            Ok(stored) => stored,
            Err(e) => {
                error!("Skipping pod: {e:?}");
                report.pods_skipped += 1;
                match self.list_nodes(&pod.name).await {
                    Ok(nodes) => report.nodes_skipped += nodes.len(),
                    Err(e) => warn!("Cannot count nodes of skipped pod: {e:?}"),
                }
                return;
            }
        };

        let nodes = match self.list_nodes(&stored.name).await {
            Ok(nodes) => nodes,
            Err(e) => {
                error!("Skipping nodes of pod: {e:?}");
                report.pods_skipped += 1;
                return;
            }
        };
        report.pods_migrated += 1;

        for node in &nodes {
            // Node names are cluster-wide in the successor schema; a second node
            // with the same name would delete the one written moments ago.
            if migrated_nodes.contains(&node.name) {
                warn!(node = %node.name, "node name already migrated under another pod, skipping");
                report.nodes_skipped += 1;
                continue;
            }

            match self.migrate_node(&stored, node).await {
                Ok(record) => {
                    migrated_nodes.insert(node.name.clone());
                    report.nodes_migrated += 1;
                    report.nodes.push(record);
                }
                Err(e) => {
                    error!(node = %node.name, "Skipping node: {e:?}");
                    report.nodes_skipped += 1;
                }
            }
        }
    }

    #[instrument(skip_all, fields(node = %node.name))]
    async fn migrate_node(
        &self,
        pod: &Pod,
        node: &SourceNode,
    ) -> Result<NodeReconciliation, Report<MigrationError>> {
        let certificates = self
            .source
            .get_node_credentials(&pod.name, &node.name)
            .await
            .change_context_lazy(|| MigrationError::SourceRead {
                entity: format!("credentials of node {}", node.name),
            })?;

        let record = self.reconcile_node(&pod.name, node).await?;

        let created = self
            .writer
            .replace_node(NodeSpec {
                name: node.name.clone(),
                endpoint: node.endpoint.clone(),
                pod_name: pod.name.clone(),
                certificates,
                cpu_count: node.cpu.len(),
                share_base: self.options.share_base,
                memory_capacity: record.total,
                labels: node.labels.clone(),
            })
            .await?;

        self.writer
            .patch_node_resources(created, node.cpu.clone(), record.total)
            .await?;

        info!(
            available = %record.available,
            reserved = record.reserved,
            total = %record.total,
            cpu_count = record.cpu_count,
            "node migrated"
        );
        Ok(record)
    }

    /// Read the live containers of a node and recover its total memory.
    async fn reconcile_node(
        &self,
        pod_name: &str,
        node: &SourceNode,
    ) -> Result<NodeReconciliation, Report<MigrationError>> {
        let containers = self
            .source
            .list_containers_on_node(&node.name)
            .await
            .change_context_lazy(|| MigrationError::SourceRead {
                entity: format!("containers of node {}", node.name),
            })?;

        let reconcile_error = || MigrationError::Reconcile {
            node: node.name.clone(),
        };
        let reserved =
            reconciler::reserved_memory(&containers).change_context_lazy(reconcile_error)?;
        let total = reconciler::total_with_reserved(node.available_memory, reserved)
            .change_context_lazy(reconcile_error)?;

        Ok(NodeReconciliation {
            pod: pod_name.to_string(),
            node: node.name.clone(),
            available: node.available_memory,
            reserved,
            total,
            cpu_count: node.cpu.len(),
        })
    }

    async fn list_nodes(&self, pod_name: &str) -> Result<Vec<SourceNode>, Report<MigrationError>> {
        self.source
            .list_nodes(pod_name)
            .await
            .change_context_lazy(|| MigrationError::SourceRead {
                entity: format!("nodes of pod {pod_name}"),
            })
    }

    async fn migrate_containers(
        &self,
        migrated_nodes: &HashSet<String>,
        report: &mut MigrationReport,
    ) {
        let filter = self
            .options
            .pod_filter
            .as_ref()
            .map(|pod| ContainerFilter::for_pod(pod.as_str()))
            .unwrap_or_else(ContainerFilter::all);

        let containers = match self
            .source
            .list_all_containers(&filter)
            .await
            .change_context(MigrationError::SourceRead {
                entity: "containers".to_string(),
            }) {
            Ok(containers) => containers,
            Err(e) => {
                error!("Failed to list containers, none will be migrated: {e:?}");
                report.container_listing_failed = true;
                return;
            }
        };
        info!(containers = containers.len(), "containers to migrate");

        for container in &containers {
            if !migrated_nodes.contains(&container.node_name) {
                warn!(
                    container = %container.id,
                    node = %container.node_name,
                    "node was not migrated in this run, skipping container"
                );
                report.containers_orphaned += 1;
                continue;
            }

            match self.writer.add_container(container).await {
                Ok(()) => report.containers_migrated += 1,
                Err(e) => {
                    warn!(container = %container.id, "Failed to add container: {e:?}");
                    report.containers_failed += 1;
                }
            }
        }
    }
}

fn enter(phase: Phase) {
    info!(%phase, "migration phase");
}
