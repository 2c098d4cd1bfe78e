use error_stack::Report;
use error_stack::ResultExt;

use crate::config::Settings;
use crate::domain::errors::MigrationError;
use crate::domain::MigrationOptions;
use crate::domain::Migrator;
use crate::infrastructure::EtcdGatewayClient;
use crate::infrastructure::LegacyStore;
use crate::infrastructure::SuccessorStore;

/// Migrator wired to two etcd clusters.
pub type EtcdMigrator = Migrator<LegacyStore<EtcdGatewayClient>, SuccessorStore<EtcdGatewayClient>>;

/// Builds a migrator from validated settings.
pub struct ApplicationBuilder {
    settings: Settings,
    pod_filter: Option<String>,
}

impl ApplicationBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            pod_filter: None,
        }
    }

    /// Restrict the run to one pod
    pub fn with_pod_filter(mut self, pod: Option<String>) -> Self {
        self.pod_filter = pod;
        self
    }

    /// Validate settings, connect both stores and assemble the migrator.
    ///
    /// Nothing is written to either store here.
    pub async fn build(self) -> Result<EtcdMigrator, Report<MigrationError>> {
        self.settings.validate()?;

        tracing::info!(
            source = ?self.settings.source.endpoints,
            source_prefix = %self.settings.source.prefix,
            destination = ?self.settings.destination.endpoints,
            destination_prefix = %self.settings.destination.prefix,
            "Connecting stores..."
        );

        let source_client = EtcdGatewayClient::connect(&self.settings.source)
            .await
            .change_context(MigrationError::Configuration {
                message: "cannot connect to source store".to_string(),
            })?;
        let destination_client = EtcdGatewayClient::connect(&self.settings.destination)
            .await
            .change_context(MigrationError::Configuration {
                message: "cannot connect to destination store".to_string(),
            })?;

        let options = MigrationOptions {
            share_base: self.settings.scheduler.share_base,
            pod_filter: self.pod_filter,
        };

        Ok(Migrator::new(
            LegacyStore::new(source_client, &self.settings.source.prefix),
            SuccessorStore::new(destination_client, &self.settings.destination.prefix),
            options,
        ))
    }
}
