//! Migration domain: store contracts, reconciliation, write policy and sequencing

pub mod errors;
pub mod mock;
pub mod orchestrator;
pub mod reconciler;
pub mod report;
pub mod traits;
pub mod writer;

pub use orchestrator::MigrationOptions;
pub use orchestrator::Migrator;
pub use report::MigrationReport;
pub use report::NodeReconciliation;
