//! Migrates cluster metadata from the legacy etcd layout to the successor layout.
//!
//! The [`domain`] module holds the store contracts and the migration logic; the
//! [`infrastructure`] module implements those contracts over etcd.

pub mod app_builder;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use app_builder::ApplicationBuilder;
pub use domain::MigrationReport;
pub use domain::Migrator;
