use core::error::Error;

/// Errors raised by a store adapter or the key-value client underneath it.
#[derive(Debug, derive_more::Display)]
pub enum StoreError {
    #[display("Transport error talking to {endpoint}: {message}")]
    Transport { endpoint: String, message: String },
    #[display("Unexpected response status {status}: {message}")]
    Status { status: u16, message: String },
    #[display("Failed to decode record at {key}: {message}")]
    Decode { key: String, message: String },
    #[display("Record not found: {key}")]
    NotFound { key: String },
    #[display("Record already exists: {key}")]
    AlreadyExists { key: String },
    #[display("Authentication failed: {message}")]
    Authentication { message: String },
}

impl Error for StoreError {}

/// Errors surfaced by the migration driver.
///
/// Only [`MigrationError::Configuration`] aborts a run; the other kinds skip the
/// affected pod, node or container.
#[derive(Debug, derive_more::Display)]
pub enum MigrationError {
    #[display("Failed to read {entity} from source store")]
    SourceRead { entity: String },
    #[display("Failed to write {entity} to destination store")]
    DestinationWrite { entity: String },
    #[display("Failed to reconcile resources of node {node}")]
    Reconcile { node: String },
    #[display("Invalid configuration: {message}")]
    Configuration { message: String },
}

impl Error for MigrationError {}

/// Arithmetic failures while converting between capacity quantities.
#[derive(Debug, derive_more::Display)]
pub enum ReconcileError {
    #[display("Memory capacity overflows: {available} available plus {reserved} reserved")]
    CapacityOverflow { available: u64, reserved: u64 },
    #[display("Reserved memory overflows: {reserved} already reserved plus a {container} container")]
    ReservationOverflow { reserved: u64, container: u64 },
    #[display("Reserved memory {reserved} exceeds total capacity {total}")]
    CapacityUnderflow { total: u64, reserved: u64 },
}

impl Error for ReconcileError {}
