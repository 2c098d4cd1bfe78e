pub mod etcd;
pub mod kv;
pub mod legacy_store;
mod records;
pub mod successor_store;

pub use etcd::EtcdGatewayClient;
pub use kv::KvStore;
pub use kv::MemoryKv;
pub use legacy_store::LegacyStore;
pub use successor_store::SuccessorStore;
