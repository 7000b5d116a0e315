//! fnbox-state: persistence for the fnbox sandbox engine
//!
//! Holds the process-wide state the lifecycle engine shares between
//! invocations, behind injectable traits:
//!
//! - `MetricsStore`: append-only record of every finished invocation
//!   (`JsonFileMetricsStore` on disk, `MemoryMetricsStore` in memory)
//! - `PoolStore`: tags of warm pool images built at startup

mod error;
pub mod fakes;
pub mod json_store;
pub mod storage_traits;

pub use error::StorageError;
pub use fakes::{MemoryMetricsStore, MemoryPoolStore};
pub use json_store::JsonFileMetricsStore;
pub use storage_traits::{
    canonical_backend, round_duration, MetricsFilter, MetricsRecord, MetricsStore, PoolStore,
    StorageResult,
};
