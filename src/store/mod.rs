pub mod disk;
pub mod memory;

use crate::core::config::AppConfig;
use anyhow::Result;
use tracing::debug;

pub use disk::DiskStore;
pub use memory::MemoryStore;

/// Opens the persistent store under the configured data directory.
pub fn open(config: &AppConfig) -> Result<DiskStore> {
    let path = config.default_data_path()?.join("history");
    debug!("Using history store at {}", path.display());
    DiskStore::open(&path)
}
