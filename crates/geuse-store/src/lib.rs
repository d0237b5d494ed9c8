pub mod error;
pub mod migrate;
pub mod store;

pub use error::StoreError;
pub use migrate::{Migration, MigrationRunner, MigrationStep, V1ToV2};
pub use store::{QueryFilters, StateStore, DEFAULT_BACKUP_RETENTION};
