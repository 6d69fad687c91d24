pub mod backup;
pub mod coordinator;
pub mod hasher;

pub use backup::{backup_file_name, is_backup_name, is_backup_of, rotate_backups};
pub use coordinator::{CycleReport, SyncCoordinator};
pub use hasher::{hash_bytes, hash_file, hash_file_blocking};
