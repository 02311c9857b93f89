pub mod blob;
pub mod identity;
pub mod locks;
pub mod manager;
pub mod models;
pub mod reclaimer;
pub mod repository;
pub mod validation;

pub use blob::BlobStore;
pub use identity::{generate_file_id, is_valid_file_id};
pub use locks::IdLocks;
pub use manager::{FileManager, FileManagerConfig, RecoveryReport};
pub use models::{FileDescriptor, FileRecord, FileStatus};
pub use reclaimer::{Reclaimer, ReclaimerHandle, ReclaimerState, SweepReport};
pub use repository::{FileRepository, FileRepositoryTrait};
pub use validation::{FileValidator, FileValidationConfig, ValidationError};
