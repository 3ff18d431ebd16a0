pub mod error;
pub mod files;
pub mod types;

pub use error::{StorageError, StorageResult};
pub use files::{hash_file, sanitize_filename, StorageManager};
pub use types::SavedFile;
