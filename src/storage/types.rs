use serde::{Deserialize, Serialize};

/// A file that reached its final location under the storage root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SavedFile {
    /// Stored name, `<uuid>_<sanitized original name>`.
    pub filename: String,
    /// Path relative to the storage root, `<directory>/<filename>`.
    pub path: String,
    pub size: u64,
    /// BLAKE3 of the content, hex encoded.
    pub checksum: String,
}
