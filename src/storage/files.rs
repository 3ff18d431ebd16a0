use std::path::{Path, PathBuf};

use blake3::Hasher;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};

use super::error::{StorageError, StorageResult};
use super::types::SavedFile;
use crate::permission::DirectoryConfig;

const STAGING_SUFFIX: &str = ".part";
const HASH_BUFFER: usize = 64 * 1024;

/// Files under a single storage root.
///
/// Chunked uploads are staged in a hidden `.<upload_id>_<name>.part` file next
/// to their destination so finalizing is a same-filesystem rename.
#[derive(Debug, Clone)]
pub struct StorageManager {
    root: PathBuf,
}

impl StorageManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root and every configured top-level directory.
    pub async fn ensure_directories(&self, directories: &[DirectoryConfig]) -> StorageResult<()> {
        fs::create_dir_all(&self.root).await?;
        for dir in directories {
            let path = self.root.join(&dir.path);
            fs::create_dir_all(&path).await?;
            tracing::debug!(path = %path.display(), "Storage directory ready");
        }
        Ok(())
    }

    pub fn staging_path(&self, directory: &str, upload_id: &str, filename: &str) -> PathBuf {
        self.root.join(directory).join(format!(
            ".{}_{}{}",
            upload_id,
            sanitize_filename(filename),
            STAGING_SUFFIX
        ))
    }

    pub async fn create_staging(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        File::create(path).await?;
        Ok(())
    }

    /// Write `data` at `offset`, leaving every other byte of the file as is.
    /// Rewriting a range with identical bytes is a no-op for the content.
    pub async fn write_at(&self, path: &Path, offset: u64, data: &[u8]) -> StorageResult<()> {
        let mut file = OpenOptions::new().write(true).open(path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    /// Move a fully written staging file to its final name.
    pub async fn finalize(
        &self,
        staging: &Path,
        directory: &str,
        filename: &str,
        expected_size: u64,
    ) -> StorageResult<SavedFile> {
        let actual = fs::metadata(staging).await?.len();
        if actual != expected_size {
            return Err(StorageError::SizeMismatch {
                expected: expected_size,
                actual,
            });
        }

        let (stored_name, final_path) = self.final_location(directory, filename);
        fs::rename(staging, &final_path).await?;

        let checksum = hash_file(&final_path).await?;

        Ok(SavedFile {
            path: format!("{directory}/{stored_name}"),
            filename: stored_name,
            size: actual,
            checksum,
        })
    }

    /// Store a whole file in one write.
    pub async fn save_bytes(
        &self,
        directory: &str,
        filename: &str,
        data: &[u8],
    ) -> StorageResult<SavedFile> {
        let dir_path = self.root.join(directory);
        fs::create_dir_all(&dir_path).await?;

        let (stored_name, final_path) = self.final_location(directory, filename);

        let result = async {
            let mut file = File::create(&final_path).await?;
            file.write_all(data).await?;
            file.flush().await?;
            Ok::<_, std::io::Error>(())
        }
        .await;

        if let Err(e) = result {
            if let Err(remove_err) = fs::remove_file(&final_path).await {
                tracing::error!(path = %final_path.display(), error = %remove_err, "Failed to remove partial file");
            }
            return Err(e.into());
        }

        Ok(SavedFile {
            path: format!("{directory}/{stored_name}"),
            filename: stored_name,
            size: data.len() as u64,
            checksum: blake3::hash(data).to_hex().to_string(),
        })
    }

    /// Remove a staging file; a file that is already gone is not an error.
    pub async fn discard(&self, path: &Path) -> StorageResult<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Every staging file under the given top-level directories, subdirectories
    /// included, paired with the upload id encoded in its name.
    pub async fn list_staging(
        &self,
        directories: &[DirectoryConfig],
    ) -> StorageResult<Vec<(String, PathBuf)>> {
        let mut found = Vec::new();
        let mut pending: Vec<PathBuf> = directories.iter().map(|d| self.root.join(&d.path)).collect();

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if let Some(id) = entry.file_name().to_str().and_then(staging_upload_id) {
                    found.push((id.to_string(), path));
                }
            }
        }

        Ok(found)
    }

    fn final_location(&self, directory: &str, filename: &str) -> (String, PathBuf) {
        let stored_name = format!("{}_{}", uuid::Uuid::new_v4(), sanitize_filename(filename));
        let path = self.root.join(directory).join(&stored_name);
        (stored_name, path)
    }
}

/// Reduce a client-supplied name to a single safe path component.
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .replace("..", "_")
        .replace('\0', "_");

    if base.is_empty() || base == "." {
        "file".to_string()
    } else {
        base
    }
}

/// Upload id of a `.<upload_id>_<name>.part` file name.
fn staging_upload_id(name: &str) -> Option<&str> {
    let inner = name.strip_prefix('.')?.strip_suffix(STAGING_SUFFIX)?;
    let (id, _) = inner.split_once('_')?;
    (!id.is_empty()).then_some(id)
}

/// BLAKE3 of a file's content, hex encoded.
pub async fn hash_file(path: &Path) -> StorageResult<String> {
    let mut file = File::open(path).await?;
    let mut hasher = Hasher::new();
    let mut buf = vec![0u8; HASH_BUFFER];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}
