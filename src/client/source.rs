use crate::chunk::ChunkRange;
use bytes::Bytes;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};

/// Bytes to upload: a file on disk or a buffer already in memory.
#[derive(Debug, Clone)]
pub enum UploadSource {
    File { path: PathBuf, name: String, size: u64 },
    Memory { name: String, data: Bytes },
}

impl UploadSource {
    pub async fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", path.display()),
            ));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;

        Ok(UploadSource::File {
            path: path.to_path_buf(),
            name,
            size: metadata.len(),
        })
    }

    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        UploadSource::Memory {
            name: name.into(),
            data: data.into(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            UploadSource::File { name, .. } | UploadSource::Memory { name, .. } => name,
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            UploadSource::File { size, .. } => *size,
            UploadSource::Memory { data, .. } => data.len() as u64,
        }
    }

    pub async fn read_range(&self, range: &ChunkRange) -> io::Result<Bytes> {
        match self {
            UploadSource::Memory { data, .. } => {
                let start = usize::try_from(range.start).map_err(invalid_range)?;
                let end = usize::try_from(range.end).map_err(invalid_range)?;
                if end > data.len() {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "range past end of buffer",
                    ));
                }
                Ok(data.slice(start..end))
            }
            UploadSource::File { path, .. } => {
                let len = usize::try_from(range.len()).map_err(invalid_range)?;
                let mut file = File::open(path).await?;
                file.seek(SeekFrom::Start(range.start)).await?;
                let mut buf = vec![0u8; len];
                file.read_exact(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
        }
    }

    pub async fn read_all(&self) -> io::Result<Bytes> {
        match self {
            UploadSource::Memory { data, .. } => Ok(data.clone()),
            UploadSource::File { path, .. } => Ok(Bytes::from(tokio::fs::read(path).await?)),
        }
    }
}

fn invalid_range(err: std::num::TryFromIntError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, err)
}
