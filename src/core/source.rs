use crate::core::model::ChunkRange;
use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Read-only view of the file being uploaded.
#[async_trait]
pub trait UploadSource: Send + Sync {
    fn name(&self) -> &str;
    fn mime_type(&self) -> &str;
    fn size(&self) -> u64;

    /// Returns exactly `range.len()` bytes starting at `range.start()`.
    async fn read_range(&self, range: ChunkRange) -> anyhow::Result<Bytes>;
}

pub struct FileSource {
    path: PathBuf,
    name: String,
    mime_type: String,
    size: u64,
    file: tokio::sync::Mutex<File>,
}

impl FileSource {
    pub async fn open(path: &Path, mime_type: impl Into<String>) -> anyhow::Result<Self> {
        let file = File::open(path)
            .await
            .with_context(|| format!("open {:?}", path))?;
        let size = file
            .metadata()
            .await
            .with_context(|| format!("stat {:?}", path))?
            .len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload.bin".to_string());

        Ok(Self {
            path: path.to_path_buf(),
            name,
            mime_type: mime_type.into(),
            size,
            file: tokio::sync::Mutex::new(file),
        })
    }
}

#[async_trait]
impl UploadSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn read_range(&self, range: ChunkRange) -> anyhow::Result<Bytes> {
        if range.end() > self.size {
            anyhow::bail!("range {} exceeds file size {}", range, self.size);
        }
        let mut buf = vec![0u8; range.len() as usize];
        let mut f = self.file.lock().await;
        f.seek(std::io::SeekFrom::Start(range.start())).await?;
        f.read_exact(&mut buf)
            .await
            .with_context(|| format!("read {} of {:?}", range, self.path))?;
        Ok(Bytes::from(buf))
    }
}

/// In-memory source, handy for embedding and tests.
pub struct MemorySource {
    name: String,
    mime_type: String,
    data: Bytes,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }
}

#[async_trait]
impl UploadSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_range(&self, range: ChunkRange) -> anyhow::Result<Bytes> {
        if range.end() > self.size() {
            anyhow::bail!("range {} exceeds source size {}", range, self.size());
        }
        Ok(self.data.slice(range.start() as usize..range.end() as usize))
    }
}
