//! 分块上传单个文件

use super::resolver::AlbumTarget;
use crate::error::{Result, SyncError};
use crate::remote::{AlbumApi, ChunkForm, ChunkReply};
use bytes::Bytes;
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

/// 续传标识，由上一块的响应给出
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkUploadState {
    pub uuid_name: String,
    pub extension: String,
    pub chunk_number: u64,
    pub total_chunks: u64,
}

impl ChunkUploadState {
    fn advance(&mut self, reply: &ChunkReply) -> Result<()> {
        match (&reply.uuid_name, &reply.extension) {
            (Some(uuid_name), Some(extension)) => {
                self.uuid_name = uuid_name.clone();
                self.extension = extension.clone();
                Ok(())
            }
            _ => Err(SyncError::remote(
                200,
                format!(
                    "分块 {}/{} 的响应缺少续传标识",
                    self.chunk_number, self.total_chunks
                ),
            )),
        }
    }
}

/// 块数量，空文件也按一块上传
pub fn chunk_count(file_size: u64, chunk_size: u64) -> u64 {
    file_size.div_ceil(chunk_size.max(1)).max(1)
}

pub struct ChunkedUploader<'a> {
    api: &'a dyn AlbumApi,
    chunk_size: u64,
}

impl<'a> ChunkedUploader<'a> {
    pub fn new(api: &'a dyn AlbumApi, chunk_size: u64) -> Self {
        Self {
            api,
            chunk_size: chunk_size.max(1),
        }
    }

    /// 顺序上传所有分块，返回最后一块的响应
    pub async fn upload(&self, album: &AlbumTarget, source: &Path) -> Result<ChunkReply> {
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("无效的文件路径: {}", source.display()),
                )
            })?;

        let mut file = File::open(source).await?;
        let file_size = file.metadata().await?.len();
        let mut state = ChunkUploadState {
            total_chunks: chunk_count(file_size, self.chunk_size),
            ..Default::default()
        };

        debug!(
            "上传 {} ({} 字节, {} 块)",
            source.display(),
            file_size,
            state.total_chunks
        );

        let mut buffer = Vec::new();
        let mut last_reply = None;
        for index in 0..state.total_chunks {
            state.chunk_number = index + 1;

            let offset = index * self.chunk_size;
            let len = self.chunk_size.min(file_size.saturating_sub(offset));
            buffer.resize(len as usize, 0);
            file.seek(SeekFrom::Start(offset)).await?;
            file.read_exact(&mut buffer).await?;

            let reply = self
                .api
                .upload_chunk(ChunkForm {
                    album_id: album.id().map(str::to_string),
                    file_name: file_name.clone(),
                    data: Bytes::copy_from_slice(&buffer),
                    chunk_number: state.chunk_number,
                    total_chunks: state.total_chunks,
                    uuid_name: state.uuid_name.clone(),
                    extension: state.extension.clone(),
                })
                .await?;

            if state.chunk_number < state.total_chunks {
                state.advance(&reply)?;
            }
            last_reply = Some(reply);
        }

        last_reply.ok_or_else(|| SyncError::remote(0, format!("{} 没有上传任何分块", file_name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::MemoryApi;
    use std::fs;
    use tempfile::TempDir;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn chunk_count_rounds_up() {
        assert_eq!(chunk_count(10 * MB, 2 * MB), 5);
        assert_eq!(chunk_count(10 * MB + 1, 2 * MB), 6);
        assert_eq!(chunk_count(1, 2 * MB), 1);
        assert_eq!(chunk_count(0, 2 * MB), 1);
    }

    #[tokio::test]
    async fn ten_megabytes_in_five_chained_chunks() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("big.jpg");
        let content: Vec<u8> = (0..10 * MB).map(|i| (i % 251) as u8).collect();
        fs::write(&source, &content).unwrap();

        let api = MemoryApi::new(true);
        let album = api.add_album("2024", None);
        let reply = ChunkedUploader::new(&api, 2 * MB)
            .upload(&AlbumTarget::Album(album.clone()), &source)
            .await
            .unwrap();

        let chunks = api.chunks();
        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks[0].uuid_name, "");
        assert_eq!(chunks[0].extension, "");
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_number, i as u64 + 1);
            assert_eq!(chunk.total_chunks, 5);
            assert_eq!(chunk.data.len() as u64, 2 * MB);
            assert_eq!(chunk.album_id.as_deref(), Some(album.as_str()));
            if i > 0 {
                assert_eq!(chunk.uuid_name, format!("uuid-1-{}", i));
                assert_eq!(chunk.extension, ".jpg");
            }
        }

        let joined: Vec<u8> = chunks.iter().flat_map(|c| c.data.to_vec()).collect();
        assert_eq!(joined, content);
        assert_eq!(reply.raw.get("title").and_then(|v| v.as_str()), Some("big"));
        assert_eq!(api.photo_titles(Some(&album)), vec!["big"]);
    }

    #[tokio::test]
    async fn empty_file_is_one_chunk_to_root() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("empty.png");
        fs::write(&source, b"").unwrap();

        let api = MemoryApi::new(true);
        ChunkedUploader::new(&api, 2 * MB)
            .upload(&AlbumTarget::Root, &source)
            .await
            .unwrap();

        let chunks = api.chunks();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].total_chunks, 1);
        assert!(chunks[0].album_id.is_none());
        assert!(chunks[0].data.is_empty());
    }

    #[tokio::test]
    async fn failing_final_chunk_is_reported() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("bad.jpg");
        fs::write(&source, b"data").unwrap();

        let api = MemoryApi::new(true);
        api.fail_upload("bad.jpg");
        let err = ChunkedUploader::new(&api, 2 * MB)
            .upload(&AlbumTarget::Root, &source)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::RemoteOperationFailed { status: 500, .. }));
    }
}
