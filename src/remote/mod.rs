pub mod lychee;
#[cfg(test)]
pub mod memory;
pub mod session;

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

pub use lychee::LycheeClient;
pub use session::{HeaderOverrides, RequestBody, Session};

/// 获取根目录（未分类）照片时使用的相册 id
pub const UNSORTED_ID: &str = "unsorted";

/// 下载流
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// 相册节点（完整树中的一项，或相册详情中的子相册）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumNode {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SizeVariant {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub filesize: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SizeVariants {
    #[serde(default)]
    pub original: Option<SizeVariant>,
}

/// 照片
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Photo {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default)]
    pub size_variants: SizeVariants,
}

impl Photo {
    /// 原图下载地址
    pub fn original_url(&self) -> Option<&str> {
        self.size_variants.original.as_ref()?.url.as_deref()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlbumConfig {
    #[serde(default = "default_accessible")]
    pub is_accessible: bool,
}

fn default_accessible() -> bool {
    true
}

impl Default for AlbumConfig {
    fn default() -> Self {
        Self { is_accessible: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlbumResource {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub albums: Vec<AlbumNode>,
    #[serde(default)]
    pub photos: Vec<Photo>,
}

/// `GET Album` 的响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlbumPayload {
    #[serde(default)]
    pub config: AlbumConfig,
    pub resource: AlbumResource,
}

/// `GET Albums` 的响应：根目录下的相册
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopLevelAlbums {
    #[serde(default)]
    pub albums: Vec<AlbumNode>,
    /// 其他用户共享的相册，有时相册只出现在这里
    #[serde(default)]
    pub shared_albums: Vec<AlbumNode>,
}

impl TopLevelAlbums {
    pub fn all(&self) -> impl Iterator<Item = &AlbumNode> {
        self.albums.iter().chain(self.shared_albums.iter())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub albums: Vec<AlbumNode>,
    #[serde(default)]
    pub photos: Vec<Photo>,
}

/// 单个分块上传请求
#[derive(Debug, Clone)]
pub struct ChunkForm {
    /// None 表示上传到未分类
    pub album_id: Option<String>,
    pub file_name: String,
    pub data: Bytes,
    /// 从 1 开始
    pub chunk_number: u64,
    pub total_chunks: u64,
    /// 上一块响应返回的续传标识，第一块为空
    pub uuid_name: String,
    pub extension: String,
}

/// 分块上传响应
///
/// 中间块只关心 `uuid_name`/`extension`。具名字段之外的内容（例如最后一块返回的
/// 照片 `id`/`title`）保留在 `raw` 中。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkReply {
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub uuid_name: Option<String>,
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub chunk_number: Option<u64>,
    #[serde(default)]
    pub total_chunks: Option<u64>,
    #[serde(flatten)]
    pub raw: serde_json::Map<String, serde_json::Value>,
}

/// 远程相册存储接口
///
/// `album_id` 为 None 的参数表示根相册（未分类）。
#[async_trait]
pub trait AlbumApi: Send + Sync {
    /// 根目录下的相册
    async fn list_albums(&self) -> Result<TopLevelAlbums>;

    /// 相册详情（子相册 + 照片），根目录照片使用 [`UNSORTED_ID`]
    async fn get_album(&self, album_id: &str) -> Result<AlbumPayload>;

    /// 完整相册树（扁平列表）；普通用户返回 `SyncError::InsufficientPrivilege`
    async fn full_tree(&self) -> Result<Vec<AlbumNode>>;

    /// 创建相册，返回新相册 id
    async fn create_album(&self, title: &str, parent_id: Option<&str>) -> Result<String>;

    async fn delete_albums(&self, album_ids: &[String]) -> Result<()>;

    async fn move_albums(&self, target_id: Option<&str>, album_ids: &[String]) -> Result<()>;

    /// 上传一个分块
    async fn upload_chunk(&self, form: ChunkForm) -> Result<ChunkReply>;

    /// 打开照片下载流
    async fn open_download(&self, url: &str) -> Result<ByteStream>;

    async fn move_photos(&self, target_id: Option<&str>, photo_ids: &[String]) -> Result<()>;

    async fn copy_photos(&self, target_id: Option<&str>, photo_ids: &[String]) -> Result<()>;

    async fn star_photos(&self, starred: bool, photo_ids: &[String]) -> Result<()>;

    async fn rename_photo(&self, photo_id: &str, title: &str) -> Result<()>;

    async fn delete_photos(&self, photo_ids: &[String]) -> Result<()>;

    async fn search(&self, terms: &str, album_id: Option<&str>) -> Result<SearchResult>;

    /// 存储名称（用于日志）
    fn name(&self) -> &str;
}
