//! 同步引擎 - 对外的操作入口
//!
//! 路径参数既可以是 `/a/b` 形式的标题路径，也可以是相册 id。
//! 上传/下载只负责遍历和提交任务，结果通过 [`SyncEngine::wait_tasks`] 统一取回。

use super::conflict::{CollisionGuard, SiblingTitles};
use super::resolver::{AlbumTarget, PathResolver, ResourcePath};
use super::scanner::{FileScanner, ScanConfig};
use super::transfer::{
    TaskFailure, TaskHandle, TransferContext, TransferManager, TransferReport, TransferTask,
};
use super::uploader::ChunkedUploader;
use crate::config::{ClientConfig, Credentials, TransferConfig};
use crate::error::{Result, SyncError};
use crate::remote::{
    AlbumApi, AlbumNode, ChunkReply, LycheeClient, Photo, SearchResult, UNSORTED_ID,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// 相册内容
#[derive(Debug, Clone, Default)]
pub struct AlbumListing {
    pub albums: Vec<AlbumNode>,
    pub photos: Vec<Photo>,
}

/// 尚未取回结果的一批任务
#[derive(Default)]
struct PendingBatch {
    started_at: Option<DateTime<Utc>>,
    handles: Vec<TaskHandle>,
    walk_errors: Vec<TaskFailure>,
}

/// 同步引擎
pub struct SyncEngine {
    api: Arc<dyn AlbumApi>,
    config: TransferConfig,
    scanner: FileScanner,
    guard: Arc<CollisionGuard>,
    transfers: TransferManager,
    pending: Mutex<PendingBatch>,
}

impl SyncEngine {
    /// 需要在 tokio 运行时内调用（会启动传输 worker）
    pub fn new(api: Arc<dyn AlbumApi>, config: TransferConfig, scan_config: ScanConfig) -> Self {
        let guard = Arc::new(CollisionGuard::new());
        let transfers = TransferManager::new(
            TransferContext {
                api: api.clone(),
                chunk_size: config.chunk_size(),
                guard: guard.clone(),
            },
            config.max_workers,
        );
        info!(
            "同步引擎就绪: {} ({} 个 worker)",
            api.name(),
            transfers.worker_count()
        );

        Self {
            api,
            config,
            scanner: FileScanner::new(scan_config),
            guard,
            transfers,
            pending: Mutex::new(PendingBatch::default()),
        }
    }

    /// 连接 Lychee 服务器并登录
    pub async fn connect(
        client: &ClientConfig,
        credentials: &Credentials,
        config: TransferConfig,
        scan_config: ScanConfig,
    ) -> Result<Self> {
        let lychee = LycheeClient::connect(client).await?;
        lychee.login(credentials).await?;
        Ok(Self::new(Arc::new(lychee), config, scan_config))
    }

    pub fn api(&self) -> &Arc<dyn AlbumApi> {
        &self.api
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    fn pending(&self) -> MutexGuard<'_, PendingBatch> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn submit(&self, task: TransferTask) {
        let handle = self.transfers.submit(task);
        let mut pending = self.pending();
        pending.started_at.get_or_insert_with(Utc::now);
        pending.handles.push(handle);
    }

    fn record_walk_error(&self, failure: TaskFailure) {
        warn!("遍历分支失败: {}", failure);
        let mut pending = self.pending();
        pending.started_at.get_or_insert_with(Utc::now);
        pending.walk_errors.push(failure);
    }

    /// 每个逻辑操作使用一份新的相册树快照
    async fn resolver(&self) -> Result<PathResolver> {
        PathResolver::acquire(self.api.clone()).await
    }

    // ========== 路径解析 ==========

    /// 所有匹配的相册
    pub async fn resolve_path(&self, path: &str) -> Result<Vec<AlbumTarget>> {
        self.resolver()
            .await?
            .resolve_to_ids(&ResourcePath::parse(path))
            .await
    }

    /// 唯一匹配的相册
    pub async fn resolve_unique(&self, path: &str) -> Result<AlbumTarget> {
        self.resolver()
            .await?
            .resolve_unique(&ResourcePath::parse(path))
            .await
    }

    /// 相册 id 对应的绝对路径，不存在时为空字符串
    pub async fn album_path(&self, album_id: &str) -> Result<String> {
        self.resolver().await?.id_to_path(album_id).await
    }

    // ========== 相册操作 ==========

    /// 列出相册内容；根目录包含顶层相册（含共享相册）和未分类照片
    pub async fn list_album(&self, path: &str, only_albums: bool) -> Result<AlbumListing> {
        let target = self.resolve_unique(path).await?;
        match target {
            AlbumTarget::Root => {
                let albums = self.api.list_albums().await?.all().cloned().collect();
                let photos = if only_albums {
                    Vec::new()
                } else {
                    self.api.get_album(UNSORTED_ID).await?.resource.photos
                };
                Ok(AlbumListing { albums, photos })
            }
            AlbumTarget::Album(id) => {
                let resource = self.api.get_album(&id).await?.resource;
                Ok(AlbumListing {
                    albums: resource.albums,
                    photos: if only_albums {
                        Vec::new()
                    } else {
                        resource.photos
                    },
                })
            }
        }
    }

    /// 在 `parent_path` 下创建相册，返回新相册 id
    pub async fn create_album(&self, title: &str, parent_path: &str) -> Result<String> {
        let parent = self.resolve_unique(parent_path).await?;
        let id = self.api.create_album(title, parent.id()).await?;
        info!("创建相册 {} (父相册 {}): {}", title, parent, id);
        Ok(id)
    }

    /// 先解析全部路径，任何一个无法唯一解析都不会删除；根目录会被忽略
    pub async fn delete_albums(&self, paths: &[&str]) -> Result<()> {
        let resolver = self.resolver().await?;
        let ids = resolve_album_ids(&resolver, paths).await?;
        if ids.is_empty() {
            return Ok(());
        }
        self.api.delete_albums(&ids).await?;
        info!("删除 {} 个相册", ids.len());
        Ok(())
    }

    /// 将相册移动到 `target_path` 下（根目录表示移到顶层）
    pub async fn move_albums(&self, paths: &[&str], target_path: &str) -> Result<()> {
        let resolver = self.resolver().await?;
        let target = resolver
            .resolve_unique(&ResourcePath::parse(target_path))
            .await?;
        let ids = resolve_album_ids(&resolver, paths).await?;
        if ids.is_empty() {
            return Ok(());
        }
        self.api.move_albums(target.id(), &ids).await
    }

    // ========== 照片操作 ==========

    pub async fn move_photos(&self, photo_ids: &[String], target_path: &str) -> Result<()> {
        let target = self.resolve_unique(target_path).await?;
        self.api.move_photos(target.id(), photo_ids).await
    }

    pub async fn copy_photos(&self, photo_ids: &[String], target_path: &str) -> Result<()> {
        let target = self.resolve_unique(target_path).await?;
        self.api.copy_photos(target.id(), photo_ids).await
    }

    pub async fn star_photos(&self, photo_ids: &[String], starred: bool) -> Result<()> {
        self.api.star_photos(starred, photo_ids).await
    }

    pub async fn rename_photo(&self, photo_id: &str, title: &str) -> Result<()> {
        self.api.rename_photo(photo_id, title).await
    }

    pub async fn delete_photos(&self, photo_ids: &[String]) -> Result<()> {
        self.api.delete_photos(photo_ids).await
    }

    /// 在相册内搜索，根目录表示全局搜索
    pub async fn search(&self, terms: &str, album_path: &str) -> Result<SearchResult> {
        let target = self.resolve_unique(album_path).await?;
        self.api.search(terms, target.id()).await
    }

    // ========== 上传 ==========

    /// 直接上传单个文件（不经过线程池），返回服务器响应
    pub async fn upload_photo(&self, album_path: &str, local_file: &Path) -> Result<ChunkReply> {
        let target = self.resolve_unique(album_path).await?;
        ChunkedUploader::new(self.api.as_ref(), self.config.chunk_size())
            .upload(&target, local_file)
            .await
    }

    /// 把本地目录的内容上传到相册中，子目录对应子相册（已存在则复用）
    ///
    /// 返回提交的上传任务数。
    pub async fn upload_album(
        &self,
        album_path: &str,
        local_dir: &Path,
        skip_existing: bool,
    ) -> Result<usize> {
        let target = self.resolve_unique(album_path).await?;
        self.walk_upload(target, local_dir, skip_existing).await
    }

    /// 在 `parent_path` 下找到或创建与本地目录同名的相册，再上传目录内容
    pub async fn upload_folder(
        &self,
        parent_path: &str,
        local_dir: &Path,
        skip_existing: bool,
    ) -> Result<usize> {
        let title = local_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                SyncError::Config(format!("无法确定目录名: {}", local_dir.display()))
            })?;

        let parent = self.resolve_unique(parent_path).await?;
        let existing = self.child_albums(&parent).await?;
        let target = match existing.iter().find(|a| a.title == title) {
            Some(album) => {
                debug!("复用相册 {} ({})", title, album.id);
                AlbumTarget::Album(album.id.clone())
            }
            None => AlbumTarget::Album(self.api.create_album(&title, parent.id()).await?),
        };

        self.walk_upload(target, local_dir, skip_existing).await
    }

    async fn child_albums(&self, target: &AlbumTarget) -> Result<Vec<AlbumNode>> {
        match target {
            AlbumTarget::Root => Ok(self.api.list_albums().await?.all().cloned().collect()),
            AlbumTarget::Album(id) => Ok(self.api.get_album(id).await?.resource.albums),
        }
    }

    /// 用队列代替递归；第一层失败直接返回，子分支失败记录后继续
    async fn walk_upload(
        &self,
        root: AlbumTarget,
        local_dir: &Path,
        skip_existing: bool,
    ) -> Result<usize> {
        info!("上传目录 {} -> {}", local_dir.display(), root);
        let mut worklist = VecDeque::new();
        let mut submitted = self
            .upload_level(&root, local_dir, skip_existing, &mut worklist)
            .await?;

        while let Some((target, dir)) = worklist.pop_front() {
            match self
                .upload_level(&target, &dir, skip_existing, &mut worklist)
                .await
            {
                Ok(count) => submitted += count,
                Err(e) => self.record_walk_error(TaskFailure::new(
                    format!("上传目录 {}", dir.display()),
                    e,
                )),
            }
        }

        info!("已提交 {} 个上传任务", submitted);
        Ok(submitted)
    }

    /// 处理一层目录：提交文件上传，子目录先同步创建相册再放入队列
    async fn upload_level(
        &self,
        target: &AlbumTarget,
        dir: &Path,
        skip_existing: bool,
        worklist: &mut VecDeque<(AlbumTarget, PathBuf)>,
    ) -> Result<usize> {
        let payload = self.api.get_album(target.fetch_id()).await?;
        if !payload.config.is_accessible {
            return Err(SyncError::NotAccessible(target.to_string()));
        }

        let children = match target {
            AlbumTarget::Root => self.api.list_albums().await?.all().cloned().collect(),
            AlbumTarget::Album(_) => payload.resource.albums,
        };
        let mut child_ids: HashMap<String, String> = HashMap::new();
        for child in children {
            if child_ids.contains_key(&child.title) {
                warn!("存在同名子相册 {}，使用第一个", child.title);
                continue;
            }
            child_ids.insert(child.title, child.id);
        }

        let existing_titles: HashSet<String> = if skip_existing {
            payload.resource.photos.into_iter().map(|p| p.title).collect()
        } else {
            HashSet::new()
        };

        let listing = self.scanner.read_dir(dir).await?;

        for sub_dir in listing.dirs {
            let Some(name) = sub_dir.file_name().map(|n| n.to_string_lossy().to_string()) else {
                continue;
            };
            let child = match child_ids.get(&name) {
                Some(id) => id.clone(),
                None => match self.api.create_album(&name, target.id()).await {
                    Ok(id) => {
                        debug!("创建相册 {}: {}", name, id);
                        id
                    }
                    Err(e) => {
                        self.record_walk_error(TaskFailure::new(
                            format!("创建相册 {}", name),
                            e,
                        ));
                        continue;
                    }
                },
            };
            worklist.push_back((AlbumTarget::Album(child), sub_dir));
        }

        let mut submitted = 0;
        for file in listing.files {
            if skip_existing
                && (existing_titles.contains(&file.name) || existing_titles.contains(file.stem()))
            {
                debug!("跳过已存在的照片: {}", file.path.display());
                continue;
            }
            self.submit(TransferTask::Upload {
                source: file.path,
                album: target.clone(),
            });
            submitted += 1;
        }

        Ok(submitted)
    }

    // ========== 下载 ==========

    /// 把相册内容下载到本地目录，子相册对应子目录
    ///
    /// 同名的兄弟相册追加 `.[id]`；下载根目录时包含所有顶层相册和未分类照片。
    /// 返回提交的下载任务数。
    pub async fn download_album(&self, album_path: &str, local_dir: &Path) -> Result<usize> {
        let root = self.resolve_unique(album_path).await?;
        info!("下载相册 {} -> {}", root, local_dir.display());

        let mut worklist = VecDeque::new();
        let mut submitted = self.download_level(&root, local_dir, &mut worklist).await?;

        while let Some((target, dir)) = worklist.pop_front() {
            match self.download_level(&target, &dir, &mut worklist).await {
                Ok(count) => submitted += count,
                Err(e) => self.record_walk_error(TaskFailure::new(
                    format!("下载相册 {} -> {}", target, dir.display()),
                    e,
                )),
            }
        }

        info!("已提交 {} 个下载任务", submitted);
        Ok(submitted)
    }

    async fn download_level(
        &self,
        target: &AlbumTarget,
        dir: &Path,
        worklist: &mut VecDeque<(AlbumTarget, PathBuf)>,
    ) -> Result<usize> {
        tokio::fs::create_dir_all(dir).await?;
        let resource = self.api.get_album(target.fetch_id()).await?.resource;

        let children = match target {
            AlbumTarget::Root => self.api.list_albums().await?.all().cloned().collect(),
            AlbumTarget::Album(_) => resource.albums,
        };
        let mut siblings = SiblingTitles::new();
        for child in children {
            let name = siblings.claim(&local_name(&child.title, &child.id), &child.id);
            worklist.push_back((AlbumTarget::Album(child.id), dir.join(name)));
        }

        let mut submitted = 0;
        for photo in resource.photos {
            let Some(url) = photo.original_url() else {
                self.record_walk_error(TaskFailure::new(
                    format!("下载照片 {}", photo.id),
                    SyncError::remote(200, "照片没有原图地址"),
                ));
                continue;
            };
            self.submit(TransferTask::Download {
                file_name: photo_file_name(&photo.title, &photo.id, url),
                url: url.to_string(),
                photo_id: photo.id,
                directory: dir.to_path_buf(),
            });
            submitted += 1;
        }

        Ok(submitted)
    }

    // ========== 任务管理 ==========

    /// 等待所有已提交的任务结束并汇总结果
    pub async fn wait_tasks(&self) -> TransferReport {
        let (started_at, handles, walk_errors) = {
            let mut pending = self.pending();
            (
                pending.started_at.take(),
                std::mem::take(&mut pending.handles),
                std::mem::take(&mut pending.walk_errors),
            )
        };

        debug!("等待 {} 个任务", handles.len());
        let outcomes = TransferManager::drain(handles).await;
        self.guard.reset();

        let report = TransferReport {
            started_at: started_at.unwrap_or_else(Utc::now),
            finished_at: Utc::now(),
            outcomes,
            walk_errors,
        };

        for outcome in report.failed() {
            if let Err(failure) = &outcome.result {
                error!("任务失败: {}", failure);
            }
        }
        let summary = report.summary();
        info!(
            "传输完成: 成功 {}, 失败 {}, 取消 {}, 分支错误 {}",
            summary.succeeded, summary.failed, summary.cancelled, summary.walk_errors
        );
        report
    }

    /// 取消尚未开始的任务，已开始的会执行完；之后仍需 `wait_tasks` 取回结果
    pub fn cancel_pending(&self) {
        self.transfers.cancel_pending();
    }

    /// 关闭线程池
    pub async fn shutdown(self) {
        self.transfers.shutdown().await;
    }
}

/// 批量解析相册路径，根目录被忽略
async fn resolve_album_ids(resolver: &PathResolver, paths: &[&str]) -> Result<Vec<String>> {
    let mut ids = Vec::with_capacity(paths.len());
    for path in paths {
        match resolver.resolve_unique(&ResourcePath::parse(path)).await? {
            AlbumTarget::Root => warn!("忽略根目录: {:?}", path),
            AlbumTarget::Album(id) => ids.push(id),
        }
    }
    Ok(ids)
}

/// 标题作为本地文件名时去掉路径分隔符，空标题使用 id
fn local_name(title: &str, id: &str) -> String {
    let name: String = title
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect();
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        id.to_string()
    } else {
        trimmed.to_string()
    }
}

/// 照片的本地文件名：标题不带原图扩展名时补上
fn photo_file_name(title: &str, id: &str, url: &str) -> String {
    let name = local_name(title, id);
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').next().unwrap_or(path);
    match last.rfind('.') {
        Some(dot) if dot > 0 => {
            let ext = &last[dot..];
            if name.to_lowercase().ends_with(&ext.to_lowercase()) {
                name
            } else {
                format!("{}{}", name, ext)
            }
        }
        _ => name,
    }
}
