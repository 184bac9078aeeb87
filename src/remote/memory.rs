//! 内存中的相册服务器，仅用于测试

use super::{
    AlbumApi, AlbumConfig, AlbumNode, AlbumPayload, AlbumResource, ByteStream, ChunkForm,
    ChunkReply, Photo, SearchResult, SizeVariant, SizeVariants, TopLevelAlbums, UNSORTED_ID,
};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct MemoryPhoto {
    id: String,
    title: String,
    album_id: Option<String>,
    data: Bytes,
}

impl MemoryPhoto {
    fn url(&self) -> String {
        format!("http://memory/uploads/{}", self.id)
    }

    fn to_photo(&self) -> Photo {
        Photo {
            id: self.id.clone(),
            title: self.title.clone(),
            created_at: None,
            size_variants: SizeVariants {
                original: Some(SizeVariant {
                    url: Some(self.url()),
                    filesize: None,
                }),
            },
        }
    }
}

#[derive(Default)]
struct MemoryState {
    albums: Vec<AlbumNode>,
    photos: Vec<MemoryPhoto>,
    calls: Vec<String>,
    chunks: Vec<ChunkForm>,
    fail_uploads: HashSet<String>,
    inaccessible: HashSet<String>,
    hidden: HashSet<String>,
    /// 已发出的 uuid_name -> (上传序号, 已收到的数据)
    uploads: HashMap<String, (u64, Vec<u8>)>,
    next_upload: u64,
    next_id: u64,
}

impl MemoryState {
    fn new_id(&mut self) -> String {
        self.next_id += 1;
        format!("{:024}", self.next_id)
    }
}

pub struct MemoryApi {
    privileged: bool,
    state: Mutex<MemoryState>,
}

impl MemoryApi {
    /// `privileged` 为 false 时完整树接口返回权限不足
    pub fn new(privileged: bool) -> Self {
        Self {
            privileged,
            state: Mutex::new(MemoryState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap()
    }

    fn record(&self, call: String) {
        self.state().calls.push(call);
    }

    pub fn add_album(&self, title: &str, parent_id: Option<&str>) -> String {
        let mut state = self.state();
        let id = state.new_id();
        state.albums.push(AlbumNode {
            id: id.clone(),
            title: title.to_string(),
            parent_id: parent_id.map(str::to_string),
            created_at: None,
        });
        id
    }

    pub fn add_photo(&self, album_id: Option<&str>, title: &str, data: &[u8]) -> String {
        let mut state = self.state();
        let id = state.new_id();
        state.photos.push(MemoryPhoto {
            id: id.clone(),
            title: title.to_string(),
            album_id: album_id.map(str::to_string),
            data: Bytes::copy_from_slice(data),
        });
        id
    }

    /// 指定文件名的上传在最后一块时失败
    pub fn fail_upload(&self, file_name: &str) {
        self.state().fail_uploads.insert(file_name.to_string());
    }

    /// 相册详情中标记为不可访问
    pub fn set_inaccessible(&self, album_id: &str) {
        self.state().inaccessible.insert(album_id.to_string());
    }

    /// 当前用户看不到的相册，详情接口返回 403
    pub fn hide_album(&self, album_id: &str) {
        self.state().hidden.insert(album_id.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn chunks(&self) -> Vec<ChunkForm> {
        self.state().chunks.clone()
    }

    pub fn albums(&self) -> Vec<AlbumNode> {
        self.state().albums.clone()
    }

    pub fn photo_titles(&self, album_id: Option<&str>) -> Vec<String> {
        let mut titles: Vec<String> = self
            .state()
            .photos
            .iter()
            .filter(|p| p.album_id.as_deref() == album_id)
            .map(|p| p.title.clone())
            .collect();
        titles.sort();
        titles
    }
}

fn not_found(id: &str) -> SyncError {
    SyncError::remote(404, format!("No query results for model [BaseAlbumImpl] {}", id))
}

#[async_trait]
impl AlbumApi for MemoryApi {
    async fn list_albums(&self) -> Result<TopLevelAlbums> {
        self.record("list_albums".to_string());
        let state = self.state();
        Ok(TopLevelAlbums {
            albums: state
                .albums
                .iter()
                .filter(|a| a.parent_id.is_none())
                .cloned()
                .collect(),
            shared_albums: Vec::new(),
        })
    }

    async fn get_album(&self, album_id: &str) -> Result<AlbumPayload> {
        self.record(format!("get_album:{}", album_id));
        let state = self.state();
        if state.hidden.contains(album_id) {
            return Err(SyncError::remote(
                403,
                "Insufficient privileges (UnauthorizedException)",
            ));
        }
        let (title, parent_id, owner) = if album_id == UNSORTED_ID {
            ("Unsorted".to_string(), None, None)
        } else {
            let album = state
                .albums
                .iter()
                .find(|a| a.id == album_id)
                .ok_or_else(|| not_found(album_id))?;
            (album.title.clone(), album.parent_id.clone(), Some(album_id))
        };

        let albums = match owner {
            Some(id) => state
                .albums
                .iter()
                .filter(|a| a.parent_id.as_deref() == Some(id))
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        let photos = state
            .photos
            .iter()
            .filter(|p| p.album_id.as_deref() == owner)
            .map(MemoryPhoto::to_photo)
            .collect();

        Ok(AlbumPayload {
            config: AlbumConfig {
                is_accessible: !state.inaccessible.contains(album_id),
            },
            resource: AlbumResource {
                id: album_id.to_string(),
                title,
                parent_id,
                albums,
                photos,
            },
        })
    }

    async fn full_tree(&self) -> Result<Vec<AlbumNode>> {
        self.record("full_tree".to_string());
        if !self.privileged {
            return Err(SyncError::InsufficientPrivilege);
        }
        Ok(self.state().albums.clone())
    }

    async fn create_album(&self, title: &str, parent_id: Option<&str>) -> Result<String> {
        self.record(format!("create_album:{}", title));
        Ok(self.add_album(title, parent_id))
    }

    async fn delete_albums(&self, album_ids: &[String]) -> Result<()> {
        self.record(format!("delete_albums:{}", album_ids.join(",")));
        self.state().albums.retain(|a| !album_ids.contains(&a.id));
        Ok(())
    }

    async fn move_albums(&self, target_id: Option<&str>, album_ids: &[String]) -> Result<()> {
        self.record(format!("move_albums:{}", album_ids.join(",")));
        for album in self.state().albums.iter_mut() {
            if album_ids.contains(&album.id) {
                album.parent_id = target_id.map(str::to_string);
            }
        }
        Ok(())
    }

    async fn upload_chunk(&self, form: ChunkForm) -> Result<ChunkReply> {
        self.record(format!("upload_chunk:{}:{}", form.file_name, form.chunk_number));
        let mut state = self.state();
        state.chunks.push(form.clone());

        let extension = form
            .file_name
            .rfind('.')
            .map(|i| form.file_name[i..].to_string())
            .unwrap_or_default();

        // 每次上传序列只拼接自己的块，同名文件并发上传互不干扰
        let (sequence, mut data) = if form.chunk_number == 1 {
            state.next_upload += 1;
            (state.next_upload, Vec::new())
        } else {
            state.uploads.remove(&form.uuid_name).ok_or_else(|| {
                SyncError::remote(400, format!("Unknown upload {}", form.uuid_name))
            })?
        };
        data.extend_from_slice(&form.data);

        if form.chunk_number < form.total_chunks {
            let uuid_name = format!("uuid-{}-{}", sequence, form.chunk_number);
            state.uploads.insert(uuid_name.clone(), (sequence, data));
            return Ok(ChunkReply {
                file_name: Some(form.file_name.clone()),
                uuid_name: Some(uuid_name),
                extension: Some(extension),
                stage: Some("uploading".to_string()),
                chunk_number: Some(form.chunk_number),
                total_chunks: Some(form.total_chunks),
                raw: Default::default(),
            });
        }

        if state.fail_uploads.contains(&form.file_name) {
            return Err(SyncError::remote(500, "Creating photo failed (ModelDBException)"));
        }

        let title = form
            .file_name
            .strip_suffix(extension.as_str())
            .unwrap_or(&form.file_name)
            .to_string();
        let id = state.new_id();
        state.photos.push(MemoryPhoto {
            id: id.clone(),
            title: title.clone(),
            album_id: form.album_id.clone(),
            data: Bytes::from(data),
        });

        let mut raw = serde_json::Map::new();
        raw.insert("id".to_string(), id.into());
        raw.insert("title".to_string(), title.into());
        Ok(ChunkReply {
            raw,
            ..Default::default()
        })
    }

    async fn open_download(&self, url: &str) -> Result<ByteStream> {
        self.record(format!("download:{}", url));
        let data = self
            .state()
            .photos
            .iter()
            .find(|p| p.url() == url)
            .map(|p| p.data.clone())
            .ok_or_else(|| SyncError::remote(404, format!("Not Found: {}", url)))?;

        let mid = data.len() / 2;
        let pieces = vec![Ok(data.slice(..mid)), Ok(data.slice(mid..))];
        Ok(Box::pin(futures::stream::iter(pieces)))
    }

    async fn move_photos(&self, target_id: Option<&str>, photo_ids: &[String]) -> Result<()> {
        self.record(format!("move_photos:{}", photo_ids.join(",")));
        for photo in self.state().photos.iter_mut() {
            if photo_ids.contains(&photo.id) {
                photo.album_id = target_id.map(str::to_string);
            }
        }
        Ok(())
    }

    async fn copy_photos(&self, target_id: Option<&str>, photo_ids: &[String]) -> Result<()> {
        self.record(format!("copy_photos:{}", photo_ids.join(",")));
        let mut state = self.state();
        let copies: Vec<MemoryPhoto> = state
            .photos
            .iter()
            .filter(|p| photo_ids.contains(&p.id))
            .cloned()
            .collect();
        for mut copy in copies {
            copy.id = state.new_id();
            copy.album_id = target_id.map(str::to_string);
            state.photos.push(copy);
        }
        Ok(())
    }

    async fn star_photos(&self, starred: bool, photo_ids: &[String]) -> Result<()> {
        self.record(format!("star_photos:{}:{}", starred, photo_ids.join(",")));
        Ok(())
    }

    async fn rename_photo(&self, photo_id: &str, title: &str) -> Result<()> {
        self.record(format!("rename_photo:{}", photo_id));
        let mut state = self.state();
        let photo = state
            .photos
            .iter_mut()
            .find(|p| p.id == photo_id)
            .ok_or_else(|| not_found(photo_id))?;
        photo.title = title.to_string();
        Ok(())
    }

    async fn delete_photos(&self, photo_ids: &[String]) -> Result<()> {
        self.record(format!("delete_photos:{}", photo_ids.join(",")));
        self.state().photos.retain(|p| !photo_ids.contains(&p.id));
        Ok(())
    }

    async fn search(&self, terms: &str, album_id: Option<&str>) -> Result<SearchResult> {
        self.record(format!("search:{}", terms));
        let state = self.state();
        Ok(SearchResult {
            albums: state
                .albums
                .iter()
                .filter(|a| a.title.contains(terms))
                .cloned()
                .collect(),
            photos: state
                .photos
                .iter()
                .filter(|p| album_id.is_none() || p.album_id.as_deref() == album_id)
                .filter(|p| p.title.contains(terms))
                .map(MemoryPhoto::to_photo)
                .collect(),
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn chunk(album: &str, uuid_name: &str, number: u64, data: &[u8]) -> ChunkForm {
        ChunkForm {
            album_id: Some(album.to_string()),
            file_name: "c.jpg".to_string(),
            data: Bytes::copy_from_slice(data),
            chunk_number: number,
            total_chunks: 2,
            uuid_name: uuid_name.to_string(),
            extension: if number == 1 { String::new() } else { ".jpg".to_string() },
        }
    }

    async fn download(api: &MemoryApi, reply: &ChunkReply) -> Vec<u8> {
        let id = reply.raw["id"].as_str().unwrap();
        let mut stream = api
            .open_download(&format!("http://memory/uploads/{}", id))
            .await
            .unwrap();
        let mut data = Vec::new();
        while let Some(piece) = stream.next().await {
            data.extend_from_slice(&piece.unwrap());
        }
        data
    }

    #[tokio::test]
    async fn interleaved_uploads_of_same_name_stay_apart() {
        let api = MemoryApi::new(true);
        let a = api.add_album("A", None);
        let b = api.add_album("B", None);

        let first_a = api.upload_chunk(chunk(&a, "", 1, b"aa")).await.unwrap();
        let first_b = api.upload_chunk(chunk(&b, "", 1, b"bb")).await.unwrap();
        let last_b = api
            .upload_chunk(chunk(&b, first_b.uuid_name.as_deref().unwrap(), 2, b"BB"))
            .await
            .unwrap();
        let last_a = api
            .upload_chunk(chunk(&a, first_a.uuid_name.as_deref().unwrap(), 2, b"AA"))
            .await
            .unwrap();

        assert_eq!(download(&api, &last_a).await, b"aaAA");
        assert_eq!(download(&api, &last_b).await, b"bbBB");
        assert_eq!(api.photo_titles(Some(&a)), vec!["c"]);
        assert_eq!(api.photo_titles(Some(&b)), vec!["c"]);
    }

    #[tokio::test]
    async fn unknown_upload_token_is_rejected() {
        let api = MemoryApi::new(true);
        let album = api.add_album("A", None);
        let err = api
            .upload_chunk(chunk(&album, "uuid-9-1", 2, b"xx"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::RemoteOperationFailed { status: 400, .. }));
    }
}
