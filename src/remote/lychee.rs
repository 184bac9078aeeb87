//! 基于 HTTP 会话的 Lychee API 实现

use super::session::{HeaderOverrides, RequestBody, Session};
use super::{
    AlbumApi, AlbumNode, AlbumPayload, ByteStream, ChunkForm, ChunkReply, SearchResult,
    TopLevelAlbums,
};
use crate::config::{ClientConfig, Credentials};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use base64::Engine as _;
use futures::TryStreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

/// 服务器返回的错误体，如 `{"message": "Insufficient privileges", "exception": "UnauthorizedException"}`
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    exception: Option<String>,
}

impl ErrorBody {
    fn parse(text: &str) -> Option<Self> {
        serde_json::from_str::<Self>(text)
            .ok()
            .filter(|b| b.message.is_some() || b.exception.is_some())
    }

    fn is_insufficient_privilege(&self) -> bool {
        self.message.as_deref() == Some("Insufficient privileges")
            || self.exception.as_deref() == Some("UnauthorizedException")
    }

    fn describe(&self) -> String {
        match (&self.message, &self.exception) {
            (Some(m), Some(e)) => format!("{} ({})", m, e),
            (Some(m), None) => m.clone(),
            (None, Some(e)) => e.clone(),
            (None, None) => String::new(),
        }
    }
}

pub struct LycheeClient {
    session: Session,
    name: String,
}

impl LycheeClient {
    /// 连接服务器并获取初始 CSRF cookie
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let session = Session::new(config)?;
        session.handshake().await?;
        let name = format!("lychee:{}", session.base_url());
        info!("已连接 Lychee 服务器: {}", session.base_url());
        Ok(Self { session, name })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub async fn login(&self, credentials: &Credentials) -> Result<()> {
        match credentials {
            Credentials::Token { token } => self.login_by_token(token),
            Credentials::Password { username, password } => {
                self.login_by_password(username, password).await
            }
        }
    }

    /// 账号密码登录，只有 HTTP 204 视为成功
    pub async fn login_by_password(&self, username: &str, password: &str) -> Result<()> {
        let response = self
            .session
            .send(
                Method::POST,
                "Auth::login",
                RequestBody::Json(json!({ "username": username, "password": password })),
                HeaderOverrides::new(),
            )
            .await?;

        if response.status() == StatusCode::NO_CONTENT {
            info!("登录成功: {}", username);
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(SyncError::AuthenticationFailed(body))
    }

    /// token 登录不会访问服务器，总是成功
    pub fn login_by_token(&self, token: &str) -> Result<()> {
        self.session.set_authorization(token)
    }

    async fn call(&self, method: Method, resource: &str, body: RequestBody) -> Result<Response> {
        let response = self
            .session
            .send(method, resource, body, HeaderOverrides::new())
            .await?;
        check_status(response).await
    }

    async fn call_json<T: DeserializeOwned>(
        &self,
        method: Method,
        resource: &str,
        body: RequestBody,
    ) -> Result<T> {
        let response = self.call(method, resource, body).await?;
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// 不关心响应内容的修改类请求
    async fn call_unit(&self, method: Method, resource: &str, body: serde_json::Value) -> Result<()> {
        self.call(method, resource, RequestBody::Json(body)).await?;
        Ok(())
    }
}

/// 非 2xx 响应转换为错误
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = ErrorBody::parse(&text)
        .map(|b| b.describe())
        .unwrap_or(text);
    Err(SyncError::remote(status.as_u16(), message))
}

/// 完整树接口：数组为正常结果，错误体中的权限不足需要单独识别
fn parse_full_tree(status: StatusCode, text: &str) -> Result<Vec<AlbumNode>> {
    if let Some(body) = ErrorBody::parse(text) {
        if body.is_insufficient_privilege() {
            return Err(SyncError::InsufficientPrivilege);
        }
        return Err(SyncError::remote(status.as_u16(), body.describe()));
    }
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return Err(SyncError::InsufficientPrivilege);
    }
    if !status.is_success() {
        return Err(SyncError::remote(status.as_u16(), text));
    }
    Ok(serde_json::from_str(text)?)
}

/// 创建相册的响应是新相册 id，可能带 JSON 引号
fn parse_created_id(text: &str) -> String {
    serde_json::from_str::<String>(text).unwrap_or_else(|_| text.trim().trim_matches('"').to_string())
}

#[async_trait]
impl AlbumApi for LycheeClient {
    async fn list_albums(&self) -> Result<TopLevelAlbums> {
        self.call_json(Method::GET, "Albums", RequestBody::Empty).await
    }

    async fn get_album(&self, album_id: &str) -> Result<AlbumPayload> {
        self.call_json(
            Method::GET,
            "Album",
            RequestBody::Query(vec![("album_id".to_string(), album_id.to_string())]),
        )
        .await
    }

    async fn full_tree(&self) -> Result<Vec<AlbumNode>> {
        let response = self
            .session
            .send(
                Method::GET,
                "Maintenance::fullTree",
                RequestBody::Empty,
                HeaderOverrides::new(),
            )
            .await?;
        let status = response.status();
        let text = response.text().await?;
        parse_full_tree(status, &text)
    }

    async fn create_album(&self, title: &str, parent_id: Option<&str>) -> Result<String> {
        let response = self
            .call(
                Method::POST,
                "Album",
                RequestBody::Json(json!({ "parent_id": parent_id, "title": title })),
            )
            .await?;
        let id = parse_created_id(&response.text().await?);
        debug!("创建相册 {} -> {}", title, id);
        Ok(id)
    }

    async fn delete_albums(&self, album_ids: &[String]) -> Result<()> {
        self.call_unit(Method::DELETE, "Album", json!({ "album_ids": album_ids }))
            .await
    }

    async fn move_albums(&self, target_id: Option<&str>, album_ids: &[String]) -> Result<()> {
        self.call_unit(
            Method::POST,
            "Album::move",
            json!({ "album_id": target_id, "album_ids": album_ids }),
        )
        .await
    }

    async fn upload_chunk(&self, form: ChunkForm) -> Result<ChunkReply> {
        let mut multipart = Form::new();
        if let Some(album_id) = form.album_id {
            multipart = multipart.text("album_id", album_id);
        }
        let part = Part::bytes(form.data.to_vec()).file_name(form.file_name.clone());
        let multipart = multipart
            .part("file", part)
            .text("file_name", form.file_name)
            .text("uuid_name", form.uuid_name)
            .text("extension", form.extension)
            .text("chunk_number", form.chunk_number.to_string())
            .text("total_chunks", form.total_chunks.to_string());

        // 设置了 Content-Type 时 reqwest 不会再添加 multipart boundary
        let response = self
            .session
            .send(
                Method::POST,
                "Photo",
                RequestBody::Multipart(multipart),
                HeaderOverrides::new().without(CONTENT_TYPE),
            )
            .await?;
        let response = check_status(response).await?;
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn open_download(&self, url: &str) -> Result<ByteStream> {
        let response = check_status(self.session.get_absolute(url).await?).await?;
        Ok(Box::pin(response.bytes_stream().map_err(SyncError::from)))
    }

    async fn move_photos(&self, target_id: Option<&str>, photo_ids: &[String]) -> Result<()> {
        self.call_unit(
            Method::POST,
            "Photo::move",
            json!({ "album_id": target_id, "photo_ids": photo_ids }),
        )
        .await
    }

    async fn copy_photos(&self, target_id: Option<&str>, photo_ids: &[String]) -> Result<()> {
        self.call_unit(
            Method::POST,
            "Photo::copy",
            json!({ "album_id": target_id, "photo_ids": photo_ids }),
        )
        .await
    }

    async fn star_photos(&self, starred: bool, photo_ids: &[String]) -> Result<()> {
        self.call_unit(
            Method::POST,
            "Photo::star",
            json!({ "is_starred": starred, "photo_ids": photo_ids }),
        )
        .await
    }

    async fn rename_photo(&self, photo_id: &str, title: &str) -> Result<()> {
        self.call_unit(
            Method::PATCH,
            "Photo::rename",
            json!({ "photo_id": photo_id, "title": title }),
        )
        .await
    }

    async fn delete_photos(&self, photo_ids: &[String]) -> Result<()> {
        self.call_unit(Method::DELETE, "Photo", json!({ "photo_ids": photo_ids }))
            .await
    }

    async fn search(&self, terms: &str, album_id: Option<&str>) -> Result<SearchResult> {
        let mut query = vec![(
            "terms".to_string(),
            base64::engine::general_purpose::STANDARD.encode(terms.as_bytes()),
        )];
        if let Some(id) = album_id {
            query.push(("album_id".to_string(), id.to_string()));
        }
        self.call_json(Method::GET, "Search", RequestBody::Query(query))
            .await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
