//! HTTP 会话：负责 API 前缀、CSRF 头和认证头
//!
//! 会话中的 cookie 会在登录响应时更新一次，之后基本保持不变。
//! 并发使用前应先完成登录；本模块不对 cookie 变化做跨请求同步。

use crate::config::ClientConfig;
use crate::error::{Result, SyncError};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Response, Url};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// API 版本前缀
pub const API_PREFIX: &str = "api/v2/";

const CSRF_COOKIE: &str = "XSRF-TOKEN";
const CSRF_HEADER: &str = "x-xsrf-token";

/// 请求体
pub enum RequestBody {
    Empty,
    /// GET 请求的查询参数
    Query(Vec<(String, String)>),
    Json(serde_json::Value),
    Multipart(reqwest::multipart::Form),
}

/// 单次请求的请求头覆盖：先设置，再删除
#[derive(Debug, Clone, Default)]
pub struct HeaderOverrides {
    set: HeaderMap,
    remove: Vec<HeaderName>,
}

impl HeaderOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.set.insert(name, value);
        self
    }

    /// 删除会话自动添加的请求头（如 multipart 请求不能带 JSON 的 Content-Type）
    pub fn without(mut self, name: HeaderName) -> Self {
        self.remove.push(name);
        self
    }

    pub fn apply(&self, headers: &mut HeaderMap) {
        for (name, value) in &self.set {
            headers.insert(name.clone(), value.clone());
        }
        for name in &self.remove {
            headers.remove(name);
        }
    }
}

struct SessionState {
    headers: HeaderMap,
    /// 上次用于生成 CSRF 头的原始 cookie 值
    csrf_cookie: Option<String>,
}

pub struct Session {
    client: reqwest::Client,
    jar: Arc<Jar>,
    base_url: String,
    cookie_url: Url,
    state: Mutex<SessionState>,
}

impl Session {
    /// 创建会话（不发起网络请求）
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(SyncError::Config("服务器地址不能为空".to_string()));
        }
        let cookie_url = Url::parse(&format!("{}/", base_url))
            .map_err(|e| SyncError::Config(format!("无效的服务器地址 {}: {}", base_url, e)))?;

        let jar = Arc::new(Jar::default());
        let client = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Ok(Self {
            client,
            jar,
            base_url,
            cookie_url,
            state: Mutex::new(SessionState {
                headers,
                csrf_cookie: None,
            }),
        })
    }

    /// 访问首页以获取服务器下发的 CSRF cookie
    pub async fn handshake(&self) -> Result<()> {
        debug!("连接服务器: {}", self.base_url);
        self.client.get(self.cookie_url.clone()).send().await?;
        self.refresh_csrf();
        Ok(())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 设置之后所有请求都会携带的认证头
    pub fn set_authorization(&self, token: &str) -> Result<()> {
        let value = HeaderValue::from_str(token)
            .map_err(|_| SyncError::Config("token 含有非法字符".to_string()))?;
        self.state().headers.insert(AUTHORIZATION, value);
        Ok(())
    }

    /// cookie 变化时重新生成 CSRF 头
    fn refresh_csrf(&self) {
        let Some(cookies) = self.jar.cookies(&self.cookie_url) else {
            return;
        };
        let Some(raw) = cookies.to_str().ok().and_then(find_cookie_value(CSRF_COOKIE)) else {
            return;
        };

        let mut state = self.state();
        if state.csrf_cookie.as_deref() == Some(raw.as_str()) {
            return;
        }
        if let Some(value) = derive_csrf_token(&raw).and_then(|t| HeaderValue::from_str(&t).ok()) {
            debug!("更新 CSRF 头");
            state.headers.insert(HeaderName::from_static(CSRF_HEADER), value);
        }
        state.csrf_cookie = Some(raw);
    }

    /// 本次请求实际发送的请求头
    pub(crate) fn headers_with(&self, overrides: &HeaderOverrides) -> HeaderMap {
        self.refresh_csrf();
        let mut headers = self.state().headers.clone();
        overrides.apply(&mut headers);
        headers
    }

    /// 发送 API 请求，`resource` 为 API 前缀之后的部分，如 `Album::move`
    pub async fn send(
        &self,
        method: Method,
        resource: &str,
        body: RequestBody,
        overrides: HeaderOverrides,
    ) -> Result<Response> {
        let url = api_endpoint(&self.base_url, resource);
        debug!("{} {}", method, url);

        let headers = self.headers_with(&overrides);
        let request = self.client.request(method, &url).headers(headers);
        let request = match body {
            RequestBody::Empty => request,
            RequestBody::Query(pairs) => request.query(&pairs),
            RequestBody::Json(value) => request.body(serde_json::to_vec(&value)?),
            RequestBody::Multipart(form) => request.multipart(form),
        };

        Ok(request.send().await?)
    }

    /// 以当前会话身份 GET 任意地址（用于照片下载）
    pub async fn get_absolute(&self, url: &str) -> Result<Response> {
        let url = absolute_url(&self.base_url, url);
        debug!("GET {}", url);
        let headers = self.headers_with(&HeaderOverrides::new().without(CONTENT_TYPE));
        Ok(self.client.get(&url).headers(headers).send().await?)
    }
}

/// 拼接 API 地址
pub fn api_endpoint(base_url: &str, resource: &str) -> String {
    format!(
        "{}/{}{}",
        base_url.trim_end_matches('/'),
        API_PREFIX,
        resource.trim_start_matches('/')
    )
}

/// 相对地址拼接到服务器地址上，绝对地址原样返回
pub fn absolute_url(base_url: &str, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            url.trim_start_matches('/')
        )
    }
}

/// 从 `a=1; b=2` 形式的 cookie 头中取出指定 cookie 的值
fn find_cookie_value(name: &'static str) -> impl Fn(&str) -> Option<String> {
    move |header: &str| {
        header.split(';').find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key == name).then(|| value.to_string())
        })
    }
}

/// cookie 中的 token 经过 URL 编码，且 base64 填充的 `=` 需要去掉
pub fn derive_csrf_token(raw_cookie: &str) -> Option<String> {
    let decoded = urlencoding::decode(raw_cookie).ok()?;
    let token = decoded.replace('=', "");
    (!token.is_empty()).then_some(token)
}
