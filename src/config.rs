//! 应用配置模块
//!
//! 所有配置都保存在同一个 `config.json` 中，每个模块占用一个顶层 key。

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

const CONFIG_FILE: &str = "config.json";

/// 服务器连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Lychee 地址，如 `http://127.0.0.1:5000/`
    #[serde(default)]
    pub base_url: String,
    /// 单次请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    300
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn load(config_dir: &Path) -> Self {
        load_section(config_dir, "client").unwrap_or_default()
    }

    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        save_section(config_dir, "client", self)
    }
}

/// 传输配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferConfig {
    /// 线程池大小，影响同时上传/下载的数量
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// 分块上传的块大小（MB）
    #[serde(default = "default_chunk_size_mb")]
    pub chunk_size_mb: u64,
}

fn default_max_workers() -> usize {
    5
}

fn default_chunk_size_mb() -> u64 {
    2
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            chunk_size_mb: default_chunk_size_mb(),
        }
    }
}

impl TransferConfig {
    pub fn load(config_dir: &Path) -> Self {
        load_section(config_dir, "transfer").unwrap_or_default()
    }

    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        save_section(config_dir, "transfer", self)
    }

    /// 块大小（字节），至少 1 字节
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size_mb.saturating_mul(1024 * 1024).max(1)
    }
}

/// 登录凭证，由外部（命令行/环境变量）提供
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum Credentials {
    /// 在 Lychee 设置界面生成的 API token
    Token { token: String },
    Password { username: String, password: String },
}

/// 读取 `config.json` 中的一个配置段，文件不存在或格式错误时返回 None
fn load_section<T: DeserializeOwned>(config_dir: &Path, key: &str) -> Option<T> {
    let content = fs::read_to_string(config_dir.join(CONFIG_FILE)).ok()?;
    let config = serde_json::from_str::<serde_json::Value>(&content).ok()?;
    serde_json::from_value(config.get(key)?.clone()).ok()
}

/// 更新 `config.json` 中的一个配置段，保留其他配置
pub(crate) fn save_section<T: Serialize>(config_dir: &Path, key: &str, value: &T) -> io::Result<()> {
    let config_file = config_dir.join(CONFIG_FILE);

    // 读取现有配置
    let mut config: serde_json::Value = if config_file.exists() {
        let content = fs::read_to_string(&config_file)?;
        serde_json::from_str(&content).unwrap_or_else(|_| serde_json::json!({}))
    } else {
        serde_json::json!({})
    };

    config[key] = serde_json::to_value(value)?;

    fs::create_dir_all(config_dir)?;
    fs::write(&config_file, serde_json::to_string_pretty(&config)?)
}
