//! Lychee 相册同步核心
//!
//! 路径/id 互相解析、分块上传、并发下载，以及批量任务的结果汇总。
//! 命令行解析和凭证来源由调用方负责，这里只接收构造参数。

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod remote;

pub use config::{ClientConfig, Credentials, TransferConfig};
pub use crate::core::{
    AlbumListing, AlbumTarget, ResourcePath, ScanConfig, SyncEngine, TransferReport,
    TransferSummary,
};
pub use error::{Result, SyncError};
pub use remote::{AlbumApi, LycheeClient};

/// 应用目录
pub mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
        } else {
            // Linux
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".config"))
        }
    }

    /// 配置文件和日志所在目录
    pub fn app_config_dir() -> PathBuf {
        config_dir()
            .map(|p| p.join("lychee-sync"))
            .unwrap_or_else(|| PathBuf::from(".lychee-sync"))
    }
}
