//! 错误类型

use thiserror::Error;

/// 同步核心的错误分类
#[derive(Debug, Error)]
pub enum SyncError {
    /// 用户名/密码错误，会话不可用
    #[error("认证失败: {0}")]
    AuthenticationFailed(String),

    /// 需要唯一匹配的路径解析出 0 个或多个相册
    #[error("路径 {path} 没有唯一匹配 (候选: {candidates:?})")]
    AmbiguousOrMissingPath {
        path: String,
        candidates: Vec<String>,
    },

    /// 无权访问完整相册树，调用方应改用逐级获取
    #[error("权限不足")]
    InsufficientPrivilege,

    #[error("远程操作失败 (HTTP {status}): {message}")]
    RemoteOperationFailed { status: u16, message: String },

    #[error("网络传输错误: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("本地文件错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("响应解析失败: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("相册不可访问: {0}")]
    NotAccessible(String),

    #[error("操作已取消")]
    Cancelled,

    #[error("配置错误: {0}")]
    Config(String),

    /// 工作任务异常退出（panic 或被丢弃）
    #[error("任务异常终止: {0}")]
    TaskAborted(String),
}

impl SyncError {
    pub fn remote(status: u16, message: impl Into<String>) -> Self {
        SyncError::RemoteOperationFailed {
            status,
            message: message.into(),
        }
    }

    /// 是否为 404 一类的“不存在”错误
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::RemoteOperationFailed { status: 404, .. })
    }

    /// 当前用户无权查看（未登录或权限不足）
    pub fn is_access_denied(&self) -> bool {
        matches!(
            self,
            SyncError::InsufficientPrivilege
                | SyncError::RemoteOperationFailed {
                    status: 401 | 403,
                    ..
                }
        )
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
