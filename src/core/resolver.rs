//! 路径与相册 id 的互相转换
//!
//! 相册标题在同一父相册下可以重复，所以一个路径可能对应多个 id。
//! 需要唯一目标的操作统一使用 [`PathResolver::resolve_unique`]。

use super::tree::TreeSnapshot;
use crate::error::{Result, SyncError};
use crate::remote::{AlbumApi, UNSORTED_ID};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// 调用方传入的相册引用：绝对路径或 id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourcePath {
    /// 以 `/` 开头（或为空）的标题路径
    Absolute(String),
    Opaque(String),
}

impl ResourcePath {
    pub fn parse(raw: &str) -> Self {
        if raw.is_empty() || raw.starts_with('/') {
            ResourcePath::Absolute(raw.to_string())
        } else {
            ResourcePath::Opaque(raw.to_string())
        }
    }

    /// 路径的非空段；id 没有段
    pub fn segments(&self) -> Vec<&str> {
        match self {
            ResourcePath::Absolute(path) => path.split('/').filter(|s| !s.is_empty()).collect(),
            ResourcePath::Opaque(_) => Vec::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, ResourcePath::Absolute(_)) && self.segments().is_empty()
    }

    pub fn as_str(&self) -> &str {
        match self {
            ResourcePath::Absolute(s) | ResourcePath::Opaque(s) => s,
        }
    }
}

impl From<&str> for ResourcePath {
    fn from(raw: &str) -> Self {
        ResourcePath::parse(raw)
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 解析后的目标相册
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AlbumTarget {
    /// 根目录 / 未分类
    Root,
    Album(String),
}

impl AlbumTarget {
    /// 修改类接口使用的 id，根目录为 None
    pub fn id(&self) -> Option<&str> {
        match self {
            AlbumTarget::Root => None,
            AlbumTarget::Album(id) => Some(id),
        }
    }

    /// 获取相册内容时使用的 id
    pub fn fetch_id(&self) -> &str {
        self.id().unwrap_or(UNSORTED_ID)
    }

    pub fn is_root(&self) -> bool {
        matches!(self, AlbumTarget::Root)
    }
}

impl fmt::Display for AlbumTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlbumTarget::Root => f.write_str("/"),
            AlbumTarget::Album(id) => f.write_str(id),
        }
    }
}

pub struct PathResolver {
    snapshot: TreeSnapshot,
}

impl PathResolver {
    pub fn new(snapshot: TreeSnapshot) -> Self {
        Self { snapshot }
    }

    /// 获取一份新的快照用于本次操作
    pub async fn acquire(api: Arc<dyn AlbumApi>) -> Result<Self> {
        Ok(Self::new(TreeSnapshot::acquire(api).await?))
    }

    pub fn snapshot(&self) -> &TreeSnapshot {
        &self.snapshot
    }

    /// 解析出所有匹配的相册
    ///
    /// 每一层保留所有同名候选，结果是所有合法路径的集合。
    pub async fn resolve_to_ids(&self, path: &ResourcePath) -> Result<Vec<AlbumTarget>> {
        if let ResourcePath::Opaque(id) = path {
            return Ok(vec![AlbumTarget::Album(id.clone())]);
        }
        if path.is_root() {
            return Ok(vec![AlbumTarget::Root]);
        }

        let mut candidates: Vec<Option<String>> = vec![None];
        for segment in path.segments() {
            let mut next = Vec::new();
            for parent in &candidates {
                for child in self.snapshot.children_of(parent.as_deref()).await? {
                    if child.title == segment {
                        next.push(Some(child.id));
                    }
                }
            }
            if next.is_empty() {
                debug!("路径 {} 在 {} 处没有匹配", path, segment);
                return Ok(Vec::new());
            }
            candidates = next;
        }

        Ok(candidates
            .into_iter()
            .flatten()
            .map(AlbumTarget::Album)
            .collect())
    }

    /// 解析出唯一的相册，0 个或多个匹配都是错误
    pub async fn resolve_unique(&self, path: &ResourcePath) -> Result<AlbumTarget> {
        let mut targets = self.resolve_to_ids(path).await?;
        if targets.len() == 1 {
            return Ok(targets.remove(0));
        }
        Err(SyncError::AmbiguousOrMissingPath {
            path: path.to_string(),
            candidates: targets.iter().map(ToString::to_string).collect(),
        })
    }

    /// id 转为绝对路径；传入路径时原样返回，id 不存在时返回空字符串
    pub async fn id_to_path(&self, id: &str) -> Result<String> {
        if let ResourcePath::Absolute(path) = ResourcePath::parse(id) {
            return Ok(path);
        }
        if id == UNSORTED_ID {
            return Ok("/".to_string());
        }

        let mut titles = Vec::new();
        let mut visited = HashSet::new();
        let mut current = Some(id.to_string());

        while let Some(current_id) = current {
            if !visited.insert(current_id.clone()) {
                warn!("相册 {} 的父链存在环", id);
                break;
            }
            match self.snapshot.node(&current_id).await? {
                Some(node) => {
                    titles.push(node.title);
                    current = node.parent_id;
                }
                None if titles.is_empty() => return Ok(String::new()),
                // 父相册不可见时只保留已知部分
                None => break,
            }
        }

        titles.reverse();
        Ok(format!("/{}", titles.join("/")))
    }
}
