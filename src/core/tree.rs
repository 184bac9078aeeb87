//! 远程相册树快照
//!
//! 管理员可以一次拿到完整的扁平树；普通用户只能逐级获取相册内容，
//! 两种方式对上层（路径解析）表现一致。

use crate::error::{Result, SyncError};
use crate::remote::{AlbumApi, AlbumNode};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// 一次性获取的完整树，按 id 和父相册建立索引
#[derive(Debug, Default)]
pub struct FullTree {
    nodes: Vec<AlbumNode>,
    by_id: HashMap<String, usize>,
    children: HashMap<Option<String>, Vec<usize>>,
}

impl FullTree {
    pub fn from_nodes(nodes: Vec<AlbumNode>) -> Self {
        let mut by_id = HashMap::with_capacity(nodes.len());
        let mut children: HashMap<Option<String>, Vec<usize>> = HashMap::new();

        for (index, node) in nodes.iter().enumerate() {
            by_id.insert(node.id.clone(), index);
            children
                .entry(node.parent_id.clone())
                .or_default()
                .push(index);
        }

        Self {
            nodes,
            by_id,
            children,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 服务器返回的原始顺序
    pub fn nodes(&self) -> &[AlbumNode] {
        &self.nodes
    }

    pub fn get(&self, id: &str) -> Option<&AlbumNode> {
        self.by_id.get(id).map(|&i| &self.nodes[i])
    }

    pub fn children_of(&self, parent_id: Option<&str>) -> impl Iterator<Item = &AlbumNode> {
        self.children
            .get(&parent_id.map(str::to_string))
            .into_iter()
            .flatten()
            .map(|&i| &self.nodes[i])
    }
}

/// 某一时刻的相册树视图，不会随远程变化而更新
pub enum TreeSnapshot {
    Full(FullTree),
    /// 无完整树权限时按需逐级获取
    Lazy(Arc<dyn AlbumApi>),
}

impl TreeSnapshot {
    /// 优先获取完整树，权限不足时退回逐级获取，其他错误直接返回
    pub async fn acquire(api: Arc<dyn AlbumApi>) -> Result<Self> {
        match api.full_tree().await {
            Ok(nodes) => {
                debug!("获取完整相册树: {} 个相册", nodes.len());
                Ok(TreeSnapshot::Full(FullTree::from_nodes(nodes)))
            }
            Err(SyncError::InsufficientPrivilege) => {
                info!("无完整相册树权限，改为逐级获取");
                Ok(TreeSnapshot::Lazy(api))
            }
            Err(e) => Err(e),
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, TreeSnapshot::Full(_))
    }

    /// 子相册，`None` 表示根目录
    pub async fn children_of(&self, parent_id: Option<&str>) -> Result<Vec<AlbumNode>> {
        match self {
            TreeSnapshot::Full(tree) => Ok(tree.children_of(parent_id).cloned().collect()),
            TreeSnapshot::Lazy(api) => match parent_id {
                None => Ok(api.list_albums().await?.all().cloned().collect()),
                Some(id) => {
                    let payload = api.get_album(id).await?;
                    Ok(payload
                        .resource
                        .albums
                        .into_iter()
                        .map(|mut node| {
                            node.parent_id.get_or_insert_with(|| id.to_string());
                            node
                        })
                        .collect())
                }
            },
        }
    }

    /// 按 id 查找相册，不存在或当前用户无权查看时返回 None
    pub async fn node(&self, id: &str) -> Result<Option<AlbumNode>> {
        match self {
            TreeSnapshot::Full(tree) => Ok(tree.get(id).cloned()),
            TreeSnapshot::Lazy(api) => match api.get_album(id).await {
                Ok(payload) => Ok(Some(AlbumNode {
                    id: payload.resource.id,
                    title: payload.resource.title,
                    parent_id: payload.resource.parent_id,
                    created_at: None,
                })),
                Err(e) if e.is_not_found() || e.is_access_denied() => Ok(None),
                Err(e) => Err(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::MemoryApi;

    fn node(id: &str, title: &str, parent: Option<&str>) -> AlbumNode {
        AlbumNode {
            id: id.to_string(),
            title: title.to_string(),
            parent_id: parent.map(str::to_string),
            created_at: None,
        }
    }

    #[test]
    fn full_tree_indexes_children_in_server_order() {
        let tree = FullTree::from_nodes(vec![
            node("a", "2024", None),
            node("b", "Trip", Some("a")),
            node("c", "Home", None),
            node("d", "Trip", Some("a")),
        ]);

        let roots: Vec<_> = tree.children_of(None).map(|n| n.id.as_str()).collect();
        assert_eq!(roots, vec!["a", "c"]);
        let trips: Vec<_> = tree.children_of(Some("a")).map(|n| n.id.as_str()).collect();
        assert_eq!(trips, vec!["b", "d"]);
        assert_eq!(tree.get("d").unwrap().title, "Trip");
        assert!(tree.get("zzz").is_none());
        assert!(tree.children_of(Some("c")).next().is_none());
    }

    #[tokio::test]
    async fn privileged_user_gets_full_tree() {
        let api = Arc::new(MemoryApi::new(true));
        api.add_album("2024", None);

        let snapshot = TreeSnapshot::acquire(api.clone()).await.unwrap();
        assert!(snapshot.is_full());
        assert_eq!(snapshot.children_of(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unprivileged_user_falls_back_to_lazy() {
        let api = Arc::new(MemoryApi::new(false));
        let year = api.add_album("2024", None);
        let trip = api.add_album("Trip", Some(&year));

        let snapshot = TreeSnapshot::acquire(api.clone()).await.unwrap();
        assert!(!snapshot.is_full());

        let children = snapshot.children_of(Some(&year)).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, trip);
        assert_eq!(children[0].parent_id.as_deref(), Some(year.as_str()));

        let found = snapshot.node(&trip).await.unwrap().unwrap();
        assert_eq!(found.parent_id.as_deref(), Some(year.as_str()));
        assert!(snapshot.node("missing").await.unwrap().is_none());
    }
}
