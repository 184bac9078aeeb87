//! 下载时的本地命名冲突处理
//!
//! 远程允许同名照片和同名相册，下载到同一目录时需要用远程 id 区分。

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// 在名称的扩展名之前插入 `[id]`：`a.jpg` -> `a.[id].jpg`，`a` -> `a.[id]`
pub fn tagged_name(name: &str, id: &str) -> String {
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{}.[{}]{}", &name[..dot], id, &name[dot..]),
        _ => format!("{}.[{}]", name, id),
    }
}

/// 一批下载中已占用的 (目录, 文件名)
#[derive(Debug, Default)]
pub struct CollisionGuard {
    claimed: Mutex<HashSet<(PathBuf, String)>>,
}

impl CollisionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn claimed(&self) -> MutexGuard<'_, HashSet<(PathBuf, String)>> {
        self.claimed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 占用一个文件名，已被占用时改用带 id 的名称；检查和占用在同一临界区内完成
    pub fn claim(&self, directory: &Path, name: &str, photo_id: &str) -> PathBuf {
        let mut claimed = self.claimed();

        let mut chosen = name.to_string();
        if claimed.contains(&(directory.to_path_buf(), chosen.clone())) {
            chosen = tagged_name(name, photo_id);
            debug!("文件名冲突: {} -> {}", name, chosen);
        }
        claimed.insert((directory.to_path_buf(), chosen.clone()));

        directory.join(chosen)
    }

    /// 一批下载结束后清空
    pub fn reset(&self) {
        self.claimed().clear();
    }

    pub fn len(&self) -> usize {
        self.claimed().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 同一父相册下已使用的子目录名
///
/// 只在遍历一个相册的子相册时使用，不跨父相册共享。
#[derive(Debug, Default)]
pub struct SiblingTitles {
    seen: HashSet<String>,
}

impl SiblingTitles {
    pub fn new() -> Self {
        Self::default()
    }

    /// 第一个出现的标题原样使用，之后的同名相册追加 `.[id]`
    pub fn claim(&mut self, title: &str, album_id: &str) -> String {
        if self.seen.insert(title.to_string()) {
            return title.to_string();
        }
        let tagged = format!("{}.[{}]", title, album_id);
        self.seen.insert(tagged.clone());
        tagged
    }
}
