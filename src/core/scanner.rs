use crate::error::Result;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// 本地扫描配置
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// 排除规则（glob patterns）
    pub exclude_patterns: Vec<String>,
    /// 最大文件大小（0 表示不限制）
    pub max_file_size: u64,
    /// 仅包含的扩展名（空表示不限制）
    pub include_extensions: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            exclude_patterns: vec![
                // 常见的排除模式
                ".git/**".to_string(),
                ".svn/**".to_string(),
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
                "desktop.ini".to_string(),
                "*.tmp".to_string(),
                "*.temp".to_string(),
                "*.part".to_string(),
                "~*".to_string(),
            ],
            max_file_size: 0,
            include_extensions: vec![],
        }
    }
}

/// 本地文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
}

impl LocalFile {
    /// 不含扩展名的文件名
    pub fn stem(&self) -> &str {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.name)
    }
}

/// 单个目录的直接子项
#[derive(Debug, Default)]
pub struct LocalListing {
    pub dirs: Vec<PathBuf>,
    pub files: Vec<LocalFile>,
    pub excluded: usize,
}

/// 本地目录扫描器
#[derive(Debug, Default)]
pub struct FileScanner {
    config: ScanConfig,
}

impl FileScanner {
    pub fn new(config: ScanConfig) -> Self {
        Self { config }
    }

    /// 检查名称是否应该被排除
    fn should_exclude(&self, name: &str, is_dir: bool) -> bool {
        let subject = if is_dir {
            format!("{}/", name)
        } else {
            name.to_string()
        };
        if self
            .config
            .exclude_patterns
            .iter()
            .any(|pattern| matches_pattern(&subject, pattern))
        {
            return true;
        }

        // 扩展名过滤只针对文件
        if is_dir || self.config.include_extensions.is_empty() {
            return false;
        }
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        !self
            .config
            .include_extensions
            .iter()
            .any(|e| e.trim_start_matches('.').to_lowercase() == ext)
    }

    /// 读取目录的直接子项（不递归），结果按名称排序
    pub async fn read_dir(&self, dir: &Path) -> Result<LocalListing> {
        let dir = dir.to_path_buf();
        let entries = tokio::task::spawn_blocking(move || {
            WalkDir::new(&dir)
                .min_depth(1)
                .max_depth(1)
                .follow_links(true)
                .sort_by_file_name()
                .into_iter()
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

        let mut listing = LocalListing::default();
        for entry in entries {
            let entry = entry.map_err(std::io::Error::from)?;
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry.file_type().is_dir();

            if self.should_exclude(&name, is_dir) {
                debug!("排除: {}", entry.path().display());
                listing.excluded += 1;
                continue;
            }

            if is_dir {
                listing.dirs.push(entry.into_path());
                continue;
            }

            let size = entry.metadata().map_err(std::io::Error::from)?.len();
            if self.config.max_file_size > 0 && size > self.config.max_file_size {
                debug!("跳过大文件: {} ({})", entry.path().display(), size);
                listing.excluded += 1;
                continue;
            }
            listing.files.push(LocalFile {
                path: entry.into_path(),
                name,
                size,
            });
        }

        Ok(listing)
    }
}

/// 简单的 glob 模式匹配，目录名以 `/` 结尾
fn matches_pattern(name: &str, pattern: &str) -> bool {
    let name = name.to_lowercase();
    let pattern = pattern.to_lowercase();

    // `dir/**` 匹配该目录
    if let Some(prefix) = pattern.strip_suffix("/**") {
        return name.trim_end_matches('/') == prefix;
    }

    let name = name.trim_end_matches('/');

    if pattern.contains('*') {
        let regex_pattern = regex::escape(&pattern).replace("\\*", ".*");
        if let Ok(re) = regex::Regex::new(&format!("^{}$", regex_pattern)) {
            return re.is_match(name);
        }
    }

    name == pattern
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn glob_patterns() {
        assert!(matches_pattern("a.tmp", "*.tmp"));
        assert!(matches_pattern("~lock", "~*"));
        assert!(matches_pattern(".DS_Store", ".ds_store"));
        assert!(matches_pattern(".git/", ".git/**"));
        assert!(!matches_pattern("photo.jpg", "*.tmp"));
        assert!(!matches_pattern("a.tmp.jpg", "*.tmp"));
    }

    #[tokio::test]
    async fn read_dir_splits_and_filters() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.jpg"), b"b").unwrap();
        fs::write(dir.path().join("a.jpg"), b"aa").unwrap();
        fs::write(dir.path().join("Thumbs.db"), b"x").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("c.jpg"), b"c").unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();

        let listing = FileScanner::default().read_dir(dir.path()).await.unwrap();
        let names: Vec<_> = listing.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.jpg", "b.jpg"]);
        assert_eq!(listing.files[0].size, 2);
        assert_eq!(listing.files[0].stem(), "a");
        assert_eq!(listing.dirs, vec![dir.path().join("sub")]);
        assert_eq!(listing.excluded, 2);
    }

    #[tokio::test]
    async fn extension_allow_list() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.JPG"), b"a").unwrap();
        fs::write(dir.path().join("notes.txt"), b"n").unwrap();

        let scanner = FileScanner::new(ScanConfig {
            include_extensions: vec![".jpg".to_string()],
            ..ScanConfig::default()
        });
        let listing = scanner.read_dir(dir.path()).await.unwrap();
        assert_eq!(listing.files.len(), 1);
        assert_eq!(listing.files[0].name, "a.JPG");
    }
}
