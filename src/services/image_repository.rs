//! 上传图片仓库 - 业务能力层
//!
//! 只负责"保存 / 查找 / 读取源图片"，不关心流程

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::error::{AppError, AppResult};

/// 允许的扩展名，顺序即查找优先级
pub const ACCEPTED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// 已保存的图片
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    /// 磁盘上的文件名（含扩展名）
    pub filename: String,
    pub path: PathBuf,
}

impl StoredImage {
    pub fn mime(&self) -> &'static str {
        mime_for(&self.filename)
    }

    /// 对外访问地址
    pub fn url(&self) -> String {
        format!("/uploads/{}", self.filename)
    }
}

/// 文件扩展名是否被接受（忽略大小写）
pub fn is_accepted(filename: &str) -> bool {
    extension_of(filename)
        .map(|ext| ACCEPTED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

pub fn mime_for(filename: &str) -> &'static str {
    match extension_of(filename).as_deref() {
        Some("png") => "image/png",
        _ => "image/jpeg",
    }
}

/// 只保留文件名部分，并替换掉不安全的字符
pub fn sanitize_filename(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    (!cleaned.is_empty()).then_some(cleaned)
}

/// 上传目录
pub struct ImageRepository {
    root: PathBuf,
}

impl ImageRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 保存原始字节，同名文件直接覆盖
    pub async fn save(&self, filename: &str, bytes: &[u8]) -> AppResult<StoredImage> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| AppError::io(&self.root, e))?;
        let path = self.root.join(filename);
        fs::write(&path, bytes)
            .await
            .map_err(|e| AppError::io(&path, e))?;
        debug!("已保存图片: {} ({} 字节)", path.display(), bytes.len());
        Ok(StoredImage {
            filename: filename.to_string(),
            path,
        })
    }

    /// 按 `.jpg` → `.jpeg` → `.png` 的顺序查找标识对应的源图片
    ///
    /// 每个扩展名先试小写再试大写
    pub async fn find(&self, identifier: &str) -> Option<StoredImage> {
        for ext in ACCEPTED_EXTENSIONS {
            for candidate_ext in [ext.to_string(), ext.to_ascii_uppercase()] {
                let filename = format!("{}.{}", identifier, candidate_ext);
                let path = self.root.join(&filename);
                if fs::metadata(&path).await.is_ok_and(|m| m.is_file()) {
                    return Some(StoredImage { filename, path });
                }
            }
        }
        None
    }

    /// 读取 `find` 找到的图片
    pub async fn load(&self, image: &StoredImage) -> AppResult<Vec<u8>> {
        fs::read(&image.path)
            .await
            .map_err(|e| AppError::io(&image.path, e))
    }

    /// 按对外文件名读取已保存的图片
    pub async fn read(&self, filename: &str) -> AppResult<Vec<u8>> {
        let Some(safe) = sanitize_filename(filename).filter(|safe| safe == filename) else {
            return Err(AppError::not_found(filename));
        };
        let path = self.root.join(&safe);
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(AppError::not_found(filename)),
            Err(e) => Err(AppError::io(&path, e)),
        }
    }
}
