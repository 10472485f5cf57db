//! 错误类型
//!
//! 按照处理策略划分：
//! - 单条图片的失败（上传被拒、外部服务失败、解析失败）在编排层被降级为带 `error_state` 的记录
//! - 记录表损坏、请求格式错误才会中断当前操作

use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 文件扩展名不在允许列表中（.jpg / .jpeg / .png）
    #[error("上传被拒绝: {filename} (仅接受 .jpg / .jpeg / .png)")]
    UploadRejected { filename: String },

    /// 外部视觉分析服务调用失败
    #[error("外部分析服务错误: {0}")]
    ExternalService(#[from] AnalyzerError),

    /// 记录表存在但无法读取或内容损坏
    #[error("记录表已损坏 ({path}): {reason}")]
    StoreCorrupt { path: String, reason: String },

    /// 既没有记录也没有源图片
    #[error("未找到: {identifier}")]
    NotFound { identifier: String },

    /// 文件读写失败
    #[error("文件操作失败 ({path}): {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// PDF 生成失败
    #[error("报告渲染失败: {0}")]
    Render(String),

    /// 请求格式错误
    #[error("请求无效: {0}")]
    BadRequest(String),

    /// 后台任务异常等内部错误
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 外部分析服务错误
///
/// 只有 `Timeout` 和 `Transient` 会被重试
#[derive(Debug, Clone, Error)]
pub enum AnalyzerError {
    /// 单次调用超时
    #[error("调用超时 ({0:?})")]
    Timeout(Duration),

    /// 网络错误、频率限制、服务端 5xx
    #[error("临时故障: {0}")]
    Transient(String),

    /// 鉴权失败、配额耗尽、请求被拒等不可重试的错误
    #[error("{0}")]
    Permanent(String),

    /// 服务返回了空内容
    #[error("分析服务返回内容为空")]
    EmptyResponse,
}

impl AnalyzerError {
    /// 是否值得重试
    pub fn is_transient(&self) -> bool {
        matches!(self, AnalyzerError::Timeout(_) | AnalyzerError::Transient(_))
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建文件操作错误
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        AppError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// 创建记录表损坏错误
    pub fn store_corrupt(path: impl AsRef<Path>, reason: impl ToString) -> Self {
        AppError::StoreCorrupt {
            path: path.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }

    /// 创建未找到错误
    pub fn not_found(identifier: impl Into<String>) -> Self {
        AppError::NotFound {
            identifier: identifier.into(),
        }
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("后台任务执行失败: {}", err))
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::Config(format!("TOML解析失败: {}", err))
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
