//! 批量图片处理器 - 编排层
//!
//! ## 职责
//!
//! 1. **过滤**：扩展名不在 .jpg / .jpeg / .png 中的文件直接跳过
//! 2. **落盘**：保存原始图片字节，供报告重算与图片访问使用
//! 3. **并发分析**：使用 Semaphore 限制同时进行的分析数量，结果保持上传顺序
//! 4. **合并写回**：整批记录通过 upsert 合并进记录表，不覆盖无关记录
//!
//! ## 设计特点
//!
//! - 单张图片的失败被降级为带 `error_state` 的记录，不会中断整批
//! - 只有记录表损坏才会让整批请求失败

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::error::{AppError, AppResult};
use crate::infrastructure::RecordStore;
use crate::models::{normalize_identifier, AssessmentRecord, ErrorKind, ErrorState};
use crate::services::image_repository::{is_accepted, mime_for, sanitize_filename};
use crate::services::ImageRepository;
use crate::utils::logging::{log_batch_complete, log_batch_start};
use crate::workflow::{AssessmentFlow, ItemCtx};

/// 一个上传的文件
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl UploadItem {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }

    /// 校验扩展名并清理文件名，返回可以安全落盘的文件名
    pub fn validate(&self) -> AppResult<String> {
        let rejected = || AppError::UploadRejected {
            filename: self.filename.clone(),
        };
        let safe = sanitize_filename(&self.filename).ok_or_else(rejected)?;
        if !is_accepted(&safe) {
            return Err(rejected());
        }
        Ok(safe)
    }
}

/// 单张图片的处理结果
#[derive(Debug, Clone, Serialize)]
pub struct BatchItemResult {
    /// 图片访问地址，保存失败时为空
    #[serde(rename = "image_url")]
    pub image_url: Option<String>,
    #[serde(flatten)]
    pub record: AssessmentRecord,
}

/// 整批处理结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutcome {
    pub results: Vec<BatchItemResult>,
    /// 被跳过的文件名
    pub rejected: Vec<String>,
}

impl BatchOutcome {
    pub fn degraded_count(&self) -> usize {
        self.results.iter().filter(|r| r.record.is_errored()).count()
    }
}

/// 批量处理器
pub struct BatchProcessor {
    flow: AssessmentFlow,
    images: Arc<ImageRepository>,
    store: Arc<dyn RecordStore>,
    max_concurrent: usize,
}

impl BatchProcessor {
    pub fn new(
        flow: AssessmentFlow,
        images: Arc<ImageRepository>,
        store: Arc<dyn RecordStore>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            flow,
            images,
            store,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// 分析并保存一批图片
    pub async fn process_batch(&self, items: Vec<UploadItem>) -> AppResult<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        let mut accepted = Vec::new();

        for item in items {
            match item.validate() {
                Ok(filename) => accepted.push((filename, item.bytes)),
                Err(e) => {
                    info!("⏭️ 跳过文件: {}", e);
                    outcome.rejected.push(item.filename);
                }
            }
        }

        let total = accepted.len();
        log_batch_start(total, outcome.rejected.len(), self.max_concurrent);

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::with_capacity(total);

        for (idx, (filename, bytes)) in accepted.into_iter().enumerate() {
            let ctx = ItemCtx::new(normalize_identifier(&filename), idx + 1, total);
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| AppError::Internal(e.to_string()))?;

            let flow = self.flow.clone();
            let images = self.images.clone();
            let identifier = ctx.identifier.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                process_item(&flow, &images, ctx, filename, bytes).await
            });
            handles.push((identifier, handle));
        }

        // 按上传顺序等待，保证结果顺序
        let mut results = Vec::with_capacity(total);
        for (identifier, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!("[NICAD {}] 任务执行失败: {}", identifier, e);
                    results.push(BatchItemResult {
                        image_url: None,
                        record: AssessmentRecord::failed(
                            &identifier,
                            ErrorState::new(ErrorKind::ExternalService, format!("任务执行失败: {}", e)),
                        ),
                    });
                }
            }
        }

        let records = results.iter().map(|r| r.record.clone()).collect();
        self.store.upsert_many(records).await?;

        outcome.results = results;
        log_batch_complete(total - outcome.degraded_count(), outcome.degraded_count(), total);
        Ok(outcome)
    }

    /// 分析单张图片，不保存图片也不写记录表
    pub async fn analyze_single(&self, item: UploadItem) -> AppResult<AssessmentRecord> {
        let filename = item.validate()?;
        let ctx = ItemCtx::single(normalize_identifier(&filename));
        Ok(self.flow.run(&ctx, &item.bytes, mime_for(&filename)).await)
    }
}

/// 保存并分析一张图片，失败降级为带 `error_state` 的记录
async fn process_item(
    flow: &AssessmentFlow,
    images: &ImageRepository,
    ctx: ItemCtx,
    filename: String,
    bytes: Vec<u8>,
) -> BatchItemResult {
    let stored = match images.save(&filename, &bytes).await {
        Ok(stored) => stored,
        Err(e) => {
            warn!("{} ❌ 保存图片失败: {}", ctx, e);
            return BatchItemResult {
                image_url: None,
                record: AssessmentRecord::failed(
                    &ctx.identifier,
                    ErrorState::new(ErrorKind::Upload, e.to_string()),
                ),
            };
        }
    };

    let record = flow.run(&ctx, &bytes, stored.mime()).await;
    BatchItemResult {
        image_url: Some(stored.url()),
        record,
    }
}
