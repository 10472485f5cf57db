//! 报告生成
//!
//! 读穿缓存：记录完整则直接渲染；记录缺失或不完整时，若能找到源图片就重新分析、
//! 写回记录表后再渲染；两者都没有则渲染"未找到"占位报告。

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::AppResult;
use crate::infrastructure::RecordStore;
use crate::models::normalize_identifier;
use crate::report::layout::{layout_not_found, layout_record, LayoutConfig};
use crate::report::pdf;
use crate::services::{ImageRepository, StoredImage};
use crate::workflow::{AssessmentFlow, ItemCtx};

/// 报告来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportSource {
    /// 记录表中的完整记录
    Stored,
    /// 重新分析源图片得到的记录
    Recomputed,
    /// 记录不完整且没有源图片，按现有记录降级输出
    Degraded,
    /// 既无记录也无源图片
    NotFound,
}

/// 渲染结果
#[derive(Debug, Clone)]
pub struct RenderedReport {
    pub identifier: String,
    pub source: ReportSource,
    pub pdf: Vec<u8>,
}

impl RenderedReport {
    pub fn is_found(&self) -> bool {
        self.source != ReportSource::NotFound
    }
}

pub struct ReportRenderer {
    store: Arc<dyn RecordStore>,
    images: Arc<ImageRepository>,
    flow: AssessmentFlow,
    layout: LayoutConfig,
}

impl ReportRenderer {
    pub fn new(
        store: Arc<dyn RecordStore>,
        images: Arc<ImageRepository>,
        flow: AssessmentFlow,
        layout: LayoutConfig,
    ) -> Self {
        Self {
            store,
            images,
            flow,
            layout,
        }
    }

    /// 渲染一份报告
    ///
    /// 只有记录表损坏和 PDF 生成失败会返回错误；"未找到" 以 `ReportSource::NotFound` 表示。
    /// 源图片读取失败只记录警告，按没有图片处理。
    pub async fn render(&self, identifier: &str) -> AppResult<RenderedReport> {
        let identifier = normalize_identifier(identifier);
        let stored = self.store.get(&identifier).await?;
        let image = self.load_image(&identifier).await;

        let (record, source) = match (stored, &image) {
            (Some(record), _) if record.is_complete() => (record, ReportSource::Stored),
            (stored, Some((image, bytes))) => {
                info!(
                    "[报告 {}] 记录{}，根据源图片 {} 重新分析",
                    identifier,
                    if stored.is_some() { "不完整" } else { "不存在" },
                    image.filename
                );
                let record = self
                    .flow
                    .run(&ItemCtx::single(&identifier), bytes, image.mime())
                    .await;
                self.store.upsert(&identifier, record.clone()).await?;
                (record, ReportSource::Recomputed)
            }
            (Some(record), None) => {
                warn!("[报告 {}] 记录不完整且没有可用的源图片，按现有记录输出", identifier);
                (record, ReportSource::Degraded)
            }
            (None, None) => {
                warn!("[报告 {}] 既没有记录也没有可用的源图片", identifier);
                let layout = layout_not_found(&identifier, self.layout);
                let pdf = pdf::draw(&layout, self.page_size(), None)?;
                return Ok(RenderedReport {
                    identifier,
                    source: ReportSource::NotFound,
                    pdf,
                });
            }
        };

        let bytes = image.map(|(_, bytes)| bytes);
        let layout = layout_record(&record, self.layout, bytes.is_some());
        let pdf = pdf::draw(&layout, self.page_size(), bytes.as_deref())?;
        Ok(RenderedReport {
            identifier,
            source,
            pdf,
        })
    }

    /// 按扩展名优先级查找并读取源图片，读取失败只记录警告
    async fn load_image(&self, identifier: &str) -> Option<(StoredImage, Vec<u8>)> {
        let image = self.images.find(identifier).await?;
        match self.images.load(&image).await {
            Ok(bytes) => Some((image, bytes)),
            Err(e) => {
                warn!("[报告 {}] 读取源图片失败: {}", identifier, e);
                None
            }
        }
    }

    fn page_size(&self) -> (f32, f32) {
        (self.layout.page_width, self.layout.page_height)
    }
}
