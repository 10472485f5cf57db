//! 评估流程 - 流程层
//!
//! 核心职责：定义"一张图片"的完整处理流程
//!
//! 流程顺序：
//! 1. 调用视觉分析服务（超时与重试由服务包装负责）
//! 2. 解析返回文本
//! 3. 任何一步失败都降级为带 `error_state` 的记录，不向上抛错

use std::sync::Arc;

use tracing::{info, warn};

use crate::models::{AssessmentRecord, ErrorKind, ErrorState};
use crate::services::{parse_response, Analyzer};
use crate::utils::truncate_text;
use crate::workflow::item_ctx::ItemCtx;

/// 单张图片的评估流程
///
/// - 不持有任何存储资源
/// - 只依赖业务能力（services）
#[derive(Clone)]
pub struct AssessmentFlow {
    analyzer: Arc<dyn Analyzer>,
}

impl AssessmentFlow {
    pub fn new(analyzer: Arc<dyn Analyzer>) -> Self {
        Self { analyzer }
    }

    /// 分析一张图片并得到记录，总是成功
    pub async fn run(&self, ctx: &ItemCtx, image: &[u8], mime: &str) -> AssessmentRecord {
        info!("{} 🔍 开始分析 ({} 字节)", ctx, image.len());

        let text = match self.analyzer.analyze(image, mime).await {
            Ok(text) => text,
            Err(e) => {
                warn!("{} ❌ 分析服务调用失败: {}", ctx, e);
                return AssessmentRecord::failed(
                    &ctx.identifier,
                    ErrorState::new(ErrorKind::ExternalService, e.to_string()),
                );
            }
        };

        let record = parse_response(&ctx.identifier, &text);
        match &record.error_state {
            Some(error) => warn!(
                "{} ⚠️ 返回内容无法解析: {} | {}",
                ctx,
                error.message,
                truncate_text(&text, 80)
            ),
            None if record.is_complete() => info!("{} ✓ 分析完成", ctx),
            None => info!("{} ✓ 分析完成（部分字段未指定）", ctx),
        }
        record
    }
}
