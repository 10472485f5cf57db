//! 图片处理上下文
//!
//! 封装"我正在处理哪一批的第几张图片"这一信息

use std::fmt::Display;

/// 图片处理上下文
#[derive(Debug, Clone)]
pub struct ItemCtx {
    /// 地块标识（去掉扩展名的文件名）
    pub identifier: String,

    /// 图片在批次中的位置（从1开始，仅用于日志显示）
    pub item_index: usize,

    /// 批次大小
    pub batch_size: usize,
}

impl ItemCtx {
    pub fn new(identifier: impl Into<String>, item_index: usize, batch_size: usize) -> Self {
        Self {
            identifier: identifier.into(),
            item_index,
            batch_size,
        }
    }

    /// 单张图片（分析接口、报告重算）使用的上下文
    pub fn single(identifier: impl Into<String>) -> Self {
        Self::new(identifier, 1, 1)
    }
}

impl Display for ItemCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[图片 {}/{} NICAD#{}]",
            self.item_index, self.batch_size, self.identifier
        )
    }
}
