/// 日志工具模块
///
/// 提供批次日志格式化和输出的辅助函数
use tracing::info;

use crate::config::Config;

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 地籍评估服务启动");
    info!("🌐 监听地址: {}", config.bind_addr);
    info!("📁 上传目录: {}", config.upload_folder);
    info!("💾 记录表: {}", config.store_path().display());
    info!("🤖 模型: {} ({})", config.llm_model_name, config.llm_api_base_url);
    info!(
        "⏱️ 超时 {} 秒，最多重试 {} 次，单批并发 {}",
        config.analyzer_timeout_secs, config.analyzer_max_retries, config.max_concurrent_analyses
    );
    info!("{}", "=".repeat(60));
}

/// 记录批次开始信息
///
/// # 参数
/// - `accepted`: 通过扩展名校验的图片数
/// - `rejected`: 被跳过的文件数
/// - `max_concurrent`: 最大并发数
pub fn log_batch_start(accepted: usize, rejected: usize, max_concurrent: usize) {
    info!("\n{}", "=".repeat(60));
    info!("📦 开始处理批次: {} 张图片，跳过 {} 个文件", accepted, rejected);
    info!("📋 最大并发数: {}", max_concurrent);
    info!("{}", "=".repeat(60));
}

/// 记录批次完成信息
pub fn log_batch_complete(success: usize, degraded: usize, total: usize) {
    info!("\n{}", "─".repeat(60));
    info!(
        "✓ 批次完成 {}: 成功 {}/{}，降级 {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        success,
        total,
        degraded
    );
    info!("{}", "─".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("abc", 5), "abc");
        assert_eq!(truncate_text("évaluation", 3), "éva...");
    }
}
