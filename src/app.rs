//! 应用装配
//!
//! 按配置创建各层组件，并启动 HTTP 服务

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::api::{router, AppState};
use crate::config::Config;
use crate::infrastructure::{FileRecordStore, RecordStore};
use crate::orchestrator::BatchProcessor;
use crate::report::{LayoutConfig, ReportRenderer};
use crate::services::{build_analyzer, Analyzer, ImageRepository};
use crate::utils::logging::log_startup;
use crate::workflow::AssessmentFlow;

/// 应用主结构
pub struct App {
    config: Config,
    state: AppState,
}

impl App {
    /// 使用真实的视觉模型初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        let analyzer = build_analyzer(&config);
        Self::with_analyzer(config, analyzer).await
    }

    /// 使用指定的分析服务初始化应用
    pub async fn with_analyzer(config: Config, analyzer: Arc<dyn Analyzer>) -> Result<Self> {
        for dir in [&config.upload_folder, &config.result_folder] {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("无法创建目录: {}", dir))?;
        }

        log_startup(&config);

        let state = build_state(&config, analyzer);
        Ok(Self { config, state })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// 运行 HTTP 服务直到进程退出
    pub async fn run(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.config.bind_addr)
            .await
            .with_context(|| format!("无法监听地址: {}", self.config.bind_addr))?;
        info!("🚀 服务已就绪: http://{}", self.config.bind_addr);

        axum::serve(listener, router(self.state))
            .await
            .context("HTTP 服务异常退出")?;
        Ok(())
    }
}

/// 按配置组装各层组件
pub fn build_state(config: &Config, analyzer: Arc<dyn Analyzer>) -> AppState {
    let store: Arc<dyn RecordStore> = Arc::new(
        FileRecordStore::new(config.store_path()).with_export(config.export_path()),
    );
    let images = Arc::new(ImageRepository::new(&config.upload_folder));
    let flow = AssessmentFlow::new(analyzer);

    let batch = Arc::new(BatchProcessor::new(
        flow.clone(),
        images.clone(),
        store.clone(),
        config.max_concurrent_analyses,
    ));
    let reports = Arc::new(ReportRenderer::new(
        store.clone(),
        images.clone(),
        flow,
        LayoutConfig::default().with_wrap_width(config.report_wrap_width),
    ));

    AppState {
        batch,
        reports,
        images,
        store,
        export_path: config.export_path(),
    }
}
