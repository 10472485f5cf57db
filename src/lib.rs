//! # Cadastre Assess
//!
//! 根据建筑照片生成地籍评估记录、持久化并输出 PDF 报告
//!
//! ## 架构设计
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有记录表文件，只暴露存取能力
//! - `FileRecordStore` - 原子写入、单写者串行化的 JSON 记录表
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单张图片
//! - `Analyzer` - 视觉模型分析能力（超时 + 重试）
//! - `response_parser` - 容错解析能力
//! - `ImageRepository` - 源图片存取能力
//!
//! ### ③ 流程层（Workflow）
//! - `AssessmentFlow` - 一张图片：分析 → 解析 → 记录
//!
//! ### ④ 编排层（Orchestration）与输出
//! - `orchestrator/batch_processor` - 批量上传处理，合并写回记录表
//! - `report/` - 排版、分页与 PDF 绘制，缺记录时读穿重算
//! - `api/` - HTTP 接口

pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod logger;
pub mod models;
pub mod orchestrator;
pub mod report;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use app::App;
pub use config::Config;
pub use error::{AnalyzerError, AppError, AppResult};
pub use infrastructure::{FileRecordStore, RecordStore};
pub use models::AssessmentRecord;
pub use orchestrator::{BatchProcessor, UploadItem};
pub use report::ReportRenderer;
pub use services::Analyzer;
pub use workflow::{AssessmentFlow, ItemCtx};
