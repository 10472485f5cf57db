//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量处理和调度，不做具体业务判断。
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<UploadItem>)
//!     ↓
//! workflow::AssessmentFlow (处理单张图片)
//!     ↓
//! services (能力层：analyzer / parser / images)
//!     ↓
//! infrastructure (基础设施：RecordStore)
//! ```
//!
//! 报告生成（`report::ReportRenderer`）同样只向下依赖 workflow 与 infrastructure。

pub mod batch_processor;

pub use batch_processor::{BatchItemResult, BatchOutcome, BatchProcessor, UploadItem};
