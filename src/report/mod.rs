//! 报告层：排版（纯计算）→ PDF 绘制 → 读穿缓存的渲染入口

pub mod layout;
pub mod pdf;
pub mod renderer;

pub use layout::{layout_not_found, layout_record, LayoutConfig, ReportLayout};
pub use renderer::{RenderedReport, ReportRenderer, ReportSource};
