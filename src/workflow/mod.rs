pub mod assessment_flow;
pub mod item_ctx;

pub use assessment_flow::AssessmentFlow;
pub use item_ctx::ItemCtx;
