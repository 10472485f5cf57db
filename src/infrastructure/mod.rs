//! 基础设施层：持有持久化资源（记录表文件），只暴露存取能力

pub mod export;
pub mod record_store;

pub use export::records_to_csv;
pub use record_store::{FileRecordStore, RecordStore};
