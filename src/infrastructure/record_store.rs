//! 记录表 - 基础设施层
//!
//! 记录表是所有评估记录唯一的持久化形式。
//!
//! ## 约束
//! - 每次操作都重新加载文件，不在请求之间缓存（服务可能多实例部署）
//! - 所有写操作经过同一把互斥锁串行执行，避免"读-改-写"交错导致更新丢失
//! - 写入先落到同目录临时文件，再原子替换，读方不会看到写了一半的表
//! - 文件不存在视为空表；文件存在但无法读取或解析则返回 `StoreCorrupt`

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{AppError, AppResult};
use crate::infrastructure::export::records_to_csv;
use crate::models::{normalize_identifier, AssessmentRecord};

/// 记录存储抽象，后端可以是平面文件或嵌入式数据库
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// 插入或整体替换一条记录
    async fn upsert(&self, identifier: &str, record: AssessmentRecord) -> AppResult<()>;

    /// 批量 upsert，同一批内重复的标识以最后一条为准
    async fn upsert_many(&self, records: Vec<AssessmentRecord>) -> AppResult<()> {
        for record in records {
            let identifier = record.identifier.clone();
            self.upsert(&identifier, record).await?;
        }
        Ok(())
    }

    async fn get(&self, identifier: &str) -> AppResult<Option<AssessmentRecord>>;

    /// 全部记录，顺序无语义
    async fn list(&self) -> AppResult<Vec<AssessmentRecord>>;
}

/// 磁盘上的表结构
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredTable {
    records: Vec<AssessmentRecord>,
}

/// 基于 JSON 文件的记录表，每次写入后同时刷新 CSV 导出
pub struct FileRecordStore {
    table_path: PathBuf,
    export_path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl FileRecordStore {
    pub fn new(table_path: impl Into<PathBuf>) -> Self {
        Self {
            table_path: table_path.into(),
            export_path: None,
            write_lock: Mutex::new(()),
        }
    }

    /// 每次写入后在该路径同步生成 CSV 导出
    pub fn with_export(mut self, export_path: impl Into<PathBuf>) -> Self {
        self.export_path = Some(export_path.into());
        self
    }

    pub fn table_path(&self) -> &Path {
        &self.table_path
    }

    pub fn export_path(&self) -> Option<&Path> {
        self.export_path.as_deref()
    }

    async fn load(&self) -> AppResult<Vec<AssessmentRecord>> {
        let bytes = match tokio::fs::read(&self.table_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("记录表不存在，视为空表: {}", self.table_path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(AppError::store_corrupt(&self.table_path, e)),
        };
        let table: StoredTable = serde_json::from_slice(&bytes)
            .map_err(|e| AppError::store_corrupt(&self.table_path, e))?;
        Ok(table.records)
    }

    async fn persist(&self, records: Vec<AssessmentRecord>) -> AppResult<()> {
        let count = records.len();
        let table = StoredTable { records };
        let json = serde_json::to_vec_pretty(&table)
            .map_err(|e| AppError::Internal(format!("序列化记录表失败: {}", e)))?;
        write_atomic(&self.table_path, json).await?;

        if let Some(export_path) = &self.export_path {
            let csv = records_to_csv(&table.records)?;
            write_atomic(export_path, csv).await?;
        }

        debug!("记录表已写入: {} 条 → {}", count, self.table_path.display());
        Ok(())
    }

    /// 在写锁内完成一次 加载 → 修改 → 写回
    async fn modify<F>(&self, apply: F) -> AppResult<()>
    where
        F: FnOnce(&mut Vec<AssessmentRecord>) + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load().await?;
        apply(&mut records);
        self.persist(records).await
    }
}

/// 替换或追加一行（按规范化后的标识匹配）
fn replace_row(records: &mut Vec<AssessmentRecord>, mut record: AssessmentRecord) {
    let key = normalize_identifier(&record.identifier);
    records.retain(|existing| normalize_identifier(&existing.identifier) != key);
    record.identifier = key;
    records.push(record);
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn upsert(&self, identifier: &str, mut record: AssessmentRecord) -> AppResult<()> {
        record.identifier = normalize_identifier(identifier);
        self.modify(move |records| replace_row(records, record)).await
    }

    async fn upsert_many(&self, records: Vec<AssessmentRecord>) -> AppResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let count = records.len();
        self.modify(move |existing| {
            for record in records {
                replace_row(existing, record);
            }
        })
        .await?;
        info!("💾 已合并 {} 条记录到记录表", count);
        Ok(())
    }

    async fn get(&self, identifier: &str) -> AppResult<Option<AssessmentRecord>> {
        let key = normalize_identifier(identifier);
        Ok(self
            .load()
            .await?
            .into_iter()
            .find(|record| normalize_identifier(&record.identifier) == key))
    }

    async fn list(&self) -> AppResult<Vec<AssessmentRecord>> {
        self.load().await
    }
}

/// 写入同目录临时文件后原子替换目标文件
async fn write_atomic(path: &Path, bytes: Vec<u8>) -> AppResult<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> AppResult<()> {
        use std::io::Write;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| AppError::io(&dir, e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| AppError::io(&dir, e))?;
        tmp.write_all(&bytes).map_err(|e| AppError::io(tmp.path(), e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| AppError::io(tmp.path(), e))?;
        tmp.persist(&path)
            .map_err(|e| AppError::io(&path, e.error))?;
        Ok(())
    })
    .await?
}
