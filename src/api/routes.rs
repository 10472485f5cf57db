//! HTTP 路由
//!
//! | 方法 | 路径 | 说明 |
//! |---|---|---|
//! | POST | `/analyze` | 批量分析并保存（multipart 字段 `images`） |
//! | POST | `/analyze/single` | 单张分析，不保存（multipart 字段 `image`） |
//! | GET | `/telecharger` | 下载 CSV 导出（尚无记录时只有表头） |
//! | GET | `/records` | 全部记录（JSON） |
//! | GET | `/report/{identifier}` | PDF 报告，未找到时 404 并返回占位 PDF |
//! | GET | `/uploads/{filename}` | 已上传的源图片 |

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::error::ApiError;
use crate::error::{AppError, AppResult};
use crate::infrastructure::{records_to_csv, RecordStore};
use crate::models::AssessmentRecord;
use crate::orchestrator::{BatchOutcome, BatchProcessor, UploadItem};
use crate::report::ReportRenderer;
use crate::services::image_repository::mime_for;
use crate::services::ImageRepository;

/// 单次上传的大小上限
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub batch: Arc<BatchProcessor>,
    pub reports: Arc<ReportRenderer>,
    pub images: Arc<ImageRepository>,
    pub store: Arc<dyn RecordStore>,
    pub export_path: PathBuf,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/analyze", post(analyze_batch))
        .route("/analyze/single", post(analyze_single))
        .route("/telecharger", get(download_export))
        .route("/records", get(list_records))
        .route("/report/{identifier}", get(report))
        .route("/uploads/{filename}", get(uploaded_file))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 读取 multipart 中指定字段名的所有文件
async fn collect_files(multipart: &mut Multipart, field_name: &str) -> AppResult<Vec<UploadItem>> {
    let mut items = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(field_name) {
            continue;
        }
        let Some(filename) = field.file_name().map(str::to_owned) else {
            continue;
        };
        let bytes = field.bytes().await?;
        items.push(UploadItem::new(filename, bytes.to_vec()));
    }
    Ok(items)
}

async fn analyze_batch(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<BatchOutcome>, ApiError> {
    let items = collect_files(&mut multipart, "images").await?;
    info!("📥 收到 {} 个上传文件", items.len());
    let outcome = state.batch.process_batch(items).await?;
    Ok(Json(outcome))
}

async fn analyze_single(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<AssessmentRecord>, ApiError> {
    let item = collect_files(&mut multipart, "image")
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::BadRequest("缺少图片字段 image".into()))?;
    let record = state.batch.analyze_single(item).await?;
    Ok(Json(record))
}

async fn download_export(State(state): State<AppState>) -> Result<Response, ApiError> {
    let bytes = match tokio::fs::read(&state.export_path).await {
        Ok(bytes) => bytes,
        // 尚未写入过记录表：按当前（空）表生成，只有表头
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            records_to_csv(&state.store.list().await?)?
        }
        Err(e) => return Err(AppError::io(&state.export_path, e).into()),
    };
    let filename = state
        .export_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "analyse.csv".to_string());

    let response = Response::builder()
        .header(header::CONTENT_TYPE, "text/csv; charset=utf-8")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        )
        .body(Body::from(bytes))
        .map_err(AppError::from)?;
    Ok(response)
}

async fn list_records(State(state): State<AppState>) -> Result<Json<Vec<AssessmentRecord>>, ApiError> {
    Ok(Json(state.store.list().await?))
}

async fn report(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<Response, ApiError> {
    let rendered = state.reports.render(&identifier).await?;
    let status = if rendered.is_found() {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };

    let response = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/pdf")
        .header(
            header::CONTENT_DISPOSITION,
            format!("inline; filename=\"rapport_{}.pdf\"", rendered.identifier),
        )
        .body(Body::from(rendered.pdf))
        .map_err(AppError::from)?;
    Ok(response)
}

async fn uploaded_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    let bytes = state.images.read(&filename).await?;
    let response = Response::builder()
        .header(header::CONTENT_TYPE, mime_for(&filename))
        .body(Body::from(bytes))
        .map_err(AppError::from)?;
    Ok(response)
}
