//! HTTP 错误映射

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

use crate::error::AppError;

/// 把 `AppError` 转成 HTTP 响应
pub struct ApiError(pub AppError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::UploadRejected { .. } | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("请求处理失败: {}", self.0);
        }
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<AppError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl From<axum::extract::multipart::MultipartError> for AppError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        AppError::BadRequest(format!("multipart 解析失败: {}", err))
    }
}

impl From<axum::http::Error> for AppError {
    fn from(err: axum::http::Error) -> Self {
        AppError::Internal(format!("构建响应失败: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError(AppError::not_found("X")).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError(AppError::UploadRejected { filename: "a.gif".into() }).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError(AppError::store_corrupt("t.json", "bad")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
