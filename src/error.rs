use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::repositories::StoreError;

/// リセット失敗時にクライアントへ返す唯一のメッセージ
///
/// トークン不正・期限切れ・使用済み・弱いパスワード・DBエラーのいずれも区別しない
pub const RESET_FAILURE_MESSAGE: &str = "無効または期限切れのリンクです";

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("バリデーションエラー: {0}")]
    Validation(String),

    #[error("認証エラー")]
    Authentication,

    #[error("ユーザーが見つかりません")]
    SubjectNotFound,

    #[error("レート制限超過")]
    RateLimited,

    #[error("無効または期限切れのトークンです")]
    TokenInvalid,

    #[error("永続化エラー: {0}")]
    Persistence(#[from] StoreError),

    #[error("内部エラー")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // 原因はログにのみ残し、レスポンスは常に同一
        match &self {
            Self::Validation(msg) => {
                tracing::info!(reason = %msg, "リクエスト拒否: バリデーションエラー");
            }
            Self::Authentication
            | Self::SubjectNotFound
            | Self::RateLimited
            | Self::TokenInvalid => {
                tracing::info!(error = %self, "リクエスト拒否");
            }
            Self::Persistence(e) => {
                tracing::error!(error = ?e, "永続化エラー");
            }
            Self::Internal(e) => {
                tracing::error!(error = ?e, "内部エラー");
            }
        }

        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: RESET_FAILURE_MESSAGE,
            }),
        )
            .into_response()
    }
}
