use std::net::SocketAddr;

use axum::{
    Json,
    extract::{ConnectInfo, State, rejection::JsonRejection},
};
use garde::Validate;
use http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::handlers::origin::client_origin;
use crate::services::IssueAck;
use crate::services::credential_updater::RESET_SUCCESS_MESSAGE;
use crate::state::AppState;

// === リセットリクエスト ===

#[derive(Debug, Deserialize)]
pub struct ResetRequestRequest {
    pub email: String,
}

/// POST /api/password/reset-request
///
/// # Security
/// 常に200と同一メッセージを返す（ユーザー存在有無・レート制限を漏洩しない）。
/// 本文が不正な場合も空の識別子として発行処理に流し、最低所要時間を守る
pub async fn request_password_reset(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    payload: Result<Json<ResetRequestRequest>, JsonRejection>,
) -> Json<IssueAck> {
    let origin = client_origin(&headers, peer, state.config.trust_forwarded_for);

    let email = match payload {
        Ok(Json(request)) => request.email,
        Err(rejection) => {
            tracing::info!(
                origin = %origin,
                reason = %rejection.body_text(),
                "パスワードリセット: 本文が不正"
            );
            String::new()
        }
    };

    Json(state.issuer.issue(&email, &origin).await)
}

// === パスワードリセット実行 ===

/// token, new_password はログに出力しない（Debug 未実装）
#[derive(Deserialize, Validate)]
pub struct ResetPasswordRequest {
    #[garde(length(min = 1, max = 512))]
    pub token: String,
    // 強度はサービス側のポリシーで検証
    #[garde(skip)]
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct ResetPasswordResponse {
    pub message: &'static str,
}

/// POST /api/password/reset
///
/// # Security
/// 失敗理由に関わらず同一のエラーレスポンスを返す
pub async fn reset_password(
    State(state): State<AppState>,
    payload: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> Result<Json<ResetPasswordResponse>, AppError> {
    let Json(request) = payload.map_err(|e| AppError::Validation(e.body_text()))?;

    // バリデーション
    request
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    state
        .updater
        .reset(&request.token, &request.new_password)
        .await?;

    Ok(Json(ResetPasswordResponse {
        message: RESET_SUCCESS_MESSAGE,
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{Body, to_bytes},
        extract::connect_info::MockConnectInfo,
        http::{Request, StatusCode, header},
    };
    use tokio::sync::mpsc::UnboundedReceiver;
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;
    use crate::error::RESET_FAILURE_MESSAGE;
    use crate::handlers::router;
    use crate::repositories::MemoryBackend;
    use crate::services::auth::hash_password;
    use crate::services::ResetNotice;
    use crate::services::notification::testing::RecordingDispatcher;
    use crate::services::token_issuer::ISSUE_ACK_MESSAGE;

    type Notices = UnboundedReceiver<(String, ResetNotice)>;

    fn test_state(backend: MemoryBackend) -> (AppState, Notices) {
        test_state_with_floor(backend, 0)
    }

    fn test_state_with_floor(backend: MemoryBackend, floor_millis: u64) -> (AppState, Notices) {
        let config = Config::from_pairs(vec![
            (
                "DATABASE_URL".to_string(),
                "postgres://localhost/resetgate".to_string(),
            ),
            (
                "RESET_MIN_RESPONSE_MILLIS".to_string(),
                floor_millis.to_string(),
            ),
        ])
        .unwrap();
        let (dispatcher, rx) = RecordingDispatcher::new(true);
        (AppState::in_memory(backend, Arc::new(dispatcher), config), rx)
    }

    fn app(state: AppState) -> axum::Router {
        router(state).layer(MockConnectInfo(SocketAddr::from(([192, 0, 2, 1], 40000))))
    }

    fn peer() -> ConnectInfo<SocketAddr> {
        ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 40000)))
    }

    #[tokio::test]
    async fn test_request_reset_same_body_for_known_and_unknown() {
        let backend = MemoryBackend::new();
        backend.insert_subject("user@example.com", None);
        let (state, _rx) = test_state(backend);

        let known = request_password_reset(
            State(state.clone()),
            peer(),
            HeaderMap::new(),
            Ok(Json(ResetRequestRequest {
                email: "user@example.com".to_string(),
            })),
        )
        .await;
        let unknown = request_password_reset(
            State(state),
            peer(),
            HeaderMap::new(),
            Ok(Json(ResetRequestRequest {
                email: "nobody@example.com".to_string(),
            })),
        )
        .await;

        assert_eq!(known.0, unknown.0);
        assert_eq!(known.message, ISSUE_ACK_MESSAGE);
    }

    #[tokio::test]
    async fn test_reset_with_invalid_token_fails() {
        let (state, _rx) = test_state(MemoryBackend::new());

        let result = reset_password(
            State(state),
            Ok(Json(ResetPasswordRequest {
                token: "does-not-exist".to_string(),
                new_password: "NewPassword2".to_string(),
            })),
        )
        .await;
        assert!(matches!(result, Err(AppError::TokenInvalid)));
    }

    #[tokio::test]
    async fn test_reset_with_empty_token_fails_validation() {
        let (state, _rx) = test_state(MemoryBackend::new());

        let result = reset_password(
            State(state),
            Ok(Json(ResetPasswordRequest {
                token: String::new(),
                new_password: "NewPassword2".to_string(),
            })),
        )
        .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_router_full_flow() {
        let backend = MemoryBackend::new();
        backend.insert_subject(
            "user@example.com",
            Some(hash_password("OldPassword1").unwrap()),
        );
        let (state, mut rx) = test_state(backend);
        let app = app(state);

        let response = app
            .clone()
            .oneshot(
                Request::post("/api/password/reset-request")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"email":"user@example.com"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let (_, notice) = rx.recv().await.unwrap();
        let token = notice.link().split_once("token=").unwrap().1.to_string();

        let reset_body = serde_json::json!({
            "token": token,
            "new_password": "NewPassword2",
        })
        .to_string();
        let response = app
            .clone()
            .oneshot(
                Request::post("/api/password/reset")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(reset_body.clone()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // 再利用は一律のエラー
        let response = app
            .oneshot(
                Request::post("/api/password/reset")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(reset_body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], RESET_FAILURE_MESSAGE);
    }

    #[tokio::test]
    async fn test_router_weak_password_same_failure_body() {
        let (state, _rx) = test_state(MemoryBackend::new());
        let app = app(state);

        let response = app
            .oneshot(
                Request::post("/api/password/reset")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"token":"anything","new_password":"weak"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], RESET_FAILURE_MESSAGE);
    }

    async fn send(
        app: &axum::Router,
        uri: &str,
        content_type: &str,
        body: &'static str,
    ) -> (StatusCode, serde_json::Value) {
        let response = app
            .clone()
            .oneshot(
                Request::post(uri)
                    .header(header::CONTENT_TYPE, content_type)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_malformed_request_body_gets_padded_ack() {
        let floor = std::time::Duration::from_millis(80);
        let (state, _rx) = test_state_with_floor(MemoryBackend::new(), 80);
        let app = app(state);

        let cases = [
            ("application/json", "{}"),
            ("application/json", r#"{"email":5}"#),
            ("application/json", "not json"),
            ("text/plain", r#"{"email":"user@example.com"}"#),
        ];
        for (content_type, body) in cases {
            let started = std::time::Instant::now();
            let (status, json) =
                send(&app, "/api/password/reset-request", content_type, body).await;

            assert_eq!(status, StatusCode::OK, "{body}");
            assert_eq!(json["message"], ISSUE_ACK_MESSAGE);
            assert!(started.elapsed() >= floor, "{body} returned early");
        }
    }

    #[tokio::test]
    async fn test_malformed_reset_body_same_failure_body() {
        let (state, _rx) = test_state(MemoryBackend::new());
        let app = app(state);

        let cases = [
            ("application/json", "garbage"),
            ("application/json", r#"{"token":"abc"}"#),
            ("application/json", r#"{"token":1,"new_password":"NewPassword2"}"#),
            ("text/plain", r#"{"token":"abc","new_password":"NewPassword2"}"#),
        ];
        for (content_type, body) in cases {
            let (status, json) = send(&app, "/api/password/reset", content_type, body).await;

            assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
            assert_eq!(json["error"], RESET_FAILURE_MESSAGE);
        }
    }
}
