use std::sync::Arc;

use garde::Validate;
use serde::Serialize;
use time::{Duration, OffsetDateTime};
use tokio::time::Instant;

use crate::config::Config;
use crate::error::AppError;
use crate::models::{NewResetRequest, ResetRequest};
use crate::repositories::{SubjectLookup, TokenStore};
use crate::services::notification::{NotificationDispatcher, ResetNotice, spawn_dispatch};
use crate::services::rate_limiter::RateLimiter;
use crate::services::token::{ResetToken, build_reset_link, burn_token_cost};

/// リセット要求に対する唯一のレスポンスメッセージ
pub const ISSUE_ACK_MESSAGE: &str =
    "該当するアカウントが存在する場合、パスワードリセット手順をメールで送信しました";

/// リセット要求への応答（常に同一）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssueAck {
    pub message: &'static str,
}

impl IssueAck {
    pub fn generic() -> Self {
        Self {
            message: ISSUE_ACK_MESSAGE,
        }
    }
}

#[derive(Validate)]
struct IdentifierInput {
    #[garde(email, length(max = 254))]
    email: String,
}

/// 発行処理の設定
#[derive(Debug, Clone)]
pub struct IssuerSettings {
    pub token_ttl: Duration,
    pub reset_url_base: String,
    /// 応答までの最低所要時間
    pub min_response_time: std::time::Duration,
}

impl IssuerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            token_ttl: config.token_ttl(),
            reset_url_base: config.password_reset_url_base.clone(),
            min_response_time: config.min_response_time(),
        }
    }
}

/// パスワードリセットトークンの発行
///
/// # Security
/// - ユーザー不在・レート制限・入力不正・内部エラーのいずれでも同じ応答を返す
/// - 全経路で同等の計算を行い、最低所要時間までパディングする
/// - トークン（平文）はログに出力しない
#[derive(Clone)]
pub struct TokenIssuer {
    subjects: Arc<dyn SubjectLookup>,
    tokens: Arc<dyn TokenStore>,
    rate_limiter: RateLimiter,
    dispatcher: Arc<dyn NotificationDispatcher>,
    settings: IssuerSettings,
}

impl TokenIssuer {
    pub fn new(
        subjects: Arc<dyn SubjectLookup>,
        tokens: Arc<dyn TokenStore>,
        rate_limiter: RateLimiter,
        dispatcher: Arc<dyn NotificationDispatcher>,
        settings: IssuerSettings,
    ) -> Self {
        Self {
            subjects,
            tokens,
            rate_limiter,
            dispatcher,
            settings,
        }
    }

    /// パスワードリセットをリクエスト
    pub async fn issue(&self, identifier: &str, origin: &str) -> IssueAck {
        let started = Instant::now();

        match self.try_issue(identifier, origin).await {
            Ok(request) => {
                tracing::info!(
                    subject_id = %request.subject_id,
                    request_id = %request.id,
                    origin = %origin,
                    "パスワードリセットトークン発行"
                );
            }
            Err(AppError::SubjectNotFound) => {
                tracing::info!(origin = %origin, "パスワードリセット: ユーザー不在（成功レスポンス返却）");
            }
            Err(AppError::RateLimited) => {
                tracing::warn!(origin = %origin, "パスワードリセット: レート制限（成功レスポンス返却）");
            }
            Err(AppError::Validation(reason)) => {
                tracing::info!(origin = %origin, reason = %reason, "パスワードリセット: 入力不正（成功レスポンス返却）");
            }
            Err(e) => {
                tracing::error!(error = ?e, origin = %origin, "パスワードリセット: 発行失敗（成功レスポンス返却）");
            }
        }

        tokio::time::sleep_until(started + self.settings.min_response_time).await;

        IssueAck::generic()
    }

    async fn try_issue(&self, identifier: &str, origin: &str) -> Result<ResetRequest, AppError> {
        // 1. 入力検証
        let input = IdentifierInput {
            email: identifier.trim().to_string(),
        };
        if let Err(report) = input.validate() {
            burn_token_cost();
            return Err(AppError::Validation(report.to_string()));
        }

        // 2. レート制限
        if !self.rate_limiter.check_and_record(origin).await.is_allowed() {
            burn_token_cost();
            return Err(AppError::RateLimited);
        }

        // 3. ユーザー検索
        let subject = match self.subjects.find_by_identifier(&input.email).await {
            Ok(Some(subject)) => subject,
            Ok(None) => {
                burn_token_cost();
                return Err(AppError::SubjectNotFound);
            }
            Err(e) => {
                burn_token_cost();
                return Err(e.into());
            }
        };

        // 4. トークン生成・既存要求の置換・保存
        let token = ResetToken::generate();
        let expires_at = OffsetDateTime::now_utc() + self.settings.token_ttl;
        let request = self
            .tokens
            .supersede_and_create(NewResetRequest {
                subject_id: subject.id,
                token_hash: token.hash(),
                expires_at,
                requester_ip: origin.to_string(),
            })
            .await?;

        // 5. コミット後に通知（失敗してもトークンは取り消さない）
        let notice = ResetNotice::new(
            build_reset_link(&self.settings.reset_url_base, &token),
            expires_at,
        );
        spawn_dispatch(self.dispatcher.clone(), subject.email, notice);

        Ok(request)
    }
}
