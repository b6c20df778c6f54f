use std::sync::Arc;

use uuid::Uuid;

use crate::error::AppError;
use crate::repositories::{Consumption, SessionStore, TokenStore};
use crate::services::auth::hash_password;
use crate::services::credential_policy::CredentialPolicy;
use crate::services::token::hash_token;

/// リセット成功時のレスポンスメッセージ
pub const RESET_SUCCESS_MESSAGE: &str = "パスワードが更新されました";

/// トークンを検証してパスワードを更新する
#[derive(Clone)]
pub struct CredentialUpdater {
    tokens: Arc<dyn TokenStore>,
    sessions: Arc<dyn SessionStore>,
    policy: CredentialPolicy,
}

impl CredentialUpdater {
    pub fn new(
        tokens: Arc<dyn TokenStore>,
        sessions: Arc<dyn SessionStore>,
        policy: CredentialPolicy,
    ) -> Self {
        Self {
            tokens,
            sessions,
            policy,
        }
    }

    /// パスワードをリセット
    ///
    /// トークン消費とパスワード更新は一つのトランザクションで行う。
    /// 失敗理由（不明・期限切れ・使用済み・置換済み）はログにのみ残し、
    /// 呼び出し元には `TokenInvalid` として返す
    ///
    /// # Security
    /// - トークン・新パスワードはログに出力しない
    pub async fn reset(&self, token: &str, new_password: &str) -> Result<Uuid, AppError> {
        // ストアに触れる前にポリシー検証
        self.policy.validate(new_password)?;

        if token.is_empty() {
            return Err(AppError::TokenInvalid);
        }

        let token_hash = hash_token(token);
        let password_hash = hash_password(new_password)?;

        let subject_id = match self
            .tokens
            .consume_and_set_credential(&token_hash, &password_hash)
            .await?
        {
            Consumption::Consumed { subject_id } => subject_id,
            Consumption::Rejected(reason) => {
                tracing::warn!(reason = ?reason, "パスワードリセット: トークン拒否");
                return Err(AppError::TokenInvalid);
            }
        };

        // コミット済みのため、セッション無効化の失敗はログのみ
        match self.sessions.invalidate_all(subject_id).await {
            Ok(count) => {
                tracing::info!(subject_id = %subject_id, sessions = count, "既存セッションを無効化");
            }
            Err(e) => {
                tracing::error!(error = ?e, subject_id = %subject_id, "セッション無効化に失敗");
            }
        }

        tracing::info!(subject_id = %subject_id, "パスワードリセット完了");

        Ok(subject_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::auth::AuthService;
    use crate::test_support::Harness;

    #[tokio::test]
    async fn test_end_to_end_reset() {
        let mut harness = Harness::new();
        let subject = harness.subject("user@example.com", "OldPassword1");
        harness.backend.open_session(subject.id);

        harness.issuer.issue("user@example.com", "203.0.113.1").await;
        let token = harness.next_token().await;

        let reset = harness.updater.reset(&token, "NewPassword2").await.unwrap();
        assert_eq!(reset, subject.id);
        assert_eq!(harness.backend.session_count(subject.id), 0);

        let auth = AuthService::new(Arc::new(harness.backend.clone()));
        assert!(auth.authenticate("user@example.com", "NewPassword2").await.is_ok());
        assert!(matches!(
            auth.authenticate("user@example.com", "OldPassword1").await,
            Err(AppError::Authentication)
        ));

        // 同じトークンの再利用は拒否
        let reused = harness.updater.reset(&token, "AnotherPassword3").await;
        assert!(matches!(reused, Err(AppError::TokenInvalid)));
    }

    #[tokio::test]
    async fn test_superseded_token_rejected() {
        let mut harness = Harness::new();
        harness.subject("user@example.com", "OldPassword1");

        harness.issuer.issue("user@example.com", "203.0.113.1").await;
        let first = harness.next_token().await;
        harness.issuer.issue("user@example.com", "203.0.113.1").await;
        let second = harness.next_token().await;

        assert!(matches!(
            harness.updater.reset(&first, "NewPassword2").await,
            Err(AppError::TokenInvalid)
        ));
        assert!(harness.updater.reset(&second, "NewPassword2").await.is_ok());
    }

    #[tokio::test]
    async fn test_weak_password_does_not_burn_token() {
        let mut harness = Harness::new();
        harness.subject("user@example.com", "OldPassword1");

        harness.issuer.issue("user@example.com", "203.0.113.1").await;
        let token = harness.next_token().await;

        assert!(matches!(
            harness.updater.reset(&token, "short").await,
            Err(AppError::Validation(_))
        ));
        assert!(harness.updater.reset(&token, "NewPassword2").await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_and_empty_tokens_rejected() {
        let harness = Harness::new();

        assert!(matches!(
            harness.updater.reset("not-a-real-token", "NewPassword2").await,
            Err(AppError::TokenInvalid)
        ));
        assert!(matches!(
            harness.updater.reset("", "NewPassword2").await,
            Err(AppError::TokenInvalid)
        ));
    }

    #[tokio::test]
    async fn test_failed_credential_write_keeps_token_usable() {
        let mut harness = Harness::new();
        let subject = harness.subject("user@example.com", "OldPassword1");

        harness.issuer.issue("user@example.com", "203.0.113.1").await;
        let token = harness.next_token().await;
        harness.backend.remove_subject(subject.id);

        assert!(matches!(
            harness.updater.reset(&token, "NewPassword2").await,
            Err(AppError::Persistence(_))
        ));
        let now = time::OffsetDateTime::now_utc();
        assert_eq!(harness.backend.active_request_count(subject.id, now), 1);
    }

    #[tokio::test]
    async fn test_concurrent_double_submission_single_success() {
        let mut harness = Harness::new();
        harness.subject("user@example.com", "OldPassword1");

        harness.issuer.issue("user@example.com", "203.0.113.1").await;
        let token = harness.next_token().await;

        let a = {
            let updater = harness.updater.clone();
            let token = token.clone();
            tokio::spawn(async move { updater.reset(&token, "NewPassword2").await })
        };
        let b = {
            let updater = harness.updater.clone();
            let token = token.clone();
            tokio::spawn(async move { updater.reset(&token, "NewPassword3").await })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let successes = results.iter().filter(|r| r.is_ok()).count();
        let invalid = results
            .iter()
            .filter(|r| matches!(r, Err(AppError::TokenInvalid)))
            .count();
        assert_eq!(successes, 1);
        assert_eq!(invalid, 1);
    }
}
