//! インメモリ実装で組み立てたテスト用の構成

use std::sync::Arc;
use std::time::Duration as StdDuration;

use tokio::sync::mpsc;

use crate::models::Subject;
use crate::repositories::MemoryBackend;
use crate::services::auth::hash_password;
use crate::services::credential_policy::CredentialPolicy;
use crate::services::notification::ResetNotice;
use crate::services::notification::testing::RecordingDispatcher;
use crate::services::rate_limiter::{RateLimitPolicy, RateLimiter};
use crate::services::{CredentialUpdater, IssuerSettings, TokenIssuer};

pub struct Harness {
    pub backend: MemoryBackend,
    pub issuer: TokenIssuer,
    pub updater: CredentialUpdater,
    notices: mpsc::UnboundedReceiver<(String, ResetNotice)>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(StdDuration::ZERO, true)
    }

    pub fn with_min_response_time(min_response_time: StdDuration) -> Self {
        Self::build(min_response_time, true)
    }

    pub fn with_failing_dispatcher() -> Self {
        Self::build(StdDuration::ZERO, false)
    }

    fn build(min_response_time: StdDuration, dispatch_succeeds: bool) -> Self {
        let backend = MemoryBackend::new();
        let (dispatcher, notices) = RecordingDispatcher::new(dispatch_succeeds);

        let rate_limiter = RateLimiter::new(
            Arc::new(backend.clone()),
            RateLimitPolicy {
                window: time::Duration::minutes(5),
                max_requests: 3,
            },
        );
        let issuer = TokenIssuer::new(
            Arc::new(backend.clone()),
            Arc::new(backend.clone()),
            rate_limiter,
            Arc::new(dispatcher),
            IssuerSettings {
                token_ttl: time::Duration::hours(1),
                reset_url_base: "http://localhost:3000/password-reset".to_string(),
                min_response_time,
            },
        );
        let updater = CredentialUpdater::new(
            Arc::new(backend.clone()),
            Arc::new(backend.clone()),
            CredentialPolicy {
                min_length: 8,
                min_character_classes: 2,
            },
        );

        Self {
            backend,
            issuer,
            updater,
            notices,
        }
    }

    /// パスワード付きのアカウントを登録
    pub fn subject(&self, email: &str, password: &str) -> Subject {
        let hash = hash_password(password).expect("password hashing should succeed");
        self.backend.insert_subject(email, Some(hash))
    }

    /// 次に送信された通知を待つ
    pub async fn next_notice(&mut self) -> (String, ResetNotice) {
        tokio::time::timeout(StdDuration::from_secs(5), self.notices.recv())
            .await
            .expect("notification should be dispatched")
            .expect("dispatcher channel should stay open")
    }

    /// `wait` の間に通知が1件も送信されなければ true
    pub async fn no_notice_within(&mut self, wait: StdDuration) -> bool {
        tokio::time::timeout(wait, self.notices.recv()).await.is_err()
    }

    /// 次の通知のリンクから平文トークンを取り出す
    pub async fn next_token(&mut self) -> String {
        let (_, notice) = self.next_notice().await;
        let (_, encoded) = notice
            .link()
            .split_once("token=")
            .expect("reset link should carry a token");
        urlencoding::decode(encoded)
            .expect("token should be valid UTF-8")
            .into_owned()
    }
}
