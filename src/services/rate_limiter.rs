use std::sync::Arc;

use time::{Duration, OffsetDateTime};

use crate::config::Config;
use crate::models::RateLimitDecision;
use crate::repositories::{RateLimitStore, StoreError};

/// 送信元あたり `window` 内に `max_requests` 回まで
#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    pub window: Duration,
    pub max_requests: u32,
}

impl RateLimitPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            window: config.rate_limit_window(),
            max_requests: config.reset_rate_limit_max_requests,
        }
    }
}

/// リセット要求の発行レート制限
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    policy: RateLimitPolicy,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, policy: RateLimitPolicy) -> Self {
        Self { store, policy }
    }

    /// 判定と記録を原子的に実行
    ///
    /// ストアが失敗した場合は制限扱い（フェイルクローズ）
    pub async fn check_and_record(&self, origin: &str) -> RateLimitDecision {
        let result = self
            .store
            .check_and_record(
                origin,
                OffsetDateTime::now_utc(),
                self.policy.window,
                self.policy.max_requests,
            )
            .await;

        match result {
            Ok(RateLimitDecision::Limited) => {
                tracing::warn!(
                    origin = %origin,
                    max_requests = self.policy.max_requests,
                    window_secs = self.policy.window.whole_seconds(),
                    "レート制限超過"
                );
                RateLimitDecision::Limited
            }
            Ok(RateLimitDecision::Allowed) => RateLimitDecision::Allowed,
            Err(e) => {
                tracing::error!(error = ?e, origin = %origin, "レート制限の判定に失敗（制限扱い）");
                RateLimitDecision::Limited
            }
        }
    }

    /// ウィンドウを過ぎたカウンタを削除
    pub async fn purge_stale(&self) -> Result<u64, StoreError> {
        self.store
            .purge_stale(OffsetDateTime::now_utc() - self.policy.window)
            .await
    }
}
