use std::sync::Arc;
use std::time::Duration as StdDuration;

use time::{Duration, OffsetDateTime};
use tokio::task::JoinHandle;

use crate::repositories::TokenStore;
use crate::services::rate_limiter::RateLimiter;

/// 1回の削除で消えた件数
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub reset_requests: u64,
    pub rate_windows: u64,
}

/// 期限切れリセット要求と古いレート制限カウンタの定期削除
///
/// リクエスト処理とは独立したバックグラウンドタスク
#[derive(Clone)]
pub struct Sweeper {
    tokens: Arc<dyn TokenStore>,
    rate_limiter: RateLimiter,
    /// 期限切れ後も監査用に残す期間
    retention: Duration,
}

impl Sweeper {
    pub fn new(tokens: Arc<dyn TokenStore>, rate_limiter: RateLimiter, retention: Duration) -> Self {
        Self {
            tokens,
            rate_limiter,
            retention,
        }
    }

    /// 1回分の削除を実行
    pub async fn sweep_once(&self) -> SweepReport {
        let cutoff = OffsetDateTime::now_utc() - self.retention;
        let mut report = SweepReport::default();

        match self.tokens.purge_expired(cutoff).await {
            Ok(purged) => {
                tracing::info!(purged, "期限切れリセット要求を削除");
                report.reset_requests = purged;
            }
            Err(e) => tracing::error!(error = ?e, "期限切れリセット要求の削除に失敗"),
        }

        match self.rate_limiter.purge_stale().await {
            Ok(purged) => {
                tracing::debug!(purged, "古いレート制限カウンタを削除");
                report.rate_windows = purged;
            }
            Err(e) => tracing::error!(error = ?e, "レート制限カウンタの削除に失敗"),
        }

        report
    }

    /// 一定間隔で削除を繰り返すタスクを起動（間隔 0 なら起動しない）
    pub fn spawn(self, interval: StdDuration) -> Option<JoinHandle<()>> {
        if interval.is_zero() {
            tracing::info!("定期削除は無効");
            return None;
        }

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep_once().await;
            }
        }))
    }
}
