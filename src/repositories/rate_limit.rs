use async_trait::async_trait;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};

use crate::models::{RateLimitDecision, RateLimitWindow};
use crate::repositories::{RateLimitStore, StoreError};

/// 送信元単位の固定ウィンドウカウンタ
///
/// 判定と加算は単一の UPSERT 文で行う（読み取り→書き戻しの競合を起こさない）
#[derive(Clone)]
pub struct RateLimitRepository {
    pool: PgPool,
}

impl RateLimitRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RateLimitStore for RateLimitRepository {
    async fn check_and_record(
        &self,
        origin: &str,
        now: OffsetDateTime,
        window: Duration,
        max_requests: u32,
    ) -> Result<RateLimitDecision, StoreError> {
        // 上限 + 1 が INTEGER を超えても溢れないよう bigint で扱う
        let max_requests = i64::from(max_requests);

        // ウィンドウが切れていれば 1 から数え直す。上限超過後はカウンタを飽和させる
        let counter = sqlx::query_as::<_, RateLimitWindow>(
            r#"
            INSERT INTO reset_rate_limits (origin, window_start, request_count)
            VALUES ($1, $2, 1)
            ON CONFLICT (origin) DO UPDATE SET
                window_start = CASE
                    WHEN reset_rate_limits.window_start <= $3 THEN EXCLUDED.window_start
                    ELSE reset_rate_limits.window_start
                END,
                request_count = CASE
                    WHEN reset_rate_limits.window_start <= $3 THEN 1
                    ELSE LEAST(reset_rate_limits.request_count + 1, $4::bigint + 1)
                END
            RETURNING origin, window_start, request_count
            "#,
        )
        .bind(origin)
        .bind(now)
        .bind(now - window)
        .bind(max_requests)
        .fetch_one(&self.pool)
        .await?;

        if counter.request_count <= max_requests {
            Ok(RateLimitDecision::Allowed)
        } else {
            Ok(RateLimitDecision::Limited)
        }
    }

    async fn purge_stale(&self, before: OffsetDateTime) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM reset_rate_limits
            WHERE window_start < $1
            "#,
        )
        .bind(before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
