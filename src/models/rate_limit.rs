use sqlx::FromRow;
use time::OffsetDateTime;

/// 送信元単位の固定ウィンドウカウンタ（reset_rate_limits テーブル）
#[derive(Debug, Clone, FromRow)]
pub struct RateLimitWindow {
    pub origin: String,
    pub window_start: OffsetDateTime,
    pub request_count: i64,
}

/// レート制限の判定結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

impl RateLimitDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }
}
