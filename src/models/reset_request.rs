use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// パスワードリセット要求（発行済みトークン1件）
///
/// トークン自体はハッシュ化してDBに保存（token_hash）
/// 平文トークンはユーザーに通知し、DBには保存しない
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ResetRequest {
    pub id: Uuid,
    pub subject_id: Uuid,
    #[serde(skip)]
    pub token_hash: String,
    pub issued_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    /// 一度設定されたら変更しない
    pub consumed_at: Option<OffsetDateTime>,
    /// 新しい要求の発行で無効化された時刻
    pub superseded_at: Option<OffsetDateTime>,
    pub requester_ip: String,
}

/// リセット要求の状態
///
/// Active からのみ遷移し、他の状態は終端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetStatus {
    Active,
    Consumed,
    Superseded,
    Expired,
}

impl ResetRequest {
    /// 指定時刻における状態
    ///
    /// 使用済み・置換済みは期限切れより優先する（監査上の実際の終端を表す）
    pub fn status_at(&self, now: OffsetDateTime) -> ResetStatus {
        if self.consumed_at.is_some() {
            ResetStatus::Consumed
        } else if self.superseded_at.is_some() {
            ResetStatus::Superseded
        } else if self.expires_at <= now {
            ResetStatus::Expired
        } else {
            ResetStatus::Active
        }
    }

    pub fn is_active_at(&self, now: OffsetDateTime) -> bool {
        self.status_at(now) == ResetStatus::Active
    }
}

/// 新規発行するリセット要求
#[derive(Debug, Clone)]
pub struct NewResetRequest {
    pub subject_id: Uuid,
    pub token_hash: String,
    pub expires_at: OffsetDateTime,
    pub requester_ip: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn request(now: OffsetDateTime) -> ResetRequest {
        ResetRequest {
            id: Uuid::new_v4(),
            subject_id: Uuid::new_v4(),
            token_hash: "hash".to_string(),
            issued_at: now,
            expires_at: now + Duration::hours(1),
            consumed_at: None,
            superseded_at: None,
            requester_ip: "203.0.113.7".to_string(),
        }
    }

    #[test]
    fn test_fresh_request_is_active() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(request(now).status_at(now), ResetStatus::Active);
    }

    #[test]
    fn test_expiry_boundary_is_exclusive() {
        let now = OffsetDateTime::now_utc();
        let req = request(now);
        assert_eq!(req.status_at(req.expires_at), ResetStatus::Expired);
        assert!(req.is_active_at(req.expires_at - Duration::seconds(1)));
    }

    #[test]
    fn test_consumed_wins_over_expired() {
        let now = OffsetDateTime::now_utc();
        let mut req = request(now);
        req.consumed_at = Some(now);
        assert_eq!(
            req.status_at(now + Duration::days(1)),
            ResetStatus::Consumed
        );
    }

    #[test]
    fn test_superseded() {
        let now = OffsetDateTime::now_utc();
        let mut req = request(now);
        req.superseded_at = Some(now);
        assert_eq!(req.status_at(now), ResetStatus::Superseded);
    }
}
