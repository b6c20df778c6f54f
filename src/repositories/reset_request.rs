use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::{NewResetRequest, ResetRequest};
use crate::repositories::{Consumption, RejectReason, StoreError, TokenStore, UserRepository};

/// 「ユーザーごとに有効な要求は1件まで」を保証する部分ユニークインデックス
const ONE_LIVE_PER_SUBJECT: &str = "reset_requests_one_live_per_subject";
/// token_hash の UNIQUE 制約
const TOKEN_HASH_UNIQUE: &str = "reset_requests_token_hash_key";

#[derive(Clone)]
pub struct ResetRequestRepository {
    pool: PgPool,
}

impl ResetRequestRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 条件付き UPDATE でトークンを消費する
    ///
    /// 影響行がなければ同一接続上で行を読み直し、拒否理由を分類する（ログ用）
    async fn consume_on(
        conn: &mut PgConnection,
        token_hash: &str,
    ) -> Result<Consumption, StoreError> {
        let consumed = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE reset_requests
            SET consumed_at = NOW()
            WHERE token_hash = $1
              AND consumed_at IS NULL
              AND superseded_at IS NULL
              AND expires_at > NOW()
            RETURNING subject_id
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(subject_id) = consumed {
            return Ok(Consumption::Consumed { subject_id });
        }

        let row = sqlx::query_as::<_, ResetRequest>(
            r#"
            SELECT id, subject_id, token_hash, issued_at, expires_at,
                   consumed_at, superseded_at, requester_ip
            FROM reset_requests
            WHERE token_hash = $1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(Consumption::Rejected(RejectReason::classify(
            row.as_ref(),
            OffsetDateTime::now_utc(),
        )))
    }
}

#[async_trait]
impl TokenStore for ResetRequestRepository {
    /// 既存の有効な要求を置換済みにし、新しい要求を作成
    ///
    /// # Note
    /// users 行を FOR UPDATE でロックし、同一ユーザーへの同時発行を直列化する。
    /// 部分ユニークインデックスは最終防衛線
    async fn supersede_and_create(
        &self,
        request: NewResetRequest,
    ) -> Result<ResetRequest, StoreError> {
        let mut tx = self.pool.begin().await?;

        let locked = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id FROM users
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(request.subject_id)
        .fetch_optional(&mut *tx)
        .await?;

        if locked.is_none() {
            return Err(StoreError::SubjectMissing(request.subject_id));
        }

        let superseded = sqlx::query(
            r#"
            UPDATE reset_requests
            SET superseded_at = NOW()
            WHERE subject_id = $1
              AND consumed_at IS NULL
              AND superseded_at IS NULL
            "#,
        )
        .bind(request.subject_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let created = sqlx::query_as::<_, ResetRequest>(
            r#"
            INSERT INTO reset_requests (subject_id, token_hash, expires_at, requester_ip)
            VALUES ($1, $2, $3, $4)
            RETURNING id, subject_id, token_hash, issued_at, expires_at,
                      consumed_at, superseded_at, requester_ip
            "#,
        )
        .bind(request.subject_id)
        .bind(&request.token_hash)
        .bind(request.expires_at)
        .bind(&request.requester_ip)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db_err) = &e
                && matches!(
                    db_err.constraint(),
                    Some(ONE_LIVE_PER_SUBJECT | TOKEN_HASH_UNIQUE)
                )
            {
                return StoreError::Conflict;
            }
            StoreError::Database(e)
        })?;

        tx.commit().await?;

        tracing::debug!(
            subject_id = %created.subject_id,
            request_id = %created.id,
            superseded,
            "リセット要求を作成"
        );

        Ok(created)
    }

    async fn consume_if_valid(&self, token_hash: &str) -> Result<Consumption, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Self::consume_on(&mut *conn, token_hash).await
    }

    async fn consume_and_set_credential(
        &self,
        token_hash: &str,
        credential_hash: &str,
    ) -> Result<Consumption, StoreError> {
        let mut tx = self.pool.begin().await?;

        let outcome = Self::consume_on(&mut *tx, token_hash).await?;

        // 書き込み失敗時は tx が drop されロールバック（トークンも未消費に戻る）
        if let Consumption::Consumed { subject_id } = outcome {
            UserRepository::set_credential(&mut *tx, subject_id, credential_hash).await?;
        }

        tx.commit().await?;

        Ok(outcome)
    }

    /// 期限切れトークンを削除
    ///
    /// # Returns
    /// 削除された行数
    async fn purge_expired(&self, before: OffsetDateTime) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM reset_requests
            WHERE expires_at < $1
            "#,
        )
        .bind(before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
