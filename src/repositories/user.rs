use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::models::Subject;
use crate::repositories::{StoreError, SubjectLookup};

#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// ユーザーのパスワードを更新
    ///
    /// トークン消費と同じトランザクション上で呼び出すこと
    ///
    /// # Note
    /// password_hash はログに出力しないこと
    pub async fn set_credential(
        conn: &mut PgConnection,
        subject_id: Uuid,
        credential_hash: &str,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(subject_id)
        .bind(credential_hash)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(StoreError::SubjectMissing(subject_id));
        }

        Ok(())
    }
}

#[async_trait]
impl SubjectLookup for UserRepository {
    /// メールアドレスでユーザーを検索（大文字小文字を区別しない）
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<Subject>, StoreError> {
        let subject = sqlx::query_as::<_, Subject>(
            r#"
            SELECT id, email, password_hash
            FROM users
            WHERE lower(email) = lower($1)
            "#,
        )
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;

        Ok(subject)
    }
}
