use sqlx::FromRow;
use uuid::Uuid;

/// リセット対象のアカウント
///
/// users テーブルの読み取り専用ビュー。パスワードハッシュは
/// 認証確認にのみ使い、ログ・レスポンスには出さない
#[derive(Clone, FromRow)]
pub struct Subject {
    pub id: Uuid,
    pub email: String,
    pub password_hash: Option<String>,
}

impl std::fmt::Debug for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subject")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("password_hash", &"<redacted>")
            .finish()
    }
}
