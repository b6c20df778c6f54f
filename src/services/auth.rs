use std::sync::{Arc, OnceLock};

use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};

use crate::error::AppError;
use crate::models::Subject;
use crate::repositories::SubjectLookup;

/// パスワードをargon2idでハッシュ化
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| {
            tracing::error!(error = ?e, "パスワードハッシュ生成エラー");
            AppError::Internal(anyhow::anyhow!("password hash error"))
        })?;
    Ok(hash.to_string())
}

/// タイミング攻撃対策用のダミーハッシュ（初回利用時に生成）
fn dummy_hash() -> &'static str {
    static DUMMY: OnceLock<String> = OnceLock::new();
    DUMMY.get_or_init(|| {
        hash_password("resetgate-dummy-password").unwrap_or_default()
    })
}

/// 認証サービス
///
/// パスワードリセット後に新旧パスワードの有効性を確認するために使う
#[derive(Clone)]
pub struct AuthService {
    subjects: Arc<dyn SubjectLookup>,
}

impl AuthService {
    /// 新しい AuthService を作成
    pub fn new(subjects: Arc<dyn SubjectLookup>) -> Self {
        Self { subjects }
    }

    /// ユーザー認証を実行
    ///
    /// タイミング攻撃対策: ユーザーが存在しない場合もダミーのパスワード検証を実行
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<Subject, AppError> {
        let subject = self.subjects.find_by_identifier(email).await?;

        let Some(subject) = subject else {
            let _ = verify_password(password, dummy_hash());
            tracing::warn!(email = %email, "認証失敗: ユーザー不在");
            return Err(AppError::Authentication);
        };

        let Some(password_hash) = &subject.password_hash else {
            let _ = verify_password(password, dummy_hash());
            tracing::warn!(email = %email, "認証失敗: パスワード未設定");
            return Err(AppError::Authentication);
        };

        if verify_password(password, password_hash)? {
            tracing::info!(email = %email, "認証成功");
            Ok(subject)
        } else {
            tracing::warn!(email = %email, "認証失敗: パスワード不一致");
            Err(AppError::Authentication)
        }
    }
}

/// パスワードを検証
fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    let parsed_hash = PasswordHash::new(hash).map_err(|e| {
        tracing::error!(error = ?e, "パスワードハッシュのパースエラー");
        AppError::Internal(anyhow::anyhow!("password hash parse error"))
    })?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}
