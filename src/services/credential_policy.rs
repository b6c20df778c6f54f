use crate::config::Config;
use crate::error::AppError;

/// ハッシュ計算コストを抑えるための上限（バイト）
const MAX_PASSWORD_BYTES: usize = 1024;

/// 新しいパスワードの強度ポリシー
#[derive(Debug, Clone, Copy)]
pub struct CredentialPolicy {
    pub min_length: usize,
    /// 小文字・大文字・数字・記号のうち必要な種類数
    pub min_character_classes: usize,
}

impl CredentialPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_length: config.min_password_length,
            min_character_classes: config.min_password_character_classes,
        }
    }

    /// ポリシー違反は Validation エラー
    ///
    /// # Security
    /// パスワード自体はエラーメッセージ・ログに含めない
    pub fn validate(&self, password: &str) -> Result<(), AppError> {
        if password.chars().count() < self.min_length {
            return Err(AppError::Validation(format!(
                "パスワードは{}文字以上で入力してください",
                self.min_length
            )));
        }
        if password.len() > MAX_PASSWORD_BYTES {
            return Err(AppError::Validation(
                "パスワードが長すぎます".to_string(),
            ));
        }
        if character_classes(password) < self.min_character_classes {
            return Err(AppError::Validation(format!(
                "パスワードには{}種類以上の文字種を含めてください",
                self.min_character_classes
            )));
        }
        Ok(())
    }
}

/// 含まれる文字種の数
fn character_classes(password: &str) -> usize {
    let lower = password.chars().any(|c| c.is_lowercase());
    let upper = password.chars().any(|c| c.is_uppercase());
    let digit = password.chars().any(|c| c.is_ascii_digit());
    let symbol = password
        .chars()
        .any(|c| !c.is_alphanumeric() && !c.is_whitespace());

    [lower, upper, digit, symbol]
        .into_iter()
        .filter(|present| *present)
        .count()
}
