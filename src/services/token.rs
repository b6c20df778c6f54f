use std::fmt;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};

/// トークンのエントロピー（バイト）
pub const TOKEN_BYTES: usize = 32;

/// 平文のリセットトークン
///
/// Debug / Display ではマスクされる。DBには [`hash_token`] の結果のみ保存する
#[derive(Clone, PartialEq, Eq)]
pub struct ResetToken(String);

impl ResetToken {
    /// 32バイトのランダムトークンを生成
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// 平文を返す。ログに出力しないこと
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn hash(&self) -> String {
        hash_token(&self.0)
    }
}

impl fmt::Debug for ResetToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResetToken").field(&"<redacted>").finish()
    }
}

impl fmt::Display for ResetToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// トークンをSHA256でハッシュ化
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// トークン生成とハッシュ化を実行して結果を捨てる
///
/// ユーザー不在・レート制限時にも発行時と同じ計算コストをかけるために使う
pub fn burn_token_cost() {
    let token = ResetToken::generate();
    std::hint::black_box(token.hash());
}

/// リセットURLを構築
pub fn build_reset_link(base: &str, token: &ResetToken) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!(
        "{}{}token={}",
        base,
        separator,
        urlencoding::encode(token.expose())
    )
}
