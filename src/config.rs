use secrecy::SecretBox;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub database_url: SecretBox<String>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_database_max_connections")]
    pub database_max_connections: u32,

    // SMTP設定（オプション - email機能有効時のみ使用）
    #[serde(default)]
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_username: Option<SecretBox<String>>,
    pub smtp_password: Option<SecretBox<String>>,
    /// 通知メールの送信者（From ヘッダー）
    #[serde(default = "default_smtp_from_address")]
    pub smtp_from_address: String,

    // パスワードリセット設定
    #[serde(default = "default_password_reset_url_base")]
    pub password_reset_url_base: String,
    #[serde(default = "default_password_reset_token_ttl_secs")]
    pub password_reset_token_ttl_secs: i64,
    /// リセット要求レスポンスの最低所要時間（ミリ秒）
    ///
    /// ユーザー存在有無・レート制限の有無を応答時間から推測させないためのパディング
    #[serde(default = "default_reset_min_response_millis")]
    pub reset_min_response_millis: u64,

    // レート制限設定（送信元IP単位）
    #[serde(default = "default_reset_rate_limit_window_secs")]
    pub reset_rate_limit_window_secs: i64,
    #[serde(default = "default_reset_rate_limit_max_requests")]
    pub reset_rate_limit_max_requests: u32,
    /// X-Forwarded-For を送信元として信頼するか（リバースプロキシ配下のみ true）
    #[serde(default)]
    pub trust_forwarded_for: bool,

    // パスワードポリシー
    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,
    /// 必要な文字種の数（小文字・大文字・数字・記号のうち）
    #[serde(default = "default_min_password_character_classes")]
    pub min_password_character_classes: usize,

    // 期限切れレコードの定期削除
    /// 0 の場合は無効
    #[serde(default = "default_reset_sweep_interval_secs")]
    pub reset_sweep_interval_secs: u64,
    #[serde(default = "default_reset_sweep_retention_secs")]
    pub reset_sweep_retention_secs: i64,
}

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_SMTP_FROM_ADDRESS: &str = "no-reply@localhost";
const DEFAULT_PASSWORD_RESET_URL_BASE: &str = "http://localhost:3000/password-reset";
const DEFAULT_PASSWORD_RESET_TOKEN_TTL_SECS: i64 = 3600;
const DEFAULT_RESET_MIN_RESPONSE_MILLIS: u64 = 400;
const DEFAULT_RESET_RATE_LIMIT_WINDOW_SECS: i64 = 300;
const DEFAULT_RESET_RATE_LIMIT_MAX_REQUESTS: u32 = 3;
const DEFAULT_MIN_PASSWORD_LENGTH: usize = 8;
const DEFAULT_MIN_PASSWORD_CHARACTER_CLASSES: usize = 2;
const DEFAULT_RESET_SWEEP_INTERVAL_SECS: u64 = 3600;
const DEFAULT_RESET_SWEEP_RETENTION_SECS: i64 = 7 * 24 * 3600;

/// パスワード長の下限（設定でこれ未満にはできない）
const MIN_ALLOWED_PASSWORD_LENGTH: usize = 8;

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_database_max_connections() -> u32 {
    DEFAULT_DATABASE_MAX_CONNECTIONS
}

fn default_smtp_port() -> u16 {
    DEFAULT_SMTP_PORT
}

fn default_smtp_from_address() -> String {
    DEFAULT_SMTP_FROM_ADDRESS.to_string()
}

fn default_password_reset_url_base() -> String {
    DEFAULT_PASSWORD_RESET_URL_BASE.to_string()
}

fn default_password_reset_token_ttl_secs() -> i64 {
    DEFAULT_PASSWORD_RESET_TOKEN_TTL_SECS
}

fn default_reset_min_response_millis() -> u64 {
    DEFAULT_RESET_MIN_RESPONSE_MILLIS
}

fn default_reset_rate_limit_window_secs() -> i64 {
    DEFAULT_RESET_RATE_LIMIT_WINDOW_SECS
}

fn default_reset_rate_limit_max_requests() -> u32 {
    DEFAULT_RESET_RATE_LIMIT_MAX_REQUESTS
}

fn default_min_password_length() -> usize {
    DEFAULT_MIN_PASSWORD_LENGTH
}

fn default_min_password_character_classes() -> usize {
    DEFAULT_MIN_PASSWORD_CHARACTER_CLASSES
}

fn default_reset_sweep_interval_secs() -> u64 {
    DEFAULT_RESET_SWEEP_INTERVAL_SECS
}

fn default_reset_sweep_retention_secs() -> i64 {
    DEFAULT_RESET_SWEEP_RETENTION_SECS
}

/// 設定値の検証エラー
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("環境変数の読み込みに失敗: {0}")]
    Env(#[from] envy::Error),

    #[error("不正な設定値 {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// 設定値の整合性チェック
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.password_reset_token_ttl_secs <= 0 {
            return Err(ConfigError::Invalid {
                field: "PASSWORD_RESET_TOKEN_TTL_SECS",
                reason: "1以上を指定してください",
            });
        }
        if self.reset_rate_limit_window_secs <= 0 {
            return Err(ConfigError::Invalid {
                field: "RESET_RATE_LIMIT_WINDOW_SECS",
                reason: "1以上を指定してください",
            });
        }
        if self.reset_rate_limit_max_requests == 0 {
            return Err(ConfigError::Invalid {
                field: "RESET_RATE_LIMIT_MAX_REQUESTS",
                reason: "1以上を指定してください",
            });
        }
        if self.min_password_length < MIN_ALLOWED_PASSWORD_LENGTH {
            return Err(ConfigError::Invalid {
                field: "MIN_PASSWORD_LENGTH",
                reason: "8以上を指定してください",
            });
        }
        if self.min_password_character_classes > 4 {
            return Err(ConfigError::Invalid {
                field: "MIN_PASSWORD_CHARACTER_CLASSES",
                reason: "0から4の範囲で指定してください",
            });
        }
        if self.reset_sweep_retention_secs < 0 {
            return Err(ConfigError::Invalid {
                field: "RESET_SWEEP_RETENTION_SECS",
                reason: "0以上を指定してください",
            });
        }
        Ok(())
    }

    pub fn token_ttl(&self) -> time::Duration {
        time::Duration::seconds(self.password_reset_token_ttl_secs)
    }

    pub fn rate_limit_window(&self) -> time::Duration {
        time::Duration::seconds(self.reset_rate_limit_window_secs)
    }

    pub fn min_response_time(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.reset_min_response_millis)
    }

    pub fn sweep_retention(&self) -> time::Duration {
        time::Duration::seconds(self.reset_sweep_retention_secs)
    }

    /// テスト用: 環境変数の代わりにキー/値の組から読み込む
    pub fn from_pairs<I>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::from_iter(pairs)?;
        config.validate()?;
        Ok(config)
    }
}
