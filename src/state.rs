use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::error::AppError;
use crate::repositories::{
    MemoryBackend, RateLimitRepository, RateLimitStore, ResetRequestRepository,
    SessionRepository, SessionStore, SubjectLookup, TokenStore, UserRepository,
};
use crate::services::{
    CredentialPolicy, CredentialUpdater, IssuerSettings, LogDispatcher, NotificationDispatcher,
    RateLimitPolicy, RateLimiter, Sweeper, TokenIssuer,
};

/// アプリケーション共有状態
///
/// axum の State として全ハンドラーで共有される。
/// 依存はすべてここで組み立てて注入する（グローバル状態は持たない）
#[derive(Clone)]
pub struct AppState {
    /// アプリケーション設定（Arc で共有）
    pub config: Arc<Config>,
    /// リセットトークン発行
    pub issuer: TokenIssuer,
    /// トークン検証とパスワード更新
    pub updater: CredentialUpdater,
    /// 期限切れレコードの削除
    pub sweeper: Sweeper,
}

/// 永続化層の構成要素
struct Stores {
    subjects: Arc<dyn SubjectLookup>,
    tokens: Arc<dyn TokenStore>,
    rate_limits: Arc<dyn RateLimitStore>,
    sessions: Arc<dyn SessionStore>,
}

impl AppState {
    /// PostgreSQL をバックエンドとする AppState を作成
    pub fn new(db_pool: PgPool, config: Config) -> Result<Self, AppError> {
        let dispatcher = build_dispatcher(&config)?;
        let stores = Stores {
            subjects: Arc::new(UserRepository::new(db_pool.clone())),
            tokens: Arc::new(ResetRequestRepository::new(db_pool.clone())),
            rate_limits: Arc::new(RateLimitRepository::new(db_pool.clone())),
            sessions: Arc::new(SessionRepository::new(db_pool)),
        };

        Ok(Self::assemble(Arc::new(config), stores, dispatcher))
    }

    /// インメモリ実装で AppState を作成（単一プロセス・テスト用）
    pub fn in_memory(
        backend: MemoryBackend,
        dispatcher: Arc<dyn NotificationDispatcher>,
        config: Config,
    ) -> Self {
        let stores = Stores {
            subjects: Arc::new(backend.clone()),
            tokens: Arc::new(backend.clone()),
            rate_limits: Arc::new(backend.clone()),
            sessions: Arc::new(backend),
        };

        Self::assemble(Arc::new(config), stores, dispatcher)
    }

    fn assemble(
        config: Arc<Config>,
        stores: Stores,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        let rate_limiter = RateLimiter::new(stores.rate_limits, RateLimitPolicy::from_config(&config));

        let issuer = TokenIssuer::new(
            stores.subjects,
            stores.tokens.clone(),
            rate_limiter.clone(),
            dispatcher,
            IssuerSettings::from_config(&config),
        );
        let updater = CredentialUpdater::new(
            stores.tokens.clone(),
            stores.sessions,
            CredentialPolicy::from_config(&config),
        );
        let sweeper = Sweeper::new(stores.tokens, rate_limiter, config.sweep_retention());

        Self {
            config,
            issuer,
            updater,
            sweeper,
        }
    }
}

/// 通知の送信手段を選択
///
/// email 機能有効かつ SMTP 設定済みなら SMTP、それ以外はログ出力のみ
fn build_dispatcher(config: &Config) -> Result<Arc<dyn NotificationDispatcher>, AppError> {
    if let Some(smtp) = smtp_dispatcher(config)? {
        tracing::info!("SMTP 通知を初期化");
        return Ok(smtp);
    }

    tracing::info!("SMTP 未設定（ログ出力のみ）");
    Ok(Arc::new(LogDispatcher::new(config.smtp_from_address.clone())))
}

#[cfg(feature = "email")]
fn smtp_dispatcher(config: &Config) -> Result<Option<Arc<dyn NotificationDispatcher>>, AppError> {
    let smtp = crate::services::notification::SmtpDispatcher::from_config(config)?;
    Ok(smtp.map(|smtp| Arc::new(smtp) as Arc<dyn NotificationDispatcher>))
}

#[cfg(not(feature = "email"))]
fn smtp_dispatcher(_config: &Config) -> Result<Option<Arc<dyn NotificationDispatcher>>, AppError> {
    Ok(None)
}
