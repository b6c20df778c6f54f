//! 永続化層の契約と実装
//!
//! 同時実行の調停（置換・消費・レート制限カウンタ）はすべてここで行う。
//! PostgreSQL 実装はトランザクションと条件付き UPDATE で、
//! インメモリ実装は単一の Mutex で原子性を保証する。

pub mod memory;
pub mod rate_limit;
pub mod reset_request;
pub mod session;
pub mod user;

pub use memory::MemoryBackend;
pub use rate_limit::RateLimitRepository;
pub use reset_request::ResetRequestRepository;
pub use session::SessionRepository;
pub use user::UserRepository;

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::models::{NewResetRequest, RateLimitDecision, ResetRequest, ResetStatus, Subject};

/// 永続化層のエラー
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("データベースエラー: {0}")]
    Database(#[from] sqlx::Error),

    #[error("同一ユーザーへの同時発行と競合しました")]
    Conflict,

    #[error("対象ユーザーが存在しません: {0}")]
    SubjectMissing(Uuid),

    #[error("バックエンドエラー: {message}")]
    Backend { message: String },
}

/// トークン消費の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consumption {
    Consumed { subject_id: Uuid },
    /// 理由は内部ログ専用。呼び出し元へは区別せず返す
    Rejected(RejectReason),
}

/// トークン拒否の内部的な理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Unknown,
    Expired,
    AlreadyConsumed,
    Superseded,
}

impl RejectReason {
    /// 条件付き UPDATE が空振りした後、行の状態から理由を分類する
    pub fn classify(row: Option<&ResetRequest>, now: OffsetDateTime) -> Self {
        match row.map(|r| r.status_at(now)) {
            None => Self::Unknown,
            Some(ResetStatus::Consumed) => Self::AlreadyConsumed,
            Some(ResetStatus::Superseded) => Self::Superseded,
            // Active はDB時刻とアプリ時刻の差で期限境界を跨いだケース
            Some(ResetStatus::Expired) | Some(ResetStatus::Active) => Self::Expired,
        }
    }
}

/// リセットトークンの保存先
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// 対象ユーザーの有効な要求を無効化し、新しい要求を挿入する（単一トランザクション）
    async fn supersede_and_create(
        &self,
        request: NewResetRequest,
    ) -> Result<ResetRequest, StoreError>;

    /// 未使用・未置換・期限内の場合のみ消費する（条件付き書き込み）
    async fn consume_if_valid(&self, token_hash: &str) -> Result<Consumption, StoreError>;

    /// トークン消費と認証情報の更新を同一トランザクションで行う
    ///
    /// 認証情報の書き込みに失敗した場合はトークンも消費されない
    async fn consume_and_set_credential(
        &self,
        token_hash: &str,
        credential_hash: &str,
    ) -> Result<Consumption, StoreError>;

    /// `before` より前に期限切れとなった要求を削除する
    async fn purge_expired(&self, before: OffsetDateTime) -> Result<u64, StoreError>;
}

/// 送信元単位の発行回数カウンタ
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// 判定と記録を一つの原子的操作として行う
    async fn check_and_record(
        &self,
        origin: &str,
        now: OffsetDateTime,
        window: Duration,
        max_requests: u32,
    ) -> Result<RateLimitDecision, StoreError>;

    /// `before` より前に開始したウィンドウを削除する
    async fn purge_stale(&self, before: OffsetDateTime) -> Result<u64, StoreError>;
}

/// 識別子（メールアドレス）からアカウントを引く
#[async_trait]
pub trait SubjectLookup: Send + Sync {
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<Subject>, StoreError>;
}

/// ログインセッションの保存先
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 対象ユーザーの全セッションを無効化し、無効化した件数を返す
    async fn invalidate_all(&self, subject_id: Uuid) -> Result<u64, StoreError>;
}
