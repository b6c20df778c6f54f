//! 単一プロセス向けのインメモリ実装（ローカル開発・テスト用）
//!
//! 全テーブルを一つの Mutex で保護し、各操作をロック内で完結させることで
//! PostgreSQL 実装のトランザクションと同じ原子性を得る。

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::models::{NewResetRequest, RateLimitDecision, ResetRequest, Subject};
use crate::repositories::{
    Consumption, RateLimitStore, RejectReason, SessionStore, StoreError, SubjectLookup,
    TokenStore,
};

#[derive(Default)]
struct MemoryState {
    subjects: HashMap<Uuid, Subject>,
    /// token_hash をキーとする（UNIQUE 制約相当）
    requests: HashMap<String, ResetRequest>,
    /// 送信元ごとの受付時刻（スライディングウィンドウ）
    rate_windows: HashMap<String, VecDeque<OffsetDateTime>>,
    sessions: HashMap<Uuid, u64>,
}

#[derive(Clone, Default)]
pub struct MemoryBackend(Arc<Mutex<MemoryState>>);

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// アカウントを登録
    pub fn insert_subject(&self, email: &str, password_hash: Option<String>) -> Subject {
        let subject = Subject {
            id: Uuid::new_v4(),
            email: email.to_string(),
            password_hash,
        };
        self.0.lock().subjects.insert(subject.id, subject.clone());
        subject
    }

    pub fn remove_subject(&self, subject_id: Uuid) {
        self.0.lock().subjects.remove(&subject_id);
    }

    /// ログインセッションを1件追加
    pub fn open_session(&self, subject_id: Uuid) {
        *self.0.lock().sessions.entry(subject_id).or_default() += 1;
    }

    pub fn session_count(&self, subject_id: Uuid) -> u64 {
        self.0
            .lock()
            .sessions
            .get(&subject_id)
            .copied()
            .unwrap_or_default()
    }

    /// 対象ユーザーの全リセット要求（発行順）
    pub fn requests_for(&self, subject_id: Uuid) -> Vec<ResetRequest> {
        let mut requests: Vec<_> = self
            .0
            .lock()
            .requests
            .values()
            .filter(|r| r.subject_id == subject_id)
            .cloned()
            .collect();
        requests.sort_by_key(|r| r.issued_at);
        requests
    }

    pub fn active_request_count(&self, subject_id: Uuid, now: OffsetDateTime) -> usize {
        self.0
            .lock()
            .requests
            .values()
            .filter(|r| r.subject_id == subject_id && r.is_active_at(now))
            .count()
    }

    fn supersede_and_create_now(
        state: &mut MemoryState,
        request: NewResetRequest,
        now: OffsetDateTime,
    ) -> Result<ResetRequest, StoreError> {
        if !state.subjects.contains_key(&request.subject_id) {
            return Err(StoreError::SubjectMissing(request.subject_id));
        }
        if state.requests.contains_key(&request.token_hash) {
            return Err(StoreError::Conflict);
        }

        for existing in state.requests.values_mut() {
            if existing.subject_id == request.subject_id
                && existing.consumed_at.is_none()
                && existing.superseded_at.is_none()
            {
                existing.superseded_at = Some(now);
            }
        }

        let created = ResetRequest {
            id: Uuid::new_v4(),
            subject_id: request.subject_id,
            token_hash: request.token_hash,
            issued_at: now,
            expires_at: request.expires_at,
            consumed_at: None,
            superseded_at: None,
            requester_ip: request.requester_ip,
        };
        state
            .requests
            .insert(created.token_hash.clone(), created.clone());

        Ok(created)
    }

    fn consume_now(state: &mut MemoryState, token_hash: &str, now: OffsetDateTime) -> Consumption {
        match state.requests.get_mut(token_hash) {
            Some(request) if request.is_active_at(now) => {
                request.consumed_at = Some(now);
                Consumption::Consumed {
                    subject_id: request.subject_id,
                }
            }
            other => Consumption::Rejected(RejectReason::classify(other.as_deref(), now)),
        }
    }

    fn consume_and_set_credential_now(
        state: &mut MemoryState,
        token_hash: &str,
        credential_hash: &str,
        now: OffsetDateTime,
    ) -> Result<Consumption, StoreError> {
        // 書き込み前に対象ユーザーの存在を確認し、失敗時はトークンに触れない
        let subject_id = match state.requests.get(token_hash) {
            Some(request) if request.is_active_at(now) => request.subject_id,
            _ => return Ok(Self::consume_now(state, token_hash, now)),
        };
        let Some(subject) = state.subjects.get_mut(&subject_id) else {
            return Err(StoreError::SubjectMissing(subject_id));
        };

        subject.password_hash = Some(credential_hash.to_string());
        Ok(Self::consume_now(state, token_hash, now))
    }

    fn check_and_record_now(
        state: &mut MemoryState,
        origin: &str,
        now: OffsetDateTime,
        window: Duration,
        max_requests: u32,
    ) -> RateLimitDecision {
        let cutoff = now - window;
        let entries = state.rate_windows.entry(origin.to_string()).or_default();

        while entries.front().is_some_and(|at| *at <= cutoff) {
            entries.pop_front();
        }

        if entries.len() >= max_requests as usize {
            return RateLimitDecision::Limited;
        }

        entries.push_back(now);
        RateLimitDecision::Allowed
    }
}

#[async_trait]
impl TokenStore for MemoryBackend {
    async fn supersede_and_create(
        &self,
        request: NewResetRequest,
    ) -> Result<ResetRequest, StoreError> {
        let mut state = self.0.lock();
        Self::supersede_and_create_now(&mut state, request, OffsetDateTime::now_utc())
    }

    async fn consume_if_valid(&self, token_hash: &str) -> Result<Consumption, StoreError> {
        let mut state = self.0.lock();
        Ok(Self::consume_now(
            &mut state,
            token_hash,
            OffsetDateTime::now_utc(),
        ))
    }

    async fn consume_and_set_credential(
        &self,
        token_hash: &str,
        credential_hash: &str,
    ) -> Result<Consumption, StoreError> {
        let mut state = self.0.lock();
        Self::consume_and_set_credential_now(
            &mut state,
            token_hash,
            credential_hash,
            OffsetDateTime::now_utc(),
        )
    }

    async fn purge_expired(&self, before: OffsetDateTime) -> Result<u64, StoreError> {
        let mut state = self.0.lock();
        let initial = state.requests.len();
        state.requests.retain(|_, r| r.expires_at >= before);
        Ok((initial - state.requests.len()) as u64)
    }
}

#[async_trait]
impl RateLimitStore for MemoryBackend {
    async fn check_and_record(
        &self,
        origin: &str,
        now: OffsetDateTime,
        window: Duration,
        max_requests: u32,
    ) -> Result<RateLimitDecision, StoreError> {
        let mut state = self.0.lock();
        Ok(Self::check_and_record_now(
            &mut state,
            origin,
            now,
            window,
            max_requests,
        ))
    }

    async fn purge_stale(&self, before: OffsetDateTime) -> Result<u64, StoreError> {
        let mut state = self.0.lock();
        let initial = state.rate_windows.len();
        state
            .rate_windows
            .retain(|_, entries| entries.back().is_some_and(|at| *at >= before));
        Ok((initial - state.rate_windows.len()) as u64)
    }
}

#[async_trait]
impl SubjectLookup for MemoryBackend {
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<Subject>, StoreError> {
        let state = self.0.lock();
        Ok(state
            .subjects
            .values()
            .find(|s| s.email.eq_ignore_ascii_case(identifier))
            .cloned())
    }
}

#[async_trait]
impl SessionStore for MemoryBackend {
    async fn invalidate_all(&self, subject_id: Uuid) -> Result<u64, StoreError> {
        Ok(self.0.lock().sessions.remove(&subject_id).unwrap_or_default())
    }
}
