//! リセットリンクの通知
//!
//! 通知はトークン発行のコミット後に別タスクで送信する。送信の失敗・遅延は
//! 発行結果にもレスポンスにも影響させない。

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::task::JoinHandle;

/// リセットリンク通知の内容
#[derive(Clone)]
pub struct ResetNotice {
    link: String,
    pub expires_at: OffsetDateTime,
}

impl ResetNotice {
    pub fn new(link: String, expires_at: OffsetDateTime) -> Self {
        Self { link, expires_at }
    }

    /// トークンを含むURL。ログに出力しないこと
    pub fn link(&self) -> &str {
        &self.link
    }

    pub fn subject_line(&self) -> &'static str {
        "パスワードリセットのご案内"
    }

    pub fn body(&self) -> String {
        format!(
            "パスワードリセットのリクエストを受け付けました。\n\
             以下のリンクから新しいパスワードを設定してください。\n\n\
             {}\n\n\
             このリンクは {} (UTC) まで有効で、一度だけ使用できます。\n\
             心当たりがない場合はこのメールを破棄してください。\n",
            self.link,
            self.expires_at
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| self.expires_at.to_string()),
        )
    }
}

impl fmt::Debug for ResetNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResetNotice")
            .field("link", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// 通知の送信先（外部サービス）
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// 送信に成功したら true
    async fn send(&self, destination: &str, notice: &ResetNotice) -> bool;
}

/// 通知をバックグラウンドで送信し、失敗はログにのみ残す
pub fn spawn_dispatch(
    dispatcher: Arc<dyn NotificationDispatcher>,
    destination: String,
    notice: ResetNotice,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if dispatcher.send(&destination, &notice).await {
            tracing::info!(to = %destination, "パスワードリセット通知送信完了");
        } else {
            tracing::warn!(to = %destination, "パスワードリセット通知の送信に失敗");
        }
    })
}

/// ログ出力のみの送信（開発環境用）
#[derive(Clone)]
pub struct LogDispatcher {
    sender: String,
}

impl LogDispatcher {
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
        }
    }
}

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn send(&self, destination: &str, notice: &ResetNotice) -> bool {
        // 開発モード: メール送信せずログ出力のみ（リンクは出さない）
        tracing::info!(
            from = %self.sender,
            to = %destination,
            expires_at = %notice.expires_at,
            "パスワードリセットメール送信（開発モード）"
        );
        true
    }
}

#[cfg(feature = "email")]
pub use smtp::SmtpDispatcher;

#[cfg(feature = "email")]
mod smtp {
    use async_trait::async_trait;
    use lettre::message::{Mailbox, header::ContentType};
    use lettre::transport::smtp::authentication::Credentials;
    use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
    use secrecy::ExposeSecret;

    use super::{NotificationDispatcher, ResetNotice};
    use crate::config::Config;

    /// SMTP によるメール送信
    #[derive(Clone)]
    pub struct SmtpDispatcher {
        mailer: AsyncSmtpTransport<Tokio1Executor>,
        from: Mailbox,
    }

    impl SmtpDispatcher {
        /// SMTP 設定が揃っていない場合は None
        pub fn from_config(config: &Config) -> anyhow::Result<Option<Self>> {
            let Some(host) = &config.smtp_host else {
                return Ok(None);
            };

            let from: Mailbox = config.smtp_from_address.parse()?;
            let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?
                .port(config.smtp_port);

            if let (Some(username), Some(password)) =
                (&config.smtp_username, &config.smtp_password)
            {
                builder = builder.credentials(Credentials::new(
                    username.expose_secret().clone(),
                    password.expose_secret().clone(),
                ));
            }

            Ok(Some(Self {
                mailer: builder.build(),
                from,
            }))
        }
    }

    #[async_trait]
    impl NotificationDispatcher for SmtpDispatcher {
        async fn send(&self, destination: &str, notice: &ResetNotice) -> bool {
            let to: Mailbox = match destination.parse() {
                Ok(to) => to,
                Err(e) => {
                    tracing::error!(error = ?e, to = %destination, "宛先アドレスが不正");
                    return false;
                }
            };

            let message = match Message::builder()
                .from(self.from.clone())
                .to(to)
                .subject(notice.subject_line())
                .header(ContentType::TEXT_PLAIN)
                .body(notice.body())
            {
                Ok(message) => message,
                Err(e) => {
                    tracing::error!(error = ?e, "メールの構築に失敗");
                    return false;
                }
            };

            match self.mailer.send(message).await {
                Ok(_) => true,
                Err(e) => {
                    tracing::error!(error = ?e, "SMTP送信エラー");
                    false
                }
            }
        }
    }
}
