pub mod auth;
pub mod credential_policy;
pub mod credential_updater;
pub mod notification;
pub mod rate_limiter;
pub mod sweeper;
pub mod token;
pub mod token_issuer;

pub use auth::AuthService;
pub use credential_policy::CredentialPolicy;
pub use credential_updater::CredentialUpdater;
pub use notification::{LogDispatcher, NotificationDispatcher, ResetNotice};
pub use rate_limiter::{RateLimitPolicy, RateLimiter};
pub use sweeper::Sweeper;
pub use token_issuer::{IssueAck, IssuerSettings, TokenIssuer};
