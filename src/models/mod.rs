pub mod rate_limit;
pub mod reset_request;
pub mod subject;

pub use rate_limit::{RateLimitDecision, RateLimitWindow};
pub use reset_request::{NewResetRequest, ResetRequest, ResetStatus};
pub use subject::Subject;
