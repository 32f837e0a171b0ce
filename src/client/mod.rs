pub mod rate_limited;
pub mod retry;
pub mod transport;
pub mod types;

pub use rate_limited::{RateLimitedClient, RequestStatistics};
pub use retry::{RateLimitBudget, RetryPolicy};
pub use transport::{ReqwestTransport, Transport};
pub use types::*;
