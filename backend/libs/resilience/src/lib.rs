/// Resilience patterns for long-lived client connections
///
/// - **Reconnect policy**: attempt ceiling plus linear or capped exponential
///   backoff (with optional jitter) between reconnect attempts
///
/// # Example: linear backoff
///
/// ```rust
/// use resilience::ReconnectPolicy;
/// use std::time::Duration;
///
/// let policy = ReconnectPolicy::linear(Duration::from_secs(2), 5);
/// assert_eq!(policy.next_attempt(0), Some((1, Duration::from_secs(2))));
/// assert_eq!(policy.next_attempt(4), Some((5, Duration::from_secs(10))));
/// assert_eq!(policy.next_attempt(5), None);
/// ```
pub mod reconnect;

pub use reconnect::{BackoffStrategy, ReconnectPolicy};
