//! Reconnect backoff and endpoint rotation.
//!
//! Delay grows as `2^attempt` seconds with no cap and no jitter, matching
//! the source's behavior; `attempt` resets to zero on every successful
//! connect. Endpoints were already shuffled once at [`crate::config::Config`]
//! construction, so rotation here is a plain round-robin over that fixed
//! order.

use std::time::Duration;

use crate::config::Endpoint;

pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt))
}

/// Walks `endpoints` round-robin across reconnect attempts.
pub struct EndpointRotation<'a> {
    endpoints: &'a [Endpoint],
    next: usize,
}

impl<'a> EndpointRotation<'a> {
    pub fn new(endpoints: &'a [Endpoint]) -> Self {
        Self { endpoints, next: 0 }
    }

    pub fn next_endpoint(&mut self) -> &'a Endpoint {
        let endpoint = &self.endpoints[self.next % self.endpoints.len()];
        self.next = (self.next + 1) % self.endpoints.len();
        endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_each_attempt() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(4), Duration::from_secs(16));
    }

    #[test]
    fn rotation_wraps_around() {
        let endpoints = vec![
            Endpoint { host: "a".into(), port: 5672 },
            Endpoint { host: "b".into(), port: 5672 },
        ];
        let mut rotation = EndpointRotation::new(&endpoints);
        assert_eq!(rotation.next_endpoint().host, "a");
        assert_eq!(rotation.next_endpoint().host, "b");
        assert_eq!(rotation.next_endpoint().host, "a");
    }
}
