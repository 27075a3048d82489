//! Request throttle for the RxNav REST service.
//!
//! The service caps anonymous clients at 20 requests per second per IP.

use governor::{Quota, RateLimiter as GovLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Shared per-second rate limiter applied ahead of every remote call.
#[derive(Debug, Clone)]
pub struct Throttle {
    limiter: Arc<
        GovLimiter<
            governor::state::NotKeyed,
            governor::state::InMemoryState,
            governor::clock::DefaultClock,
        >,
    >,
}

impl Throttle {
    pub fn per_second(requests_per_sec: u32) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(requests_per_sec.max(1)).unwrap());
        Self {
            limiter: Arc::new(GovLimiter::direct(quota)),
        }
    }

    /// Wait until a request slot is available.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }
}
