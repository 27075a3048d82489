//! RxNav REST client with cache-or-remote resolution.
//!
//! The client resolves every request key against a point-in-time cache
//! snapshot first; misses go to the remote service with bounded retry, and
//! (when forwarding is enabled) the raw response is sent to the cache
//! writer task rather than written locally.

pub mod client;
pub mod endpoints;
pub mod throttle;
pub mod transport;

pub use client::{RequestStats, RetryPolicy, RxnavClient};
pub use endpoints::{AllRelatedResponse, ClassTreeNode, ClassTreeResponse};
pub use throttle::Throttle;
pub use transport::{HttpTransport, Transport};
