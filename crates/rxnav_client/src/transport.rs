//! HTTP transport seam for the RxNav client.

use crate::throttle::Throttle;
use common::config::ThrottleConfig;
use common::{Error, Result};
use std::future::Future;
use tracing::debug;

/// One logical GET against the remote service, returning the raw body text.
///
/// The client is generic over this trait so tests can count or script
/// remote calls without touching the network.
pub trait Transport: Send + Sync {
    fn get(&self, url: &str) -> impl Future<Output = Result<String>> + Send;
}

/// Production transport: pooled reqwest client behind the request throttle.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    throttle: Throttle,
}

impl HttpTransport {
    pub fn new(user_agent: &str, throttle: &ThrottleConfig) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .pool_max_idle_per_host(4)
            .tcp_keepalive(std::time::Duration::from_secs(30))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("failed to build reqwest client");

        Self {
            client,
            throttle: Throttle::per_second(throttle.requests_per_sec),
        }
    }
}

impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<String> {
        self.throttle.acquire().await;
        debug!("GET {}", url);

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Http(format!(
                "status {} for {}",
                status.as_u16(),
                url
            )));
        }

        resp.text().await.map_err(|e| Error::Http(e.to_string()))
    }
}
