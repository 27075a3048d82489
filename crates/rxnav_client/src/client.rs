//! Cache-or-remote resolution with bounded retry and forwarding.

use crate::transport::Transport;
use cache_store::{CacheStore, Mode};
use common::config::RetryConfig;
use common::{CacheMessage, Error, Result};
use std::collections::VecDeque;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::sleep;
use tracing::{info, warn};

/// Remote calls between throughput summaries, and the timing window size.
const REPORT_EVERY: u64 = 500;
const TIMING_WINDOW: usize = 500;

/// Bounded-retry policy for remote calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 40,
            delay: Duration::from_secs(15),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            delay: Duration::from_secs(cfg.delay_secs),
        }
    }
}

/// Per-client request counters. Owned by the client value, never shared.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestStats {
    /// Logical requests, cache-resolved or remote.
    pub requests: u64,
    /// Requests that actually went to the remote service.
    pub remote_calls: u64,
    /// Requests resolved from the cache snapshot.
    pub cache_hits: u64,
}

/// RxNav REST client.
///
/// Holds an optional read-only cache snapshot (its fixed view of previously
/// cached results for the life of the client) and an optional forwarding
/// channel to the cache writer. The client never appends to the store.
pub struct RxnavClient<T: Transport> {
    transport: T,
    pub(crate) base_url: String,
    snapshot: Option<CacheStore>,
    forward: Option<UnboundedSender<CacheMessage>>,
    strict: bool,
    retry: RetryPolicy,
    stats: RequestStats,
    window: VecDeque<Duration>,
    last_report_at: Instant,
    last_report_calls: u64,
}

impl<T: Transport> RxnavClient<T> {
    pub fn new(transport: T, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            transport,
            base_url,
            snapshot: None,
            forward: None,
            strict: false,
            retry: RetryPolicy::default(),
            stats: RequestStats::default(),
            window: VecDeque::with_capacity(TIMING_WINDOW),
            last_report_at: Instant::now(),
            last_report_calls: 0,
        }
    }

    /// Open the cache read-only and load the snapshot index.
    pub fn with_snapshot(mut self, cache_path: &Path) -> Result<Self> {
        let mut store = CacheStore::open(cache_path, Mode::ReadOnly)?;
        store.load_index()?;
        self.snapshot = Some(store);
        Ok(self)
    }

    /// Forward every remote result to the cache writer's channel.
    pub fn forwarding(mut self, tx: UnboundedSender<CacheMessage>) -> Self {
        self.forward = Some(tx);
        self
    }

    /// Fail with `NotCached` instead of calling the remote service.
    pub fn cache_only(mut self) -> Self {
        self.strict = true;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn stats(&self) -> RequestStats {
        self.stats
    }

    /// Number of keys in the snapshot index.
    pub fn snapshot_len(&self) -> usize {
        self.snapshot.as_ref().map(CacheStore::len).unwrap_or(0)
    }

    /// Resolve one request key to its raw payload text.
    pub async fn get_raw(&mut self, url: &str) -> Result<String> {
        self.stats.requests += 1;

        if let Some(store) = self.snapshot.as_mut() {
            if let Some(payload) = store.lookup(url)? {
                self.stats.cache_hits += 1;
                return Ok(payload);
            }
        }

        if self.strict {
            return Err(Error::NotCached(url.to_string()));
        }

        let raw = self.fetch_remote(url).await?;
        if let Some(tx) = &self.forward {
            tx.send(CacheMessage::Write {
                key: url.to_string(),
                payload: raw.clone(),
            })
            .map_err(|e| Error::Channel(e.to_string()))?;
        }
        Ok(raw)
    }

    /// Resolve one request key and parse the payload as JSON.
    pub async fn get(&mut self, url: &str) -> Result<serde_json::Value> {
        let raw = self.get_raw(url).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn fetch_remote(&mut self, url: &str) -> Result<String> {
        let started = Instant::now();
        let mut body = None;
        for attempt in 1..=self.retry.max_attempts {
            match self.transport.get(url).await {
                Ok(text) => {
                    body = Some(text);
                    break;
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        url,
                        remote_calls = self.stats.remote_calls,
                        "communication error with remote service: {e}"
                    );
                    if attempt < self.retry.max_attempts {
                        sleep(self.retry.delay).await;
                    }
                }
            }
        }
        let Some(body) = body else {
            return Err(Error::RemoteUnavailable {
                url: url.to_string(),
                attempts: self.retry.max_attempts,
            });
        };

        self.stats.remote_calls += 1;
        if self.window.len() == TIMING_WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(started.elapsed());
        if self.stats.remote_calls % REPORT_EVERY == 0 {
            self.report_throughput();
        }
        Ok(body)
    }

    fn report_throughput(&mut self) {
        let batch = self.stats.remote_calls - self.last_report_calls;
        let elapsed = self.last_report_at.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            batch as f64 / elapsed
        } else {
            0.0
        };
        let window_sum: f64 = self.window.iter().map(Duration::as_secs_f64).sum();
        info!(
            requests = self.stats.requests,
            remote_calls = self.stats.remote_calls,
            cache_hits = self.stats.cache_hits,
            cache_size = self.snapshot_len(),
            rate_per_sec = format!("{rate:.3}"),
            batch_secs = format!("{window_sum:.1}"),
            "remote call throughput"
        );
        self.last_report_at = Instant::now();
        self.last_report_calls = self.stats.remote_calls;
    }
}

#[cfg(test)]
pub(crate) mod test_transport {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Scripted transport: url → body, counting every call.
    pub struct MapTransport {
        responses: Mutex<HashMap<String, String>>,
        pub calls: AtomicU32,
    }

    impl MapTransport {
        pub fn new(entries: &[(&str, &str)]) -> Self {
            Self {
                responses: Mutex::new(
                    entries
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                calls: AtomicU32::new(0),
            }
        }

        pub fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Transport for MapTransport {
        async fn get(&self, url: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| Error::Http(format!("status 404 for {url}")))
        }
    }

    /// Transport that fails the first `failures` calls, then succeeds.
    pub struct FlakyTransport {
        failures: u32,
        body: String,
        pub calls: AtomicU32,
    }

    impl FlakyTransport {
        pub fn new(failures: u32, body: &str) -> Self {
            Self {
                failures,
                body: body.to_string(),
                calls: AtomicU32::new(0),
            }
        }

        pub fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Transport for FlakyTransport {
        async fn get(&self, _url: &str) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(Error::Http("connection reset".to_string()))
            } else {
                Ok(self.body.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_transport::{FlakyTransport, MapTransport};
    use super::*;
    use cache_store::{CacheStore, Mode};
    use tokio::sync::mpsc;

    const NO_DELAY: RetryPolicy = RetryPolicy {
        max_attempts: 40,
        delay: Duration::ZERO,
    };

    fn seeded_cache(entries: &[(&str, &str)]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.cache");
        let mut store = CacheStore::open(&path, Mode::Append).unwrap();
        store.load_index().unwrap();
        for (key, payload) in entries {
            store.append(key, payload).unwrap();
        }
        (dir, path)
    }

    #[tokio::test]
    async fn test_cache_hit_short_circuits_remote() {
        let url = "https://example.test/rxcui/7/allrelated.json";
        let (_dir, path) = seeded_cache(&[(url, "{\"cached\":true}")]);
        let transport = MapTransport::new(&[(url, "{\"cached\":false}")]);

        let mut client = RxnavClient::new(transport, "https://example.test")
            .with_snapshot(&path)
            .unwrap();

        let body = client.get_raw(url).await.unwrap();
        assert_eq!(body, "{\"cached\":true}");
        assert_eq!(client.stats().cache_hits, 1);
        assert_eq!(client.stats().remote_calls, 0);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_k_failures() {
        let transport = FlakyTransport::new(3, "{\"ok\":1}");
        let mut client =
            RxnavClient::new(transport, "https://example.test").with_retry(NO_DELAY);

        let body = client.get_raw("https://example.test/x").await.unwrap();
        assert_eq!(body, "{\"ok\":1}");
        // k failures then one success: k + 1 attempted calls.
        assert_eq!(client.stats().remote_calls, 1);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_is_fatal_and_forwards_nothing() {
        let transport = FlakyTransport::new(u32::MAX, "");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut client = RxnavClient::new(transport, "https://example.test")
            .with_retry(RetryPolicy {
                max_attempts: 5,
                delay: Duration::ZERO,
            })
            .forwarding(tx);

        let err = client.get_raw("https://example.test/x").await.unwrap_err();
        assert!(matches!(err, Error::RemoteUnavailable { attempts: 5, .. }));
        assert!(rx.try_recv().is_err(), "no cache write on failure");
    }

    #[tokio::test]
    async fn test_attempt_count_observed_by_transport() {
        let transport = FlakyTransport::new(2, "{}");
        let mut client =
            RxnavClient::new(transport, "https://example.test").with_retry(NO_DELAY);
        client.get_raw("https://example.test/x").await.unwrap();
        // 2 failures + 1 success.
        let transport = client.transport;
        assert_eq!(transport.call_count(), 3);
    }

    #[tokio::test]
    async fn test_strict_mode_miss_is_not_cached() {
        let (_dir, path) = seeded_cache(&[]);
        let transport = MapTransport::new(&[("https://example.test/x", "{}")]);
        let mut client = RxnavClient::new(transport, "https://example.test")
            .with_snapshot(&path)
            .unwrap()
            .cache_only();

        let err = client.get_raw("https://example.test/x").await.unwrap_err();
        assert!(matches!(err, Error::NotCached(_)));
        assert_eq!(client.transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_strict_rerun_resolves_entirely_from_cache() {
        let url = "https://example.test/rxcui/7/allrelated.json";
        let (_dir, path) = seeded_cache(&[]);

        // First run fetches remotely and forwards to the writer channel.
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut first = RxnavClient::new(
            MapTransport::new(&[(url, "{\"n\":7}")]),
            "https://example.test",
        )
        .with_retry(NO_DELAY)
        .with_snapshot(&path)
        .unwrap()
        .forwarding(tx);
        let first_body = first.get_raw(url).await.unwrap();

        // Apply the forwarded writes, as the cache writer would.
        let mut store = CacheStore::open(&path, Mode::Append).unwrap();
        store.load_index().unwrap();
        while let Ok(CacheMessage::Write { key, payload }) = rx.try_recv() {
            store.append(&key, &payload).unwrap();
        }
        drop(store);

        // The strict rerun resolves the same request from the cache alone.
        let mut rerun = RxnavClient::new(MapTransport::new(&[]), "https://example.test")
            .with_snapshot(&path)
            .unwrap()
            .cache_only();
        assert_eq!(rerun.get_raw(url).await.unwrap(), first_body);
        assert_eq!(rerun.transport.call_count(), 0);

        // A key the first run never produced stays a hard miss.
        let err = rerun
            .get_raw("https://example.test/other")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotCached(_)));
        assert_eq!(rerun.transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_remote_result_forwarded_to_writer_channel() {
        let url = "https://example.test/rxcui/9/allrelated.json";
        let transport = MapTransport::new(&[(url, "{\"fresh\":true}")]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut client = RxnavClient::new(transport, "https://example.test")
            .with_retry(NO_DELAY)
            .forwarding(tx);

        client.get_raw(url).await.unwrap();
        let msg = rx.try_recv().unwrap();
        assert_eq!(
            msg,
            CacheMessage::Write {
                key: url.to_string(),
                payload: "{\"fresh\":true}".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_get_parses_json_payload() {
        let url = "https://example.test/rxcui/9/allrelated.json";
        let transport = MapTransport::new(&[(url, "{\"n\": 3}")]);
        let mut client =
            RxnavClient::new(transport, "https://example.test").with_retry(NO_DELAY);
        let value = client.get(url).await.unwrap();
        assert_eq!(value["n"], 3);
    }
}
