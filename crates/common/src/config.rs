//! Cache builder configuration types.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level build configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Path of the append-only cache file.
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,

    /// Number of concurrent fetch workers per phase.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Base URL of the RxNav REST service.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// User-Agent sent on every remote call.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Root class id of the drug-class hierarchy.
    #[serde(default = "default_class_root")]
    pub class_root: String,

    /// Remote retry parameters.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Remote request throttling.
    #[serde(default)]
    pub throttle: ThrottleConfig,
}

/// Bounded-retry parameters for remote calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempt ceiling before a call is declared unavailable.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts, in seconds.
    #[serde(default = "default_retry_delay_secs")]
    pub delay_secs: u64,
}

/// Request-rate cap for the remote service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    #[serde(default = "default_requests_per_sec")]
    pub requests_per_sec: u32,
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("rxnorm.cache")
}

fn default_workers() -> usize {
    4
}

fn default_base_url() -> String {
    "https://rxnav.nlm.nih.gov/REST".to_string()
}

fn default_user_agent() -> String {
    "rxnorm-cache-builder/0.1".to_string()
}

fn default_class_root() -> String {
    "VA000".to_string()
}

fn default_max_attempts() -> u32 {
    40
}

fn default_retry_delay_secs() -> u64 {
    15
}

fn default_requests_per_sec() -> u32 {
    20
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            cache_path: default_cache_path(),
            workers: default_workers(),
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            class_root: default_class_root(),
            retry: RetryConfig::default(),
            throttle: ThrottleConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_secs: default_retry_delay_secs(),
        }
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            requests_per_sec: default_requests_per_sec(),
        }
    }
}
