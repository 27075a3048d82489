//! The single cache-writer task.
//!
//! Exactly one append handle exists per cache path; this task owns it for
//! the whole run, across every phase, so its index accumulates everything
//! it has written.

use cache_store::{CacheStore, Mode};
use common::{CacheMessage, Error, Result};
use std::path::PathBuf;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, info_span, Instrument};

const WRITE_PROGRESS_EVERY: u64 = 1000;

/// Drain the channel until `Stop`, appending every `Write` to the store.
///
/// Returns the number of records written. The channel closing without a
/// `Stop` means a producer died while the run was still going; that is
/// reported as an error rather than a quiet exit.
pub async fn run_writer(
    cache_path: PathBuf,
    mut rx: UnboundedReceiver<CacheMessage>,
) -> Result<u64> {
    async move {
        let mut store = CacheStore::open(&cache_path, Mode::Append)?;
        store.load_index()?;
        info!(existing = store.len(), "cache writer started");

        let mut written = 0u64;
        loop {
            match rx.recv().await {
                Some(CacheMessage::Write { key, payload }) => {
                    store.append(&key, &payload)?;
                    written += 1;
                    if written % WRITE_PROGRESS_EVERY == 0 {
                        info!(written, "cache writer progress");
                    }
                }
                Some(CacheMessage::Stop) => break,
                None => {
                    return Err(Error::Channel(
                        "writer channel closed before Stop".to_string(),
                    ));
                }
            }
        }

        info!(written, keys = store.len(), "cache writer stopping");
        Ok(written)
    }
    .instrument(info_span!("cache_writer"))
    .await
}
