//! Fetch worker: snapshot load, barrier rendezvous, segment processing.

use common::{CacheMessage, FetchOp, Result, Rxcui};
use rxnav_client::{RetryPolicy, RxnavClient, Transport};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Barrier;
use tracing::{info, info_span, Instrument};

const ITEM_PROGRESS_EVERY: usize = 1000;

/// One worker's assignment for a phase.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    pub worker_id: usize,
    pub phase: &'static str,
    /// Operations performed for every code of the segment.
    pub ops: Vec<FetchOp>,
    /// Contiguous slice of the sorted universe assigned to this worker.
    pub codes: Vec<Rxcui>,
}

/// Run one worker to completion.
///
/// The worker opens its own read-only store handle and loads a snapshot
/// index, then waits at the phase barrier so no peer starts fetching before
/// every snapshot is taken. It never writes the store itself; the client's
/// forwarding channel carries every remote result to the writer.
pub async fn run_worker<T: Transport>(
    spec: WorkerSpec,
    cache_path: PathBuf,
    base_url: String,
    retry: RetryPolicy,
    barrier: Arc<Barrier>,
    tx: UnboundedSender<CacheMessage>,
    transport: T,
) -> Result<()> {
    let span = info_span!("worker", id = spec.worker_id, phase = spec.phase);
    async move {
        info!(
            codes = spec.codes.len(),
            first = spec.codes.first().copied(),
            last = spec.codes.last().copied(),
            "worker starting"
        );

        let client_result = RxnavClient::new(transport, base_url)
            .with_retry(retry)
            .forwarding(tx)
            .with_snapshot(&cache_path);

        // Arrive at the barrier even when the snapshot failed, so peers and
        // the orchestrator are not stranded at the rendezvous.
        info!("waiting at barrier");
        barrier.wait().await;
        info!("passed barrier");
        let mut client = client_result?;

        for (idx, &code) in spec.codes.iter().enumerate() {
            for op in &spec.ops {
                match op {
                    FetchOp::AllRelated => {
                        client.all_related(code).await?;
                    }
                    FetchOp::ConceptHistory => {
                        client.concept_history(code).await?;
                    }
                    FetchOp::NdcCodes => {
                        client.ndc_codes_for(code).await?;
                    }
                }
            }
            if idx % ITEM_PROGRESS_EVERY == 0 {
                info!(
                    processed = idx + 1,
                    total = spec.codes.len(),
                    last = code,
                    "progress"
                );
            }
        }

        let stats = client.stats();
        info!(
            total = spec.codes.len(),
            requests = stats.requests,
            remote_calls = stats.remote_calls,
            cache_hits = stats.cache_hits,
            "worker finished"
        );
        Ok(())
    }
    .instrument(span)
    .await
}
