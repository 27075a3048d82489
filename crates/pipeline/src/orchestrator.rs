//! Phase-sequencing orchestrator.
//!
//! Determines the code universe, partitions it, runs the fetch phases
//! strictly in sequence against a single long-lived cache writer, and
//! finishes with a cache-only sanity pass.

use crate::segment::segments;
use crate::worker::{run_worker, WorkerSpec};
use crate::writer::run_writer;
use cache_store::{CacheStore, Mode};
use common::config::BuildConfig;
use common::{CacheMessage, CodeStatus, Error, FetchOp, Result, Rxcui};
use rxnav_client::{ClassTreeNode, HttpTransport, RetryPolicy, RxnavClient, Transport};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::Barrier;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};

const DERIVE_PROGRESS_EVERY: usize = 10_000;

pub struct CacheBuilder<T: Transport + Clone = HttpTransport> {
    cfg: BuildConfig,
    transport: T,
}

impl CacheBuilder<HttpTransport> {
    pub fn new(cfg: BuildConfig) -> Self {
        // One transport for the whole run: the pooled HTTP client and the
        // request throttle are shared by every worker, so the configured
        // rate cap holds across the process, not per task.
        let transport = HttpTransport::new(&cfg.user_agent, &cfg.throttle);
        Self { cfg, transport }
    }
}

impl<T: Transport + Clone + 'static> CacheBuilder<T> {
    /// Build against a specific transport; tests script the remote side
    /// through this.
    pub fn with_transport(cfg: BuildConfig, transport: T) -> Self {
        Self { cfg, transport }
    }

    /// Run the whole build: enumeration, fetch phases, writer shutdown,
    /// final sanity pass.
    pub async fn run(&self) -> Result<()> {
        // Create the cache file up front so no read-only holder races the
        // writer task to it.
        CacheStore::open(&self.cfg.cache_path, Mode::Append)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(run_writer(self.cfg.cache_path.clone(), rx));

        let phases_result = self.run_phases(&tx).await;
        let writer_result = stop_writer(tx, writer).await;

        phases_result?;
        writer_result?;
        self.final_sanity_check().await
    }

    /// Run only the status-enumeration phase (cache seeding).
    pub async fn run_enumeration_only(&self) -> Result<()> {
        CacheStore::open(&self.cfg.cache_path, Mode::Append)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(run_writer(self.cfg.cache_path.clone(), rx));

        let phase_result = self.run_enumeration_phase(tx.clone()).await;
        let writer_result = stop_writer(tx, writer).await;

        phase_result?;
        writer_result
    }

    async fn run_phases(&self, tx: &UnboundedSender<CacheMessage>) -> Result<()> {
        // Determine the universe of work: RxNorm codes by status category,
        // sanity-checked against the NON-RXNORM set.
        let mut reader = self.reader()?;
        let (rxnorm, _) = reader.enumerate_codes(CodeStatus::RXNORM).await?;
        let (non_rxnorm, _) = reader.enumerate_codes(&[CodeStatus::NonRxnorm]).await?;
        let universe = disjoint_correction(rxnorm, non_rxnorm);
        let codes: Vec<Rxcui> = universe.into_iter().collect();
        info!(codes = codes.len(), "determined code universe");

        // Phase 0: cache the status enumerations themselves.
        self.run_enumeration_phase(tx.clone()).await?;

        // Phase 1: related concepts and history for every code.
        self.run_fetch_phase(
            "phase1",
            &codes,
            vec![FetchOp::AllRelated, FetchOp::ConceptHistory],
            tx,
        )
        .await?;

        // Phase 2: NDC packages for the drug codes now derivable from the
        // cache.
        let drug_codes = self.derive_drug_codes().await?;
        self.run_fetch_phase("phase2", &drug_codes, vec![FetchOp::NdcCodes], tx)
            .await?;

        // Phase 3: drug-class hierarchy and leaf-class members.
        self.run_class_phase(tx.clone()).await
    }

    fn transport(&self) -> T {
        self.transport.clone()
    }

    fn retry(&self) -> RetryPolicy {
        RetryPolicy::from(&self.cfg.retry)
    }

    /// Fresh read-only client with its own point-in-time snapshot.
    fn reader(&self) -> Result<RxnavClient<T>> {
        RxnavClient::new(self.transport(), self.cfg.base_url.clone())
            .with_retry(self.retry())
            .with_snapshot(&self.cfg.cache_path)
    }

    async fn run_enumeration_phase(&self, tx: UnboundedSender<CacheMessage>) -> Result<()> {
        let transport = self.transport();
        let base_url = self.cfg.base_url.clone();
        let retry = self.retry();
        let cache_path = self.cfg.cache_path.clone();
        let handle: JoinHandle<Result<()>> = tokio::spawn(
            async move {
                let mut client = RxnavClient::new(transport, base_url)
                    .with_retry(retry)
                    .forwarding(tx)
                    .with_snapshot(&cache_path)?;
                let (universe, _) = client.enumerate_codes(CodeStatus::ALL).await?;
                info!(codes = universe.len(), "status enumeration cached");
                Ok(())
            }
            .instrument(info_span!("phase", name = "phase0")),
        );
        join_task(handle, "phase0").await
    }

    async fn run_fetch_phase(
        &self,
        phase: &'static str,
        codes: &[Rxcui],
        ops: Vec<FetchOp>,
        tx: &UnboundedSender<CacheMessage>,
    ) -> Result<()> {
        let worker_count = self.cfg.workers;
        info!(
            phase,
            codes = codes.len(),
            workers = worker_count,
            "starting phase"
        );

        // Workers and the orchestrator rendezvous at the same barrier, so
        // no worker fetches until every snapshot has been taken.
        let barrier = Arc::new(Barrier::new(worker_count + 1));
        let mut handles = Vec::with_capacity(worker_count);
        for (idx, segment) in segments(codes, worker_count).into_iter().enumerate() {
            let spec = WorkerSpec {
                worker_id: idx + 1,
                phase,
                ops: ops.clone(),
                codes: segment,
            };
            handles.push(tokio::spawn(run_worker(
                spec,
                self.cfg.cache_path.clone(),
                self.cfg.base_url.clone(),
                self.retry(),
                barrier.clone(),
                tx.clone(),
                self.transport(),
            )));
        }

        info!(phase, "waiting at barrier");
        barrier.wait().await;
        info!(phase, "passed barrier");

        // Join every worker before reporting; a failed sibling does not
        // cancel the others.
        let mut first_err = None;
        for (idx, handle) in handles.into_iter().enumerate() {
            let result = match handle.await {
                Ok(res) => res,
                Err(e) => Err(Error::Task(format!("worker {} panicked: {e}", idx + 1))),
            };
            if let Err(e) = result {
                error!(phase, worker = idx + 1, "worker failed: {e}");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => {
                info!(phase, "phase complete");
                Ok(())
            }
        }
    }

    /// Re-read the cache with a fresh snapshot and pick out the drug codes
    /// by term type.
    async fn derive_drug_codes(&self) -> Result<Vec<Rxcui>> {
        info!("deriving drug code set from the cache");
        let mut reader = self.reader()?;
        let (universe, _) = reader.enumerate_codes(CodeStatus::RXNORM).await?;
        let mut drugs = Vec::new();
        for (idx, &code) in universe.iter().enumerate() {
            if let Some(history) = reader.concept_history(code).await? {
                if history.is_drug() {
                    drugs.push(code);
                }
            }
            if (idx + 1) % DERIVE_PROGRESS_EVERY == 0 {
                info!(
                    processed = idx + 1,
                    total = universe.len(),
                    drugs = drugs.len(),
                    "drug derivation progress"
                );
            }
        }
        info!(drugs = drugs.len(), "derived drug code set");
        Ok(drugs)
    }

    async fn run_class_phase(&self, tx: UnboundedSender<CacheMessage>) -> Result<()> {
        let transport = self.transport();
        let base_url = self.cfg.base_url.clone();
        let retry = self.retry();
        let cache_path = self.cfg.cache_path.clone();
        let class_root = self.cfg.class_root.clone();
        let handle: JoinHandle<Result<()>> = tokio::spawn(
            async move {
                let mut client = RxnavClient::new(transport, base_url)
                    .with_retry(retry)
                    .forwarding(tx)
                    .with_snapshot(&cache_path)?;
                let tree = client.class_tree(&class_root).await?;
                let mut leaves = Vec::new();
                collect_leaf_classes(&tree.tree, &mut leaves);
                info!(root = %class_root, leaves = leaves.len(), "fetched class hierarchy");
                for class_id in &leaves {
                    client.class_members(class_id).await?;
                }
                info!(leaves = leaves.len(), "cached class members");
                Ok(())
            }
            .instrument(info_span!("phase", name = "phase3")),
        );
        join_task(handle, "phase3").await
    }

    /// Re-derive the universe purely from the cache. Every enumeration key
    /// must be a cache hit by now; a miss fails the run.
    async fn final_sanity_check(&self) -> Result<()> {
        let mut strict = self.reader()?.cache_only();
        let (universe, _) = strict.enumerate_codes(CodeStatus::ALL).await?;
        info!(
            codes = universe.len(),
            cached_keys = strict.snapshot_len(),
            "final cache sanity check passed"
        );
        Ok(())
    }
}

/// Signal `Stop`, then wait for the writer to drain and exit.
async fn stop_writer(
    tx: UnboundedSender<CacheMessage>,
    writer: JoinHandle<Result<u64>>,
) -> Result<()> {
    if tx.send(CacheMessage::Stop).is_err() {
        warn!("writer channel already closed");
    }
    drop(tx);
    match writer.await {
        Ok(Ok(written)) => {
            info!(written, "cache writer joined");
            Ok(())
        }
        Ok(Err(e)) => Err(e),
        Err(e) => Err(Error::Task(format!("cache writer panicked: {e}"))),
    }
}

async fn join_task(handle: JoinHandle<Result<()>>, name: &str) -> Result<()> {
    match handle.await {
        Ok(res) => res,
        Err(e) => Err(Error::Task(format!("{name} task panicked: {e}"))),
    }
}

/// Status categories are expected to be mutually exclusive. Overlap is
/// reported and corrected by subtraction; it is informational, not fatal.
fn disjoint_correction(
    rxnorm: BTreeSet<Rxcui>,
    mut non_rxnorm: BTreeSet<Rxcui>,
) -> BTreeSet<Rxcui> {
    let overlap: Vec<Rxcui> = rxnorm.intersection(&non_rxnorm).copied().collect();
    if overlap.is_empty() {
        info!(
            rxnorm = rxnorm.len(),
            non_rxnorm = non_rxnorm.len(),
            "status categories are disjoint"
        );
    } else {
        warn!(
            overlap = overlap.len(),
            codes = ?overlap,
            "NON-RXNORM codes overlap the RxNorm set; subtracting the overlap"
        );
        for code in &overlap {
            non_rxnorm.remove(code);
        }
        info!(
            non_rxnorm = non_rxnorm.len(),
            "corrected NON-RXNORM set size"
        );
    }
    rxnorm
}

/// Depth-first walk yielding the class ids of leaf classes only. Members
/// are curated per leaf class; interior classes have none of their own.
pub fn collect_leaf_classes(nodes: &[ClassTreeNode], out: &mut Vec<String>) {
    for node in nodes {
        if node.children.is_empty() {
            out.push(node.concept.class_id.clone());
        } else {
            collect_leaf_classes(&node.children, out);
        }
    }
}
