//! Partition of the sorted code universe into per-worker segments.

use common::Rxcui;

/// Slice `codes` into `worker_count` contiguous, disjoint segments.
///
/// Every segment holds `ceil(n / worker_count)` codes except possibly the
/// trailing ones, which may be shorter or empty when the universe does not
/// divide evenly. The union of the segments, in order, is exactly `codes`.
pub fn segments(codes: &[Rxcui], worker_count: usize) -> Vec<Vec<Rxcui>> {
    let worker_count = worker_count.max(1);
    let n = codes.len();
    let size = n.div_ceil(worker_count);
    (0..worker_count)
        .map(|i| {
            let start = (i * size).min(n);
            let end = ((i + 1) * size).min(n);
            codes[start..end].to_vec()
        })
        .collect()
}
